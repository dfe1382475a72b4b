//! Broker seams: publishing outbox rows and handling deliveries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::message::OutboxMessage;
use crate::{OutboxError, Result};

/// Delivers an outbox row to the broker.
///
/// `Ok` means the broker confirmed the message; anything else is retried by
/// the relay.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, message: &OutboxMessage) -> Result<()>;
}

/// Consumes a delivery from a queue.
///
/// Returning `Ok` acknowledges the delivery. Returning `Err` rejects it
/// without requeue so the broker can dead-letter it.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Result<()>;
}

#[async_trait]
impl<T: MessagePublisher + ?Sized> MessagePublisher for Arc<T> {
    async fn publish(&self, message: &OutboxMessage) -> Result<()> {
        (**self).publish(message).await
    }
}

#[async_trait]
impl<T: MessageHandler + ?Sized> MessageHandler for Arc<T> {
    async fn handle(&self, payload: &[u8]) -> Result<()> {
        (**self).handle(payload).await
    }
}

/// In-memory publisher that records what it was asked to send.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPublisher {
    published: Arc<Mutex<Vec<OutboxMessage>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent publishes fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Messages published so far, in order.
    pub async fn published(&self) -> Vec<OutboxMessage> {
        self.published.lock().await.clone()
    }

    pub async fn published_count(&self) -> usize {
        self.published.lock().await.len()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryPublisher {
    async fn publish(&self, message: &OutboxMessage) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(OutboxError::Publish(format!(
                "broker unavailable for {}",
                message.routing_key
            )));
        }
        self.published.lock().await.push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderCode;

    #[tokio::test]
    async fn test_records_and_fails_on_demand() {
        let publisher = InMemoryPublisher::new();
        let msg = OutboxMessage::order_delay(&OrderCode::new("abc"));

        publisher.publish(&msg).await.unwrap();
        assert_eq!(publisher.published_count().await, 1);

        publisher.set_fail(true);
        assert!(matches!(
            publisher.publish(&msg).await,
            Err(OutboxError::Publish(_))
        ));
        assert_eq!(publisher.published_count().await, 1);
    }
}
