//! In-process broker for single-node runs and tests.
//!
//! Routes each published message to the handlers bound to its routing key
//! and runs them inline. A handler error dead-letters the message: the
//! handlers bound to that key on the dead-letter side run next, the same
//! path a rejected AMQP delivery takes to its dead-letter queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::message::OutboxMessage;
use crate::publisher::{MessageHandler, MessagePublisher};

type Handlers = HashMap<String, Vec<Arc<dyn MessageHandler>>>;

#[derive(Default)]
struct Routes {
    consumers: Handlers,
    dead_letters: Handlers,
}

/// Publisher that delivers straight to in-process handlers.
#[derive(Clone, Default)]
pub struct InProcessBroker {
    routes: Arc<RwLock<Routes>>,
    dead_lettered: Arc<AtomicUsize>,
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a consumer to `routing_key`.
    pub async fn bind(&self, routing_key: &str, handler: Arc<dyn MessageHandler>) {
        self.routes
            .write()
            .await
            .consumers
            .entry(routing_key.to_string())
            .or_default()
            .push(handler);
        info!(routing_key, "Bound in-process consumer");
    }

    /// Binds a consumer for messages on `routing_key` that another consumer rejected.
    pub async fn bind_dead_letters(&self, routing_key: &str, handler: Arc<dyn MessageHandler>) {
        self.routes
            .write()
            .await
            .dead_letters
            .entry(routing_key.to_string())
            .or_default()
            .push(handler);
        info!(routing_key, "Bound in-process dead-letter consumer");
    }

    /// Deliveries rejected so far.
    pub fn dead_lettered_count(&self) -> usize {
        self.dead_lettered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagePublisher for InProcessBroker {
    async fn publish(&self, message: &OutboxMessage) -> Result<()> {
        // Snapshot under the read lock, dispatch after releasing it.
        let (consumers, dead_letters) = {
            let routes = self.routes.read().await;
            (
                routes
                    .consumers
                    .get(&message.routing_key)
                    .cloned()
                    .unwrap_or_default(),
                routes
                    .dead_letters
                    .get(&message.routing_key)
                    .cloned()
                    .unwrap_or_default(),
            )
        };

        if consumers.is_empty() {
            debug!(routing_key = %message.routing_key, "No consumer bound, message dropped");
            return Ok(());
        }

        let payload = message.payload.as_bytes();
        for consumer in consumers {
            let Err(e) = consumer.handle(payload).await else {
                continue;
            };
            warn!(routing_key = %message.routing_key, error = %e, "Handler failed, dead-lettering");
            self.dead_lettered.fetch_add(1, Ordering::SeqCst);
            for dead_letter in &dead_letters {
                if let Err(e) = dead_letter.handle(payload).await {
                    error!(
                        routing_key = %message.routing_key,
                        error = %e,
                        "Dead-letter handler failed, message dropped"
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OutboxError;
    use common::OrderCode;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        reject: bool,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, payload: &[u8]) -> Result<()> {
            self.seen
                .lock()
                .await
                .push(String::from_utf8_lossy(payload).into_owned());
            if self.reject {
                return Err(OutboxError::Rejected("no".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_routes_by_key_and_dead_letters_rejects() {
        let broker = InProcessBroker::new();
        let cancelled = Arc::new(Recorder::default());
        let rejecting = Arc::new(Recorder {
            reject: true,
            ..Default::default()
        });
        let dlq = Arc::new(Recorder::default());
        broker.bind("order.cancelled", cancelled.clone()).await;
        broker.bind("order.delay", rejecting.clone()).await;
        broker.bind_dead_letters("order.delay", dlq.clone()).await;

        let code = OrderCode::new("abc");
        broker
            .publish(&OutboxMessage::order_cancelled(&code))
            .await
            .unwrap();
        assert_eq!(cancelled.seen.lock().await.len(), 1);
        assert!(dlq.seen.lock().await.is_empty());

        broker
            .publish(&OutboxMessage::order_delay(&code))
            .await
            .unwrap();
        assert_eq!(rejecting.seen.lock().await.len(), 1);
        assert_eq!(*dlq.seen.lock().await, vec!["\"abc\"".to_string()]);
        assert_eq!(broker.dead_lettered_count(), 1);

        // Nothing bound: accepted and dropped.
        broker
            .publish(&OutboxMessage::coupon_use(1, &code))
            .await
            .unwrap();
        assert_eq!(broker.dead_lettered_count(), 1);
    }
}
