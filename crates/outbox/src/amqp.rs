//! RabbitMQ transport.
//!
//! Topology declared on connect:
//!
//! ```text
//! mall.order (topic) ──order.delay──► order.delay.wait (TTL) ──expired──► mall.order
//!                                                                         order.delay.expired
//! consumer queues ──rejected──► mall.order.dlx (topic)
//! ```

use std::time::Duration;

use async_trait::async_trait;
use deadpool_lapin::{Manager, Pool, PoolError};
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, ExchangeKind,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicRejectOptions,
        ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::message::{ORDER_EXCHANGE, OutboxMessage};
use crate::publisher::{MessageHandler, MessagePublisher};
use crate::{OutboxError, Result};

/// Exchange rejected deliveries are dead-lettered to.
pub const DEAD_LETTER_EXCHANGE: &str = "mall.order.dlx";

/// Holding queue that delays `order.delay` messages.
pub const DELAY_WAIT_QUEUE: &str = "order.delay.wait";

/// Routing key delay messages carry once their TTL expires.
pub const DELAY_EXPIRED_ROUTING_KEY: &str = "order.delay.expired";

fn pool_error(e: PoolError) -> OutboxError {
    OutboxError::Publish(format!("Failed to get connection from pool: {e}"))
}

async fn declare_topic(channel: &Channel, name: &str) -> Result<()> {
    channel
        .exchange_declare(
            name,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

/// Publishes outbox rows with publisher confirms.
#[derive(Clone)]
pub struct AmqpPublisher {
    pool: Pool,
}

impl AmqpPublisher {
    /// Connects, then declares the order exchange, the dead-letter exchange
    /// and the delay holding queue.
    ///
    /// `payment_timeout` is how long `order.delay` messages wait before
    /// they are delivered to the cancel consumer.
    pub async fn connect(url: &str, payment_timeout: Duration) -> Result<Self> {
        let manager = Manager::new(url.to_string(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(10)
            .build()
            .map_err(|e| OutboxError::Publish(format!("Failed to create pool: {e}")))?;

        let conn = pool.get().await.map_err(pool_error)?;
        let channel = conn.create_channel().await?;

        declare_topic(&channel, ORDER_EXCHANGE).await?;
        declare_topic(&channel, DEAD_LETTER_EXCHANGE).await?;

        let ttl_ms = u32::try_from(payment_timeout.as_millis()).unwrap_or(u32::MAX);
        let mut args = FieldTable::default();
        args.insert("x-message-ttl".into(), AMQPValue::LongUInt(ttl_ms));
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(ORDER_EXCHANGE.into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(DELAY_EXPIRED_ROUTING_KEY.into()),
        );
        channel
            .queue_declare(
                DELAY_WAIT_QUEUE,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await?;
        channel
            .queue_bind(
                DELAY_WAIT_QUEUE,
                ORDER_EXCHANGE,
                "order.delay",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(exchange = ORDER_EXCHANGE, ttl_ms, "Connected to AMQP");
        Ok(Self { pool })
    }

    /// A consumer sharing this publisher's connection pool.
    pub fn consumer(&self) -> AmqpConsumer {
        AmqpConsumer {
            pool: self.pool.clone(),
        }
    }

    async fn confirm_channel(&self) -> Result<Channel> {
        let conn = self.pool.get().await.map_err(pool_error)?;
        let channel = conn.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        Ok(channel)
    }
}

#[async_trait]
impl MessagePublisher for AmqpPublisher {
    #[tracing::instrument(
        name = "outbox.publish",
        skip_all,
        fields(id = message.id, routing_key = %message.routing_key)
    )]
    async fn publish(&self, message: &OutboxMessage) -> Result<()> {
        let channel = self.confirm_channel().await?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_message_id(message.message_id.to_string().into())
            .with_delivery_mode(2); // persistent

        let confirmation = channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                message.payload.as_bytes(),
                properties,
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(OutboxError::Publish(format!(
                "broker nacked message {}",
                message.message_id
            )));
        }

        debug!(exchange = %message.exchange, "Published outbox message");
        Ok(())
    }
}

/// Where a consumer reads from.
#[derive(Debug, Clone)]
pub struct QueueBinding {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    /// Rejected deliveries go to [`DEAD_LETTER_EXCHANGE`] when set.
    pub dead_letter: bool,
}

impl QueueBinding {
    /// A queue on the order exchange whose rejects are dead-lettered.
    pub fn order(queue: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: ORDER_EXCHANGE.to_string(),
            queue: queue.into(),
            routing_key: routing_key.into(),
            dead_letter: true,
        }
    }

    /// A queue on the dead-letter exchange.
    pub fn dead_letters(queue: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: DEAD_LETTER_EXCHANGE.to_string(),
            queue: queue.into(),
            routing_key: routing_key.into(),
            dead_letter: false,
        }
    }
}

/// Drives a [`MessageHandler`] from a queue.
#[derive(Clone)]
pub struct AmqpConsumer {
    pool: Pool,
}

impl AmqpConsumer {
    async fn bind(&self, binding: &QueueBinding) -> Result<lapin::Consumer> {
        let conn = self.pool.get().await.map_err(pool_error)?;
        let channel = conn.create_channel().await?;

        let mut args = FieldTable::default();
        if binding.dead_letter {
            args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(DEAD_LETTER_EXCHANGE.into()),
            );
        }
        channel
            .queue_declare(
                &binding.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await?;
        channel
            .queue_bind(
                &binding.queue,
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let consumer = channel
            .basic_consume(
                &binding.queue,
                &format!("{}-consumer", binding.queue),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = %binding.queue, routing_key = %binding.routing_key, "Bound consumer");
        Ok(consumer)
    }

    /// Consumes until `shutdown` flips or the sender goes away.
    ///
    /// Acks when the handler returns `Ok`; rejects without requeue otherwise.
    pub async fn run<H: MessageHandler>(
        &self,
        binding: QueueBinding,
        handler: H,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut consumer = self.bind(&binding).await?;

        loop {
            tokio::select! {
                delivery = consumer.next() => {
                    let delivery = match delivery {
                        Some(Ok(delivery)) => delivery,
                        Some(Err(e)) => return Err(e.into()),
                        None => break,
                    };
                    match handler.handle(&delivery.data).await {
                        Ok(()) => {
                            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                                error!(queue = %binding.queue, error = %e, "Failed to ack message");
                            }
                        }
                        Err(e) => {
                            warn!(queue = %binding.queue, error = %e, "Handler failed, rejecting");
                            if let Err(e) = delivery
                                .reject(BasicRejectOptions { requeue: false })
                                .await
                            {
                                error!(queue = %binding.queue, error = %e, "Failed to reject message");
                            }
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(queue = %binding.queue, "Consumer stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_binding_dead_letters() {
        let binding = QueueBinding::order("order.delay.cancel", DELAY_EXPIRED_ROUTING_KEY);
        assert_eq!(binding.exchange, ORDER_EXCHANGE);
        assert!(binding.dead_letter);

        let dlq = QueueBinding::dead_letters("stock.restore", "#");
        assert_eq!(dlq.exchange, DEAD_LETTER_EXCHANGE);
        assert!(!dlq.dead_letter);
    }
}
