//! Transactional outbox for downstream notifications.
//!
//! Messages are written in the same local transaction as the state change
//! they describe, then delivered at least once by the [`MessageRelay`]:
//!
//! - [`store`]: persistence of outbox rows (in-memory or PostgreSQL)
//! - [`publisher`]: the broker seam and an in-memory double
//! - [`amqp`]: lapin publisher with confirms, and a queue consumer
//! - [`in_process`]: the same routing and dead-lettering without a broker
//! - [`relay`]: the claim, publish and retry loop

pub mod amqp;
pub mod error;
pub mod in_process;
pub mod message;
pub mod publisher;
pub mod relay;
pub mod store;

pub use amqp::{AmqpConsumer, AmqpPublisher, QueueBinding};
pub use error::{OutboxError, Result};
pub use in_process::InProcessBroker;
pub use message::{FailureUpdate, MessageKind, ORDER_EXCHANGE, OutboxMessage, OutboxStatus};
pub use publisher::{InMemoryPublisher, MessageHandler, MessagePublisher};
pub use relay::{MessageRelay, RelayConfig, RelayReport};
pub use store::{InMemoryOutboxStore, OutboxStore, PostgresOutboxStore};
