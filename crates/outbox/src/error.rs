use common::ErrorKind;
use thiserror::Error;

/// Errors raised by the outbox store, the publisher and message handlers.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The broker could not be reached or rejected the operation.
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// Publishing failed (nack, pool exhaustion, injected failure).
    #[error("Publish failed: {0}")]
    Publish(String),

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row carries a value this version does not understand.
    #[error("Invalid outbox row: {0}")]
    InvalidRow(String),

    /// A consumer refused a delivery.
    #[error("Message rejected: {0}")]
    Rejected(String),
}

impl OutboxError {
    /// Classifies the error into the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OutboxError::Database(_) | OutboxError::Broker(_) | OutboxError::Publish(_) => {
                ErrorKind::DownstreamUnavailable
            }
            OutboxError::Migration(_)
            | OutboxError::Serialization(_)
            | OutboxError::InvalidRow(_)
            | OutboxError::Rejected(_) => ErrorKind::Internal,
        }
    }
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
