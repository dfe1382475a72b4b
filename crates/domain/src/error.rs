//! Domain error types.

use common::{ErrorKind, OrderCode};
use outbox::OutboxError;
use thiserror::Error;

/// Errors that can occur while persisting or transitioning orders.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No order with this code.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderCode),

    /// An order with this code already exists.
    #[error("Order code already used: {0}")]
    DuplicateOrderCode(OrderCode),

    /// Writing the outbox rows failed.
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row carries a value this version does not understand.
    #[error("Invalid order row: {0}")]
    InvalidRow(String),

    /// Injected or otherwise unclassified store failure.
    #[error("Order store unavailable: {0}")]
    Unavailable(String),
}

impl DomainError {
    /// Classifies the error into the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::OrderNotFound(_) => ErrorKind::NotFound,
            DomainError::DuplicateOrderCode(_) => ErrorKind::Conflict,
            DomainError::Outbox(e) => e.kind(),
            DomainError::Database(_) | DomainError::Unavailable(_) => {
                ErrorKind::DownstreamUnavailable
            }
            DomainError::Migration(_) | DomainError::InvalidRow(_) => ErrorKind::Internal,
        }
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
