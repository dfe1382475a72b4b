//! Saga error types.

use common::ErrorKind;
use domain::DomainError;
use inventory::InventoryError;
use outbox::OutboxError;
use thiserror::Error;

/// Errors raised while checking out, assembling or cancelling an order.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Stock deduction or release failed.
    #[error("{0}")]
    Inventory(#[from] InventoryError),

    /// Order persistence failed.
    #[error("{0}")]
    Domain(#[from] DomainError),

    /// Outbox write failed.
    #[error("{0}")]
    Outbox(#[from] OutboxError),

    /// Token store backend failed.
    #[error("Token store error: {0}")]
    TokenStore(#[from] redis::RedisError),

    /// Pricing service error.
    #[error("Pricing service error: {0}")]
    PricingService(String),

    /// Coupon service error.
    #[error("Coupon service error: {0}")]
    CouponService(String),

    /// Cart service error.
    #[error("Cart service error: {0}")]
    CartService(String),

    /// Payment service error.
    #[error("Payment service error: {0}")]
    PaymentService(String),

    /// The requested resource does not exist or is not visible to the caller.
    #[error("{0}")]
    NotFound(String),

    /// The request collides with existing state.
    #[error("{0}")]
    Conflict(String),

    /// A downstream dependency or local resource is exhausted.
    #[error("{0}")]
    Unavailable(String),
}

impl SagaError {
    /// Classifies the error into the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::Inventory(e) => e.kind(),
            SagaError::Domain(e) => e.kind(),
            SagaError::Outbox(e) => e.kind(),
            SagaError::NotFound(_) => ErrorKind::NotFound,
            SagaError::Conflict(_) => ErrorKind::Conflict,
            SagaError::TokenStore(_)
            | SagaError::PricingService(_)
            | SagaError::CouponService(_)
            | SagaError::CartService(_)
            | SagaError::PaymentService(_)
            | SagaError::Unavailable(_) => ErrorKind::DownstreamUnavailable,
        }
    }
}

impl SagaError {
    /// The reason recorded on a failed order and shown to the buyer.
    ///
    /// Business rejections keep their message. Infrastructure failures get
    /// a fixed text per kind so driver and broker details stay in the logs.
    pub fn buyer_reason(&self) -> String {
        match self.kind() {
            ErrorKind::NotFound
            | ErrorKind::InsufficientStock
            | ErrorKind::LimitExceeded
            | ErrorKind::Conflict => self.to_string(),
            ErrorKind::DownstreamUnavailable => {
                "A service needed to place this order is unavailable, please try again later"
                    .to_string()
            }
            ErrorKind::Internal => "Order could not be placed due to an internal error".to_string(),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
