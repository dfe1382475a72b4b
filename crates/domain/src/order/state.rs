//! Order status machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Creating ──► PendingPayment ──► Processing ──► Shipped ──► Completed
///    │               │
///    ▼               ▼
/// CreateFailed    Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Skeleton written, assembly in flight.
    #[default]
    Creating,

    /// Assembled, waiting for the buyer to pay.
    PendingPayment,

    /// Paid, being fulfilled.
    Processing,

    Shipped,

    /// Delivered (terminal state).
    Completed,

    /// Cancelled before payment (terminal state).
    Cancelled,

    /// Assembly failed or timed out (terminal state).
    CreateFailed,
}

impl OrderStatus {
    /// Persisted `SMALLINT` code.
    pub fn code(&self) -> i16 {
        match self {
            OrderStatus::PendingPayment => 0,
            OrderStatus::Processing => 1,
            OrderStatus::Shipped => 2,
            OrderStatus::Completed => 3,
            OrderStatus::Cancelled => 4,
            OrderStatus::Creating => 5,
            OrderStatus::CreateFailed => 6,
        }
    }

    /// Parses a persisted code.
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(OrderStatus::PendingPayment),
            1 => Some(OrderStatus::Processing),
            2 => Some(OrderStatus::Shipped),
            3 => Some(OrderStatus::Completed),
            4 => Some(OrderStatus::Cancelled),
            5 => Some(OrderStatus::Creating),
            6 => Some(OrderStatus::CreateFailed),
            _ => None,
        }
    }

    /// Returns true if assembly may finish or fail from this status.
    pub fn can_finish_assembly(&self) -> bool {
        matches!(self, OrderStatus::Creating)
    }

    /// Returns true if the order can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::PendingPayment)
    }

    /// Returns true if a payment can be recorded in this status.
    pub fn can_pay(&self) -> bool {
        matches!(self, OrderStatus::PendingPayment)
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::CreateFailed
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Creating => "CREATING",
            OrderStatus::PendingPayment => "PENDING_PAYMENT",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::CreateFailed => "CREATE_FAILED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
