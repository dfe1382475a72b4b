use common::{CampaignId, ErrorKind, ItemId, OrderCode, UserId};
use thiserror::Error;

/// Errors that can occur while reserving or releasing stock.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The stock item does not exist in the durable ledger, or the fast
    /// ledger was never warmed for it.
    #[error("Stock item not found: campaign {campaign}, item {item}")]
    ItemNotFound { campaign: CampaignId, item: ItemId },

    /// Not enough stock left to cover the requested quantity.
    #[error("Insufficient stock for campaign {campaign}, item {item}: requested {requested}")]
    InsufficientStock {
        campaign: CampaignId,
        item: ItemId,
        requested: u32,
    },

    /// The user would exceed the per-user purchase cap.
    #[error(
        "Purchase limit exceeded for user {user} on item {item}: already bought {purchased}, limit {limit}"
    )]
    LimitExceeded {
        user: UserId,
        item: ItemId,
        purchased: i64,
        limit: i64,
    },

    /// A reservation for this (order, item) pair was committed concurrently.
    #[error("Reservation already recorded for order {order_code}, item {item}")]
    DuplicateReservation { order_code: OrderCode, item: ItemId },

    /// The fast ledger backend failed.
    #[error("Fast ledger error: {0}")]
    FastLedger(#[from] redis::RedisError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Some reservations of an order could not be given back. The ones
    /// that failed were logged individually.
    #[error("Release of order {order_code} incomplete: {failed} of {total} reservations failed")]
    PartialRelease {
        order_code: OrderCode,
        failed: usize,
        total: usize,
    },

    /// Injected or otherwise unclassified store failure.
    #[error("Stock store unavailable: {0}")]
    Unavailable(String),
}

impl InventoryError {
    /// Classifies the error into the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            InventoryError::ItemNotFound { .. } => ErrorKind::NotFound,
            InventoryError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            InventoryError::LimitExceeded { .. } => ErrorKind::LimitExceeded,
            InventoryError::DuplicateReservation { .. } => ErrorKind::Conflict,
            InventoryError::FastLedger(_)
            | InventoryError::Database(_)
            | InventoryError::PartialRelease { .. }
            | InventoryError::Unavailable(_) => ErrorKind::DownstreamUnavailable,
            InventoryError::Migration(_) => ErrorKind::Internal,
        }
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
