//! Stock ledgers for the limited-stock purchase pipeline.
//!
//! - [`fast`]: the low-latency counter store (in-memory or Redis)
//! - [`store`]: the durable ledger, reservation log and per-user counters
//!   (in-memory or PostgreSQL)
//! - [`StockDeductionManager`]: two-phase deduction and idempotent release
//!   across both ledgers

pub mod error;
pub mod fast;
pub mod manager;
pub mod model;
pub mod store;

pub use error::{InventoryError, Result};
pub use fast::{FastStockLedger, InMemoryFastLedger, RedisFastLedger, ReserveOutcome};
pub use manager::{RewarmConfig, StockDeductionManager};
pub use model::{DeductOutcome, DeductionRequest, ReleaseScope, ReservationEntry, StockItem};
pub use store::{InMemoryStockStore, PostgresStockStore, StockStore};
