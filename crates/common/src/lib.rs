//! Shared types for the limited-stock purchase pipeline.

pub mod error;
pub mod money;
pub mod types;

pub use error::ErrorKind;
pub use money::Money;
pub use types::{CampaignId, ItemId, OrderCode, ProductId, UserId};
