//! Fast stock ledger: the low-latency first line of defense against overselling.
//!
//! The fast ledger is a hint, not the authority. It holds a pre-warmed
//! available quantity per (campaign, item) and offers a single atomic
//! check-and-decrement. The durable ledger has the final word.

pub mod memory;
pub mod redis_ledger;

use std::sync::Arc;

use async_trait::async_trait;
use common::{CampaignId, ItemId};

use crate::Result;

pub use memory::InMemoryFastLedger;
pub use redis_ledger::RedisFastLedger;

/// Result of an atomic reserve attempt on the fast ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// The quantity was taken; `remaining` units are left.
    Reserved { remaining: i64 },
    /// Fewer units than requested are available. Nothing was taken.
    Insufficient,
    /// The ledger has no entry for this (campaign, item).
    Missing,
}

/// Capability over a keyed counter store.
#[async_trait]
pub trait FastStockLedger: Send + Sync {
    /// Sets the available quantity, overwriting any current value.
    async fn prepare(&self, campaign: CampaignId, item: ItemId, quantity: i64) -> Result<()>;

    /// Atomically takes `quantity` units if at least that many are available.
    async fn reserve(
        &self,
        campaign: CampaignId,
        item: ItemId,
        quantity: u32,
    ) -> Result<ReserveOutcome>;

    /// Gives `quantity` units back.
    async fn release(&self, campaign: CampaignId, item: ItemId, quantity: u32) -> Result<()>;

    /// Reads the current available quantity.
    async fn peek(&self, campaign: CampaignId, item: ItemId) -> Result<Option<i64>>;

    /// Returns true if the ledger holds at least one stock entry.
    async fn has_any_keys(&self) -> Result<bool>;
}

#[async_trait]
impl<T: FastStockLedger + ?Sized> FastStockLedger for Arc<T> {
    async fn prepare(&self, campaign: CampaignId, item: ItemId, quantity: i64) -> Result<()> {
        (**self).prepare(campaign, item, quantity).await
    }

    async fn reserve(
        &self,
        campaign: CampaignId,
        item: ItemId,
        quantity: u32,
    ) -> Result<ReserveOutcome> {
        (**self).reserve(campaign, item, quantity).await
    }

    async fn release(&self, campaign: CampaignId, item: ItemId, quantity: u32) -> Result<()> {
        (**self).release(campaign, item, quantity).await
    }

    async fn peek(&self, campaign: CampaignId, item: ItemId) -> Result<Option<i64>> {
        (**self).peek(campaign, item).await
    }

    async fn has_any_keys(&self) -> Result<bool> {
        (**self).has_any_keys().await
    }
}

/// Key under which a (campaign, item) counter is stored.
pub fn stock_key(campaign: CampaignId, item: ItemId) -> String {
    format!("{STOCK_KEY_PREFIX}{campaign}:{item}")
}

pub(crate) const STOCK_KEY_PREFIX: &str = "flash_sale:stock:";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_key_format() {
        assert_eq!(
            stock_key(CampaignId::new(12), ItemId::new(345)),
            "flash_sale:stock:12:345"
        );
    }
}
