use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{CampaignId, ItemId};
use tokio::sync::Mutex;

use super::{FastStockLedger, ReserveOutcome};
use crate::{InventoryError, Result};

/// In-process fast ledger.
///
/// A single mutex makes check-and-decrement atomic across tasks.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFastLedger {
    counters: Arc<Mutex<HashMap<(CampaignId, ItemId), i64>>>,
    fail_on_release: Arc<AtomicBool>,
}

impl InMemoryFastLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `release` call fail.
    pub fn set_fail_on_release(&self, fail: bool) {
        self.fail_on_release.store(fail, Ordering::SeqCst);
    }

    /// Drops every counter, simulating loss of the backing store.
    pub async fn clear(&self) {
        self.counters.lock().await.clear();
    }
}

#[async_trait]
impl FastStockLedger for InMemoryFastLedger {
    async fn prepare(&self, campaign: CampaignId, item: ItemId, quantity: i64) -> Result<()> {
        self.counters.lock().await.insert((campaign, item), quantity);
        Ok(())
    }

    async fn reserve(
        &self,
        campaign: CampaignId,
        item: ItemId,
        quantity: u32,
    ) -> Result<ReserveOutcome> {
        let mut counters = self.counters.lock().await;
        let Some(available) = counters.get_mut(&(campaign, item)) else {
            return Ok(ReserveOutcome::Missing);
        };
        let wanted = i64::from(quantity);
        if *available < wanted {
            return Ok(ReserveOutcome::Insufficient);
        }
        *available -= wanted;
        Ok(ReserveOutcome::Reserved {
            remaining: *available,
        })
    }

    async fn release(&self, campaign: CampaignId, item: ItemId, quantity: u32) -> Result<()> {
        if self.fail_on_release.load(Ordering::SeqCst) {
            return Err(InventoryError::Unavailable(
                "fast ledger release rejected".to_string(),
            ));
        }
        *self
            .counters
            .lock()
            .await
            .entry((campaign, item))
            .or_insert(0) += i64::from(quantity);
        Ok(())
    }

    async fn peek(&self, campaign: CampaignId, item: ItemId) -> Result<Option<i64>> {
        Ok(self.counters.lock().await.get(&(campaign, item)).copied())
    }

    async fn has_any_keys(&self) -> Result<bool> {
        Ok(!self.counters.lock().await.is_empty())
    }
}
