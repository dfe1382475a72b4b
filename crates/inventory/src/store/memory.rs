use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{CampaignId, ItemId, OrderCode, UserId};
use tokio::sync::Mutex;

use super::StockStore;
use crate::model::{DeductionRequest, ReleaseScope, ReservationEntry, StockItem};
use crate::{InventoryError, Result};

#[derive(Debug, Default)]
struct InMemoryStockState {
    items: HashMap<(CampaignId, ItemId), StockItem>,
    reservations: HashMap<(OrderCode, ItemId), ReservationEntry>,
    counters: HashMap<(CampaignId, ItemId, UserId), i64>,
}

/// In-memory stock store for testing.
///
/// One mutex stands in for the database's transactions and row locks:
/// every operation runs to completion before the next one starts.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockStore {
    state: Arc<Mutex<InMemoryStockState>>,
    fail_on_commit: Arc<AtomicBool>,
}

impl InMemoryStockStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `commit_deduction` fail before changing anything.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.fail_on_commit.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of reservation log entries.
    pub async fn reservation_count(&self) -> usize {
        self.state.lock().await.reservations.len()
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn upsert_item(&self, item: StockItem) -> Result<()> {
        self.state
            .lock()
            .await
            .items
            .insert((item.campaign, item.item), item);
        Ok(())
    }

    async fn get_item(&self, campaign: CampaignId, item: ItemId) -> Result<Option<StockItem>> {
        Ok(self.state.lock().await.items.get(&(campaign, item)).cloned())
    }

    async fn list_items(&self) -> Result<Vec<StockItem>> {
        let state = self.state.lock().await;
        let mut items: Vec<StockItem> = state.items.values().cloned().collect();
        items.sort_by_key(|i| (i.campaign, i.item));
        Ok(items)
    }

    async fn find_reservation(
        &self,
        order_code: &OrderCode,
        item: ItemId,
    ) -> Result<Option<ReservationEntry>> {
        Ok(self
            .state
            .lock()
            .await
            .reservations
            .get(&(order_code.clone(), item))
            .cloned())
    }

    async fn list_reservations(
        &self,
        order_code: &OrderCode,
        scope: ReleaseScope,
    ) -> Result<Vec<ReservationEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<ReservationEntry> = state
            .reservations
            .values()
            .filter(|e| &e.order_code == order_code && scope.includes(e.campaign))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.item);
        Ok(entries)
    }

    async fn commit_deduction(&self, request: &DeductionRequest) -> Result<ReservationEntry> {
        if self.fail_on_commit.load(Ordering::SeqCst) {
            return Err(InventoryError::Unavailable(
                "durable ledger rejected the transaction".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        let key = (request.campaign, request.item);
        let quantity = i64::from(request.quantity);

        let item = state
            .items
            .get(&key)
            .cloned()
            .ok_or(InventoryError::ItemNotFound {
                campaign: request.campaign,
                item: request.item,
            })?;

        let counter_key = (request.campaign, request.item, request.user);
        let purchased = state.counters.get(&counter_key).copied().unwrap_or(0);
        if let Some(limit) = item.per_user_limit
            && purchased + quantity > limit
        {
            return Err(InventoryError::LimitExceeded {
                user: request.user,
                item: request.item,
                purchased,
                limit,
            });
        }

        if item.stock < quantity {
            return Err(InventoryError::InsufficientStock {
                campaign: request.campaign,
                item: request.item,
                requested: request.quantity,
            });
        }

        let log_key = (request.order_code.clone(), request.item);
        if state.reservations.contains_key(&log_key) {
            return Err(InventoryError::DuplicateReservation {
                order_code: request.order_code.clone(),
                item: request.item,
            });
        }

        if let Some(row) = state.items.get_mut(&key) {
            row.stock -= quantity;
            row.sold += quantity;
        }
        let entry = ReservationEntry::from_request(request);
        state.reservations.insert(log_key, entry.clone());
        // Capped regular items count too, otherwise their cap never binds.
        if !request.campaign.is_regular() || item.per_user_limit.is_some() {
            *state.counters.entry(counter_key).or_insert(0) += quantity;
        }

        Ok(entry)
    }

    async fn take_reservation(
        &self,
        order_code: &OrderCode,
        item: ItemId,
    ) -> Result<Option<ReservationEntry>> {
        let mut state = self.state.lock().await;
        let Some(entry) = state.reservations.remove(&(order_code.clone(), item)) else {
            return Ok(None);
        };

        let quantity = i64::from(entry.quantity);
        if let Some(row) = state.items.get_mut(&(entry.campaign, entry.item)) {
            row.stock += quantity;
            row.sold = (row.sold - quantity).max(0);
        }
        if let Some(purchased) = state
            .counters
            .get_mut(&(entry.campaign, entry.item, entry.user))
        {
            *purchased = (*purchased - quantity).max(0);
        }

        Ok(Some(entry))
    }

    async fn purchased(&self, campaign: CampaignId, item: ItemId, user: UserId) -> Result<i64> {
        Ok(self
            .state
            .lock()
            .await
            .counters
            .get(&(campaign, item, user))
            .copied()
            .unwrap_or(0))
    }
}
