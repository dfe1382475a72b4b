//! Durable stock ledger, reservation log and per-user purchase counters.
//!
//! These three live in one store because a deduction must change all of
//! them in a single transaction.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use common::{CampaignId, ItemId, OrderCode, UserId};

use crate::Result;
use crate::model::{DeductionRequest, ReleaseScope, ReservationEntry, StockItem};

pub use memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;

/// Authoritative, transactional stock storage.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Inserts or replaces a stock row.
    async fn upsert_item(&self, item: StockItem) -> Result<()>;

    /// Loads a stock row.
    async fn get_item(&self, campaign: CampaignId, item: ItemId) -> Result<Option<StockItem>>;

    /// Lists every stock row.
    async fn list_items(&self) -> Result<Vec<StockItem>>;

    /// Looks up the reservation for an (order, item) pair.
    async fn find_reservation(
        &self,
        order_code: &OrderCode,
        item: ItemId,
    ) -> Result<Option<ReservationEntry>>;

    /// Lists the reservations of an order within `scope`, ordered by item.
    async fn list_reservations(
        &self,
        order_code: &OrderCode,
        scope: ReleaseScope,
    ) -> Result<Vec<ReservationEntry>>;

    /// Applies a deduction in one transaction.
    ///
    /// Checks the per-user cap under a row lock, conditionally decrements
    /// the stock row, writes the reservation entry and bumps the counter.
    /// Nothing is changed when any step fails.
    async fn commit_deduction(&self, request: &DeductionRequest) -> Result<ReservationEntry>;

    /// Deletes the reservation for (order, item) and, only if this call
    /// performed the delete, puts the stock back and lowers the counter.
    ///
    /// Returns the removed entry, or `None` if another caller got there first.
    async fn take_reservation(
        &self,
        order_code: &OrderCode,
        item: ItemId,
    ) -> Result<Option<ReservationEntry>>;

    /// Cumulative quantity `user` has bought of (campaign, item).
    async fn purchased(&self, campaign: CampaignId, item: ItemId, user: UserId) -> Result<i64>;
}

#[async_trait]
impl<T: StockStore + ?Sized> StockStore for Arc<T> {
    async fn upsert_item(&self, item: StockItem) -> Result<()> {
        (**self).upsert_item(item).await
    }

    async fn get_item(&self, campaign: CampaignId, item: ItemId) -> Result<Option<StockItem>> {
        (**self).get_item(campaign, item).await
    }

    async fn list_items(&self) -> Result<Vec<StockItem>> {
        (**self).list_items().await
    }

    async fn find_reservation(
        &self,
        order_code: &OrderCode,
        item: ItemId,
    ) -> Result<Option<ReservationEntry>> {
        (**self).find_reservation(order_code, item).await
    }

    async fn list_reservations(
        &self,
        order_code: &OrderCode,
        scope: ReleaseScope,
    ) -> Result<Vec<ReservationEntry>> {
        (**self).list_reservations(order_code, scope).await
    }

    async fn commit_deduction(&self, request: &DeductionRequest) -> Result<ReservationEntry> {
        (**self).commit_deduction(request).await
    }

    async fn take_reservation(
        &self,
        order_code: &OrderCode,
        item: ItemId,
    ) -> Result<Option<ReservationEntry>> {
        (**self).take_reservation(order_code, item).await
    }

    async fn purchased(&self, campaign: CampaignId, item: ItemId, user: UserId) -> Result<i64> {
        (**self).purchased(campaign, item, user).await
    }
}
