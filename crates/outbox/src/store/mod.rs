//! Outbox persistence.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderCode;

use crate::Result;
use crate::message::{FailureUpdate, OutboxMessage, OutboxStatus};

pub use memory::InMemoryOutboxStore;
pub use postgres::PostgresOutboxStore;

/// Storage for outbox rows.
///
/// Every status change is a compare-and-set: the methods returning `bool`
/// report whether the row was in the expected state and got updated.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Inserts rows as `NEW` and returns their ids in order.
    async fn insert(&self, messages: &[OutboxMessage]) -> Result<Vec<i64>>;

    /// Loads a single row.
    async fn get(&self, id: i64) -> Result<Option<OutboxMessage>>;

    /// Lists every row written for an order, ordered by id.
    async fn list_for_order(&self, order_code: &OrderCode) -> Result<Vec<OutboxMessage>>;

    /// Returns `PROCESSING` rows last touched before `older_than` to `NEW`.
    async fn reclaim_stale(&self, older_than: DateTime<Utc>) -> Result<u64>;

    /// Oldest `NEW` rows first.
    async fn fetch_new(&self, limit: usize) -> Result<Vec<OutboxMessage>>;

    /// `FAILED` rows whose retry time has come, oldest first.
    async fn fetch_retryable(&self, now: DateTime<Utc>, limit: usize)
    -> Result<Vec<OutboxMessage>>;

    /// Moves a row from `expected` to `PROCESSING`.
    async fn claim(&self, id: i64, expected: OutboxStatus) -> Result<bool>;

    /// Moves a row from `NEW`, `FAILED` or `PROCESSING` to `SENT`.
    async fn mark_sent(&self, id: i64) -> Result<bool>;

    /// Applies retry bookkeeping to a row still in `expected`.
    async fn mark_failed(&self, id: i64, expected: OutboxStatus, update: FailureUpdate)
    -> Result<bool>;

    /// Marks the order's undelivered coupon-use rows `DEAD`.
    async fn kill_pending_coupon(&self, order_code: &OrderCode) -> Result<u64>;
}

#[async_trait]
impl<T: OutboxStore + ?Sized> OutboxStore for Arc<T> {
    async fn insert(&self, messages: &[OutboxMessage]) -> Result<Vec<i64>> {
        (**self).insert(messages).await
    }

    async fn get(&self, id: i64) -> Result<Option<OutboxMessage>> {
        (**self).get(id).await
    }

    async fn list_for_order(&self, order_code: &OrderCode) -> Result<Vec<OutboxMessage>> {
        (**self).list_for_order(order_code).await
    }

    async fn reclaim_stale(&self, older_than: DateTime<Utc>) -> Result<u64> {
        (**self).reclaim_stale(older_than).await
    }

    async fn fetch_new(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        (**self).fetch_new(limit).await
    }

    async fn fetch_retryable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>> {
        (**self).fetch_retryable(now, limit).await
    }

    async fn claim(&self, id: i64, expected: OutboxStatus) -> Result<bool> {
        (**self).claim(id, expected).await
    }

    async fn mark_sent(&self, id: i64) -> Result<bool> {
        (**self).mark_sent(id).await
    }

    async fn mark_failed(
        &self,
        id: i64,
        expected: OutboxStatus,
        update: FailureUpdate,
    ) -> Result<bool> {
        (**self).mark_failed(id, expected, update).await
    }

    async fn kill_pending_coupon(&self, order_code: &OrderCode) -> Result<u64> {
        (**self).kill_pending_coupon(order_code).await
    }
}
