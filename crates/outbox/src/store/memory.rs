use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderCode;
use tokio::sync::Mutex;

use super::OutboxStore;
use crate::message::{FailureUpdate, MessageKind, OutboxMessage, OutboxStatus};
use crate::{OutboxError, Result};

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    rows: BTreeMap<i64, OutboxMessage>,
}

/// In-memory outbox store for tests and single-process runs.
///
/// Clones share the same rows, so an order store can hold one clone and the
/// relay another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOutboxStore {
    state: Arc<Mutex<State>>,
    fail_on_insert: Arc<AtomicBool>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent inserts fail, to exercise transactional rollback.
    pub fn set_fail_on_insert(&self, fail: bool) {
        self.fail_on_insert.store(fail, Ordering::SeqCst);
    }

    /// Total number of rows.
    pub async fn count(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    /// Number of rows currently in `status`.
    pub async fn count_with_status(&self, status: OutboxStatus) -> usize {
        self.state
            .lock()
            .await
            .rows
            .values()
            .filter(|m| m.status == status)
            .count()
    }

    /// Snapshot of every row, ordered by id.
    pub async fn all(&self) -> Vec<OutboxMessage> {
        self.state.lock().await.rows.values().cloned().collect()
    }

    /// Overwrites a row's `updated_at`, e.g. to age a claimed row.
    pub async fn set_updated_at(&self, id: i64, at: DateTime<Utc>) {
        if let Some(row) = self.state.lock().await.rows.get_mut(&id) {
            row.updated_at = at;
        }
    }

    fn select(
        rows: &BTreeMap<i64, OutboxMessage>,
        limit: usize,
        pred: impl Fn(&OutboxMessage) -> bool,
    ) -> Vec<OutboxMessage> {
        rows.values().filter(|m| pred(m)).take(limit).cloned().collect()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn insert(&self, messages: &[OutboxMessage]) -> Result<Vec<i64>> {
        if self.fail_on_insert.load(Ordering::SeqCst) {
            return Err(OutboxError::InvalidRow("injected insert failure".to_string()));
        }

        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            state.next_id += 1;
            let id = state.next_id;
            let mut row = message.clone();
            row.id = id;
            row.status = OutboxStatus::New;
            row.created_at = now;
            row.updated_at = now;
            state.rows.insert(id, row);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn get(&self, id: i64) -> Result<Option<OutboxMessage>> {
        Ok(self.state.lock().await.rows.get(&id).cloned())
    }

    async fn list_for_order(&self, order_code: &OrderCode) -> Result<Vec<OutboxMessage>> {
        let state = self.state.lock().await;
        Ok(Self::select(&state.rows, usize::MAX, |m| {
            m.order_code.as_ref() == Some(order_code)
        }))
    }

    async fn reclaim_stale(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut reclaimed = 0;
        for row in state.rows.values_mut() {
            if row.status == OutboxStatus::Processing && row.updated_at < older_than {
                row.status = OutboxStatus::New;
                row.updated_at = now;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn fetch_new(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let state = self.state.lock().await;
        Ok(Self::select(&state.rows, limit, |m| {
            m.status == OutboxStatus::New
        }))
    }

    async fn fetch_retryable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>> {
        let state = self.state.lock().await;
        Ok(Self::select(&state.rows, limit, |m| {
            m.status == OutboxStatus::Failed && m.next_retry_at.is_some_and(|at| at <= now)
        }))
    }

    async fn claim(&self, id: i64, expected: OutboxStatus) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.rows.get_mut(&id) {
            Some(row) if row.status == expected => {
                row.status = OutboxStatus::Processing;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_sent(&self, id: i64) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.rows.get_mut(&id) {
            Some(row) if row.status.can_mark_sent() => {
                row.status = OutboxStatus::Sent;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(
        &self,
        id: i64,
        expected: OutboxStatus,
        update: FailureUpdate,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.rows.get_mut(&id) {
            Some(row) if row.status == expected => {
                row.status = update.status;
                row.retry_count = update.retry_count;
                row.next_retry_at = Some(update.next_retry_at);
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn kill_pending_coupon(&self, order_code: &OrderCode) -> Result<u64> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut killed = 0;
        for row in state.rows.values_mut() {
            if row.kind == MessageKind::CouponUse
                && row.order_code.as_ref() == Some(order_code)
                && matches!(row.status, OutboxStatus::New | OutboxStatus::Failed)
            {
                row.status = OutboxStatus::Dead;
                row.updated_at = now;
                killed += 1;
            }
        }
        Ok(killed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> OrderCode {
        OrderCode::new("order-1")
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let store = InMemoryOutboxStore::new();
        let ids = store
            .insert(&[
                OutboxMessage::order_delay(&code()),
                OutboxMessage::order_cancelled(&code()),
            ])
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(store.count().await, 2);
        assert_eq!(store.list_for_order(&code()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_injected_insert_failure_writes_nothing() {
        let store = InMemoryOutboxStore::new();
        store.set_fail_on_insert(true);
        assert!(store.insert(&[OutboxMessage::order_delay(&code())]).await.is_err());
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_claim_is_compare_and_set() {
        let store = InMemoryOutboxStore::new();
        let id = store.insert(&[OutboxMessage::order_delay(&code())]).await.unwrap()[0];

        assert!(store.claim(id, OutboxStatus::New).await.unwrap());
        assert!(!store.claim(id, OutboxStatus::New).await.unwrap());
        assert!(store.mark_sent(id).await.unwrap());
        assert!(!store.mark_sent(id).await.unwrap());
        assert!(!store.claim(999, OutboxStatus::New).await.unwrap());
    }

    #[tokio::test]
    async fn test_reclaim_only_touches_stale_processing_rows() {
        let store = InMemoryOutboxStore::new();
        let ids = store
            .insert(&[
                OutboxMessage::order_delay(&code()),
                OutboxMessage::order_delay(&code()),
            ])
            .await
            .unwrap();
        store.claim(ids[0], OutboxStatus::New).await.unwrap();
        store.claim(ids[1], OutboxStatus::New).await.unwrap();
        store
            .set_updated_at(ids[0], Utc::now() - chrono::Duration::seconds(120))
            .await;

        let cutoff = Utc::now() - chrono::Duration::seconds(60);
        assert_eq!(store.reclaim_stale(cutoff).await.unwrap(), 1);
        assert_eq!(store.reclaim_stale(cutoff).await.unwrap(), 0);
        assert_eq!(store.fetch_new(10).await.unwrap()[0].id, ids[0]);
    }

    #[tokio::test]
    async fn test_fetch_retryable_respects_next_retry_at() {
        let store = InMemoryOutboxStore::new();
        let id = store.insert(&[OutboxMessage::order_delay(&code())]).await.unwrap()[0];
        store.claim(id, OutboxStatus::New).await.unwrap();

        let now = Utc::now();
        let update = FailureUpdate {
            retry_count: 1,
            next_retry_at: now + chrono::Duration::seconds(5),
            status: OutboxStatus::Failed,
        };
        assert!(store.mark_failed(id, OutboxStatus::Processing, update).await.unwrap());

        assert!(store.fetch_retryable(now, 10).await.unwrap().is_empty());
        let due = store
            .fetch_retryable(now + chrono::Duration::seconds(5), 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_kill_pending_coupon_spares_other_kinds_and_sent_rows() {
        let store = InMemoryOutboxStore::new();
        let ids = store
            .insert(&[
                OutboxMessage::coupon_use(9, &code()),
                OutboxMessage::order_delay(&code()),
                OutboxMessage::coupon_use(9, &OrderCode::new("other")),
            ])
            .await
            .unwrap();

        assert_eq!(store.kill_pending_coupon(&code()).await.unwrap(), 1);
        assert_eq!(store.get(ids[0]).await.unwrap().unwrap().status, OutboxStatus::Dead);
        assert_eq!(store.get(ids[1]).await.unwrap().unwrap().status, OutboxStatus::New);
        assert_eq!(store.get(ids[2]).await.unwrap().unwrap().status, OutboxStatus::New);
        assert_eq!(store.kill_pending_coupon(&code()).await.unwrap(), 0);
    }
}
