use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderCode, UserId};
use outbox::{InMemoryOutboxStore, OutboxMessage, OutboxStore};
use tokio::sync::Mutex;

use super::{OrderStore, assembly_messages};
use crate::order::{
    AssembledOrder, Order, OrderDraft, OrderLineItem, OrderShipment, OrderStatus, truncate_reason,
};
use crate::{DomainError, Result};

#[derive(Debug, Default)]
struct InMemoryOrderState {
    next_id: i64,
    orders: HashMap<OrderCode, Order>,
    lines: HashMap<OrderCode, Vec<OrderLineItem>>,
    shipments: HashMap<OrderCode, OrderShipment>,
}

/// In-memory order store for testing.
///
/// Holds a clone of an [`InMemoryOutboxStore`] so outbox rows land next to
/// the order change. The order mutex is held across the outbox write, and
/// nothing is changed if that write fails.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<Mutex<InMemoryOrderState>>,
    outbox: InMemoryOutboxStore,
    fail_on_complete: Arc<AtomicBool>,
}

impl InMemoryOrderStore {
    /// Creates an empty store writing to its own outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store writing to `outbox`.
    pub fn with_outbox(outbox: InMemoryOutboxStore) -> Self {
        Self {
            outbox,
            ..Self::default()
        }
    }

    /// The outbox this store writes to.
    pub fn outbox(&self) -> &InMemoryOutboxStore {
        &self.outbox
    }

    /// Makes every subsequent `complete_assembly` fail before changing anything.
    pub fn set_fail_on_complete(&self, fail: bool) {
        self.fail_on_complete.store(fail, Ordering::SeqCst);
    }

    /// Backdates an order, e.g. to make it stale for the sweeper.
    pub async fn set_created_at(&self, code: &OrderCode, at: DateTime<Utc>) {
        if let Some(order) = self.state.lock().await.orders.get_mut(code) {
            order.created_at = at;
        }
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    async fn transition(
        &self,
        code: &OrderCode,
        expected: OrderStatus,
        apply: impl FnOnce(&mut Order) + Send,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.orders.get_mut(code) {
            Some(order) if order.status == expected => {
                apply(order);
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_skeleton(&self, draft: &OrderDraft) -> Result<Order> {
        let mut state = self.state.lock().await;
        if state.orders.contains_key(&draft.code) {
            return Err(DomainError::DuplicateOrderCode(draft.code.clone()));
        }
        state.next_id += 1;
        let mut order = Order::skeleton(draft);
        order.id = state.next_id;
        state.orders.insert(order.code.clone(), order.clone());
        Ok(order)
    }

    async fn find_by_code(&self, code: &OrderCode) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.get(code).cloned())
    }

    async fn find_recent_creating(
        &self,
        user: UserId,
        since: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.user == user && o.status == OrderStatus::Creating && o.created_at >= since)
            .max_by_key(|o| (o.created_at, o.id))
            .cloned())
    }

    async fn complete_assembly(
        &self,
        code: &OrderCode,
        assembled: &AssembledOrder,
    ) -> Result<bool> {
        if self.fail_on_complete.load(Ordering::SeqCst) {
            return Err(DomainError::Unavailable(
                "injected complete_assembly failure".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        let Some(order) = state.orders.get(code) else {
            return Ok(false);
        };
        if !order.status.can_finish_assembly() {
            return Ok(false);
        }

        let mut updated = order.clone();
        updated.apply_amounts(&assembled.amounts);
        updated.status = OrderStatus::PendingPayment;
        updated.updated_at = Utc::now();

        self.outbox
            .insert(&assembly_messages(&updated, assembled))
            .await?;

        state.orders.insert(code.clone(), updated);
        state.lines.insert(code.clone(), assembled.lines.clone());
        state
            .shipments
            .insert(code.clone(), assembled.shipment.clone());
        Ok(true)
    }

    async fn mark_failed(&self, code: &OrderCode, reason: &str) -> Result<bool> {
        let reason = truncate_reason(reason);
        self.transition(code, OrderStatus::Creating, move |order| {
            order.status = OrderStatus::CreateFailed;
            order.fail_reason = Some(reason);
        })
        .await
    }

    async fn find_stale_creating(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        let mut stale: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Creating && o.created_at < before)
            .cloned()
            .collect();
        stale.sort_by_key(|o| (o.created_at, o.id));
        stale.truncate(limit);
        Ok(stale)
    }

    async fn cancel(&self, code: &OrderCode) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(order) = state.orders.get_mut(code) else {
            return Ok(false);
        };
        if !order.status.can_cancel() {
            return Ok(false);
        }

        self.outbox
            .insert(&[OutboxMessage::order_cancelled(code)])
            .await?;
        self.outbox.kill_pending_coupon(code).await?;

        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_paid(&self, code: &OrderCode, paid_at: DateTime<Utc>) -> Result<bool> {
        self.transition(code, OrderStatus::PendingPayment, move |order| {
            order.status = OrderStatus::Processing;
            order.paid_at = Some(paid_at);
        })
        .await
    }

    async fn line_items(&self, code: &OrderCode) -> Result<Vec<OrderLineItem>> {
        Ok(self
            .state
            .lock()
            .await
            .lines
            .get(code)
            .cloned()
            .unwrap_or_default())
    }

    async fn shipment(&self, code: &OrderCode) -> Result<Option<OrderShipment>> {
        Ok(self.state.lock().await.shipments.get(code).cloned())
    }
}
