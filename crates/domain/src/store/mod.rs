//! Order persistence.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderCode, UserId};
use outbox::OutboxMessage;

use crate::Result;
use crate::order::{AssembledOrder, Order, OrderDraft, OrderLineItem, OrderShipment};

pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;

/// Storage for orders and their snapshots.
///
/// Transitions return `false` when the order was not in the expected status;
/// that is a no-op, not an error.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a `CREATING` skeleton and returns it with its id.
    async fn create_skeleton(&self, draft: &OrderDraft) -> Result<Order>;

    async fn find_by_code(&self, code: &OrderCode) -> Result<Option<Order>>;

    /// The user's newest `CREATING` order created after `since`, if any.
    async fn find_recent_creating(
        &self,
        user: UserId,
        since: DateTime<Utc>,
    ) -> Result<Option<Order>>;

    /// `CREATING → PENDING_PAYMENT` with final amounts, line items, shipment
    /// and the coupon-use, order-created and order-delay outbox rows, all in
    /// one transaction.
    async fn complete_assembly(&self, code: &OrderCode, assembled: &AssembledOrder)
    -> Result<bool>;

    /// `CREATING → CREATE_FAILED`; the reason is truncated to 500 chars.
    async fn mark_failed(&self, code: &OrderCode, reason: &str) -> Result<bool>;

    /// `CREATING` orders created before `before`, oldest first.
    async fn find_stale_creating(&self, before: DateTime<Utc>, limit: usize)
    -> Result<Vec<Order>>;

    /// `PENDING_PAYMENT → CANCELLED`, killing undelivered coupon-use rows and
    /// writing an order-cancelled row in the same transaction.
    async fn cancel(&self, code: &OrderCode) -> Result<bool>;

    /// `PENDING_PAYMENT → PROCESSING`, recording `paid_at`.
    async fn mark_paid(&self, code: &OrderCode, paid_at: DateTime<Utc>) -> Result<bool>;

    async fn line_items(&self, code: &OrderCode) -> Result<Vec<OrderLineItem>>;

    async fn shipment(&self, code: &OrderCode) -> Result<Option<OrderShipment>>;
}

#[async_trait]
impl<T: OrderStore + ?Sized> OrderStore for Arc<T> {
    async fn create_skeleton(&self, draft: &OrderDraft) -> Result<Order> {
        (**self).create_skeleton(draft).await
    }

    async fn find_by_code(&self, code: &OrderCode) -> Result<Option<Order>> {
        (**self).find_by_code(code).await
    }

    async fn find_recent_creating(
        &self,
        user: UserId,
        since: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        (**self).find_recent_creating(user, since).await
    }

    async fn complete_assembly(
        &self,
        code: &OrderCode,
        assembled: &AssembledOrder,
    ) -> Result<bool> {
        (**self).complete_assembly(code, assembled).await
    }

    async fn mark_failed(&self, code: &OrderCode, reason: &str) -> Result<bool> {
        (**self).mark_failed(code, reason).await
    }

    async fn find_stale_creating(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>> {
        (**self).find_stale_creating(before, limit).await
    }

    async fn cancel(&self, code: &OrderCode) -> Result<bool> {
        (**self).cancel(code).await
    }

    async fn mark_paid(&self, code: &OrderCode, paid_at: DateTime<Utc>) -> Result<bool> {
        (**self).mark_paid(code, paid_at).await
    }

    async fn line_items(&self, code: &OrderCode) -> Result<Vec<OrderLineItem>> {
        (**self).line_items(code).await
    }

    async fn shipment(&self, code: &OrderCode) -> Result<Option<OrderShipment>> {
        (**self).shipment(code).await
    }
}

/// Outbox rows written when assembly completes.
pub(crate) fn assembly_messages(order: &Order, assembled: &AssembledOrder) -> Vec<OutboxMessage> {
    let mut messages = Vec::with_capacity(3);
    if let Some(coupon) = order.user_coupon_id {
        messages.push(OutboxMessage::coupon_use(coupon, &order.code));
    }
    messages.push(OutboxMessage::order_created(
        order.id,
        &order.code,
        &assembled.product_ids(),
    ));
    messages.push(OutboxMessage::order_delay(&order.code));
    messages
}
