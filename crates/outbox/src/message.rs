//! Outbox rows and the message kinds the order flow emits.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{OrderCode, ProductId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{OutboxError, Result};

/// Exchange every order notification is published to.
pub const ORDER_EXCHANGE: &str = "mall.order";

/// Default number of publish attempts before a row is declared dead.
pub const DEFAULT_MAX_RETRY: i32 = 3;

/// Delivery status of an outbox row.
///
/// State transitions:
/// ```text
/// NEW ──► PROCESSING ──┬──► SENT
///  ▲          │        └──► FAILED ──► PROCESSING ...
///  └──────────┘ (reclaim)   └──► DEAD
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OutboxStatus {
    /// Written, never attempted.
    #[default]
    New,

    /// Delivered to the broker (terminal state).
    Sent,

    /// Last attempt failed, waiting for `next_retry_at`.
    Failed,

    /// Retries exhausted or killed (terminal state).
    Dead,

    /// Claimed by a relay instance.
    Processing,
}

impl OutboxStatus {
    /// Persisted `SMALLINT` code.
    pub fn code(&self) -> i16 {
        match self {
            OutboxStatus::New => 0,
            OutboxStatus::Sent => 1,
            OutboxStatus::Failed => 2,
            OutboxStatus::Dead => 3,
            OutboxStatus::Processing => 9,
        }
    }

    /// Parses a persisted code.
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(OutboxStatus::New),
            1 => Some(OutboxStatus::Sent),
            2 => Some(OutboxStatus::Failed),
            3 => Some(OutboxStatus::Dead),
            9 => Some(OutboxStatus::Processing),
            _ => None,
        }
    }

    /// Returns true if a relay may claim a row in this status.
    pub fn can_claim(&self) -> bool {
        matches!(self, OutboxStatus::New | OutboxStatus::Failed)
    }

    /// Returns true if a row in this status may be marked sent.
    pub fn can_mark_sent(&self) -> bool {
        matches!(
            self,
            OutboxStatus::New | OutboxStatus::Failed | OutboxStatus::Processing
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Sent | OutboxStatus::Dead)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::New => "NEW",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
            OutboxStatus::Dead => "DEAD",
            OutboxStatus::Processing => "PROCESSING",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The kind of notification an outbox row carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Marks a user coupon as consumed by an order.
    CouponUse,
    /// Announces a freshly assembled order.
    OrderCreated,
    /// Delayed check that cancels the order if still unpaid.
    OrderDelay,
    /// Announces a cancellation so stock can be returned.
    OrderCancelled,
    /// A queued flash-sale purchase waiting to become an order.
    FlashSaleOrder,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::CouponUse => "coupon-use",
            MessageKind::OrderCreated => "order-created",
            MessageKind::OrderDelay => "order-delay",
            MessageKind::OrderCancelled => "order-cancelled",
            MessageKind::FlashSaleOrder => "flash-sale-order",
        }
    }

    pub fn routing_key(&self) -> &'static str {
        match self {
            MessageKind::CouponUse => "coupon.use",
            MessageKind::OrderCreated => "order.created",
            MessageKind::OrderDelay => "order.delay",
            MessageKind::OrderCancelled => "order.cancelled",
            MessageKind::FlashSaleOrder => "flash.sale",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "coupon-use" => Some(MessageKind::CouponUse),
            "order-created" => Some(MessageKind::OrderCreated),
            "order-delay" => Some(MessageKind::OrderDelay),
            "order-cancelled" => Some(MessageKind::OrderCancelled),
            "flash-sale-order" => Some(MessageKind::FlashSaleOrder),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of the outbox table.
///
/// `id` is assigned by the store on insert; rows built by the constructors
/// below carry `0` until then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
    pub id: i64,
    pub message_id: Uuid,
    pub kind: MessageKind,
    pub order_code: Option<OrderCode>,
    pub payload: String,
    pub exchange: String,
    pub routing_key: String,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub max_retry: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxMessage {
    /// Builds a `NEW` row for `kind`, routed to the order exchange.
    pub fn new(kind: MessageKind, order_code: Option<OrderCode>, payload: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            message_id: Uuid::new_v4(),
            kind,
            order_code,
            payload,
            exchange: ORDER_EXCHANGE.to_string(),
            routing_key: kind.routing_key().to_string(),
            status: OutboxStatus::New,
            retry_count: 0,
            max_retry: DEFAULT_MAX_RETRY,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `{"userCouponId": .., "orderSn": ..}`
    pub fn coupon_use(user_coupon_id: i64, order_code: &OrderCode) -> Self {
        let payload = json!({
            "userCouponId": user_coupon_id,
            "orderSn": order_code.as_str(),
        });
        Self::new(
            MessageKind::CouponUse,
            Some(order_code.clone()),
            payload.to_string(),
        )
    }

    /// `{"orderId": .., "orderSn": .., "productIds": [..]}`
    pub fn order_created(order_id: i64, order_code: &OrderCode, products: &[ProductId]) -> Self {
        let product_ids: Vec<i64> = products.iter().map(|p| p.get()).collect();
        let payload = json!({
            "orderId": order_id,
            "orderSn": order_code.as_str(),
            "productIds": product_ids,
        });
        Self::new(
            MessageKind::OrderCreated,
            Some(order_code.clone()),
            payload.to_string(),
        )
    }

    pub fn order_delay(order_code: &OrderCode) -> Self {
        Self::new(
            MessageKind::OrderDelay,
            Some(order_code.clone()),
            json!(order_code.as_str()).to_string(),
        )
    }

    pub fn order_cancelled(order_code: &OrderCode) -> Self {
        Self::new(
            MessageKind::OrderCancelled,
            Some(order_code.clone()),
            json!(order_code.as_str()).to_string(),
        )
    }

    /// A queued flash-sale purchase; `payload` is its JSON body.
    pub fn flash_sale_order(order_code: &OrderCode, payload: String) -> Self {
        Self::new(MessageKind::FlashSaleOrder, Some(order_code.clone()), payload)
    }

    /// Decodes the order code carried by `order-delay` and `order-cancelled`
    /// payloads.
    pub fn decode_order_code(payload: &[u8]) -> Result<OrderCode> {
        let code: String = serde_json::from_slice(payload)?;
        if code.is_empty() {
            return Err(OutboxError::Rejected("empty order code".to_string()));
        }
        Ok(OrderCode::new(code))
    }

    /// Computes the bookkeeping for a failed attempt.
    ///
    /// The delay doubles with each retry: `base * 2^retry_count`.
    pub fn next_failure(&self, base: Duration, now: DateTime<Utc>) -> FailureUpdate {
        let next = self.retry_count + 1;
        let shift = self.retry_count.clamp(0, 16) as u32;
        let delay = base.saturating_mul(1u32 << shift);
        let next_retry_at = now
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(1));
        let status = if next >= self.max_retry {
            OutboxStatus::Dead
        } else {
            OutboxStatus::Failed
        };
        FailureUpdate {
            retry_count: next,
            next_retry_at,
            status,
        }
    }
}

/// New retry bookkeeping applied by [`crate::OutboxStore::mark_failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureUpdate {
    pub retry_count: i32,
    pub next_retry_at: DateTime<Utc>,
    pub status: OutboxStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip() {
        for status in [
            OutboxStatus::New,
            OutboxStatus::Sent,
            OutboxStatus::Failed,
            OutboxStatus::Dead,
            OutboxStatus::Processing,
        ] {
            assert_eq!(OutboxStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(OutboxStatus::Processing.code(), 9);
        assert_eq!(OutboxStatus::from_code(4), None);
    }

    #[test]
    fn test_claimable_states() {
        assert!(OutboxStatus::New.can_claim());
        assert!(OutboxStatus::Failed.can_claim());
        assert!(!OutboxStatus::Processing.can_claim());
        assert!(!OutboxStatus::Sent.can_claim());
        assert!(!OutboxStatus::Dead.can_claim());
    }

    #[test]
    fn test_terminal_states() {
        assert!(OutboxStatus::Sent.is_terminal());
        assert!(OutboxStatus::Dead.is_terminal());
        assert!(!OutboxStatus::New.is_terminal());
        assert!(!OutboxStatus::Failed.is_terminal());
        assert!(!OutboxStatus::Processing.is_terminal());
    }

    #[test]
    fn test_kind_routing() {
        assert_eq!(MessageKind::CouponUse.routing_key(), "coupon.use");
        assert_eq!(MessageKind::OrderCreated.routing_key(), "order.created");
        assert_eq!(MessageKind::OrderDelay.routing_key(), "order.delay");
        assert_eq!(MessageKind::OrderCancelled.routing_key(), "order.cancelled");
        assert_eq!(MessageKind::FlashSaleOrder.routing_key(), "flash.sale");
        assert_eq!(
            MessageKind::parse("flash-sale-order"),
            Some(MessageKind::FlashSaleOrder)
        );
        assert_eq!(MessageKind::parse("order-delay"), Some(MessageKind::OrderDelay));
        assert_eq!(MessageKind::parse("bogus"), None);
    }

    #[test]
    fn test_coupon_use_payload() {
        let code = OrderCode::new("abc");
        let msg = OutboxMessage::coupon_use(42, &code);
        let value: serde_json::Value = serde_json::from_str(&msg.payload).unwrap();
        assert_eq!(value["userCouponId"], 42);
        assert_eq!(value["orderSn"], "abc");
        assert_eq!(msg.exchange, ORDER_EXCHANGE);
        assert_eq!(msg.status, OutboxStatus::New);
        assert_eq!(msg.max_retry, 3);
    }

    #[test]
    fn test_order_created_payload() {
        let code = OrderCode::new("abc");
        let msg = OutboxMessage::order_created(7, &code, &[ProductId::new(1), ProductId::new(2)]);
        let value: serde_json::Value = serde_json::from_str(&msg.payload).unwrap();
        assert_eq!(value["orderId"], 7);
        assert_eq!(value["productIds"], json!([1, 2]));
    }

    #[test]
    fn test_order_delay_payload_is_json_string() {
        let code = OrderCode::new("abc");
        let msg = OutboxMessage::order_delay(&code);
        assert_eq!(msg.payload, "\"abc\"");
        assert_eq!(
            OutboxMessage::decode_order_code(msg.payload.as_bytes()).unwrap(),
            code
        );
        assert!(OutboxMessage::decode_order_code(b"\"\"").is_err());
        assert!(OutboxMessage::decode_order_code(b"{}").is_err());
    }

    #[test]
    fn test_backoff_doubles_and_dies_at_max_retry() {
        let now = Utc::now();
        let base = Duration::from_secs(5);
        let mut msg = OutboxMessage::order_delay(&OrderCode::new("x"));

        let first = msg.next_failure(base, now);
        assert_eq!(first.retry_count, 1);
        assert_eq!(first.status, OutboxStatus::Failed);
        assert_eq!(first.next_retry_at - now, chrono::Duration::seconds(5));

        msg.retry_count = 1;
        let second = msg.next_failure(base, now);
        assert_eq!(second.status, OutboxStatus::Failed);
        assert_eq!(second.next_retry_at - now, chrono::Duration::seconds(10));

        msg.retry_count = 2;
        let third = msg.next_failure(base, now);
        assert_eq!(third.retry_count, 3);
        assert_eq!(third.status, OutboxStatus::Dead);
    }
}
