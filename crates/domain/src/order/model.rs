//! Order records and their snapshots.

use chrono::{DateTime, Utc};
use common::{CampaignId, ItemId, Money, OrderCode, ProductId, UserId};
use serde::{Deserialize, Serialize};

use super::OrderStatus;
use super::amounts::OrderAmounts;

/// Longest failure reason stored on an order, in characters.
pub const MAX_FAIL_REASON_CHARS: usize = 500;

/// Truncates a failure reason to [`MAX_FAIL_REASON_CHARS`] characters.
pub fn truncate_reason(reason: &str) -> String {
    reason.chars().take(MAX_FAIL_REASON_CHARS).collect()
}

/// How the parcel reaches the buyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShippingMethod {
    #[default]
    HomeDelivery,
    ConvenienceStore,
}

impl ShippingMethod {
    pub fn code(&self) -> i16 {
        match self {
            ShippingMethod::HomeDelivery => 1,
            ShippingMethod::ConvenienceStore => 2,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(ShippingMethod::HomeDelivery),
            2 => Some(ShippingMethod::ConvenienceStore),
            _ => None,
        }
    }
}

/// How the buyer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    #[default]
    BankTransfer,
    CashOnDelivery,
}

impl PaymentType {
    pub fn code(&self) -> i16 {
        match self {
            PaymentType::BankTransfer => 1,
            PaymentType::CashOnDelivery => 2,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(PaymentType::BankTransfer),
            2 => Some(PaymentType::CashOnDelivery),
            _ => None,
        }
    }
}

/// An order header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub code: OrderCode,
    pub user: UserId,
    pub total_amount: Money,
    pub discount_amount: Money,
    pub shipping_fee: Money,
    pub pay_amount: Money,
    pub status: OrderStatus,
    pub payment_type: PaymentType,
    pub shipping_method: ShippingMethod,
    pub user_coupon_id: Option<i64>,
    pub note: Option<String>,
    pub fail_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds the `CREATING` skeleton described by `draft`.
    ///
    /// `id` is assigned by the store.
    pub fn skeleton(draft: &OrderDraft) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            code: draft.code.clone(),
            user: draft.user,
            total_amount: draft.estimated_total,
            discount_amount: Money::zero(),
            shipping_fee: Money::zero(),
            pay_amount: draft.estimated_total,
            status: OrderStatus::Creating,
            payment_type: draft.payment_type,
            shipping_method: draft.shipping_method,
            user_coupon_id: draft.user_coupon_id,
            note: draft.note.clone(),
            fail_reason: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrites the provisional amounts with the assembled ones.
    pub fn apply_amounts(&mut self, amounts: &OrderAmounts) {
        self.total_amount = amounts.total;
        self.discount_amount = amounts.discount;
        self.shipping_fee = amounts.shipping_fee;
        self.pay_amount = amounts.pay;
    }
}

/// What checkout knows when it writes the skeleton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    pub code: OrderCode,
    pub user: UserId,
    /// Snapshot price times quantity; no shipping, no discounts.
    pub estimated_total: Money,
    pub payment_type: PaymentType,
    pub shipping_method: ShippingMethod,
    pub user_coupon_id: Option<i64>,
    pub note: Option<String>,
}

/// One purchased line, frozen at assembly time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineItem {
    pub product: ProductId,
    pub item: ItemId,
    pub product_name: String,
    pub original_price: Money,
    pub final_price: Money,
    pub quantity: u32,
    /// Set when the line was bought under a flash-sale campaign.
    pub campaign: Option<CampaignId>,
}

impl OrderLineItem {
    pub fn line_total(&self) -> Money {
        self.final_price.multiply(self.quantity)
    }

    /// What the promotion took off this line; never negative.
    pub fn promotion_discount(&self) -> Money {
        (self.original_price - self.final_price)
            .non_negative()
            .multiply(self.quantity)
    }
}

/// Delivery details, frozen at assembly time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderShipment {
    pub shipping_method: ShippingMethod,
    pub receiver_name: String,
    pub receiver_phone: String,
    pub receiver_address: String,
}

/// Everything `complete_assembly` writes besides the status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledOrder {
    pub amounts: OrderAmounts,
    pub lines: Vec<OrderLineItem>,
    pub shipment: OrderShipment,
}

impl AssembledOrder {
    /// Distinct products in line order, for the order-created notification.
    pub fn product_ids(&self) -> Vec<ProductId> {
        let mut ids: Vec<ProductId> = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            if !ids.contains(&line.product) {
                ids.push(line.product);
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(original: i64, final_price: i64, qty: u32) -> OrderLineItem {
        OrderLineItem {
            product: ProductId::new(1),
            item: ItemId::new(10),
            product_name: "Widget".to_string(),
            original_price: Money::from_cents(original),
            final_price: Money::from_cents(final_price),
            quantity: qty,
            campaign: None,
        }
    }

    #[test]
    fn test_truncate_reason_counts_chars() {
        let long = "é".repeat(600);
        let truncated = truncate_reason(&long);
        assert_eq!(truncated.chars().count(), 500);
        assert_eq!(truncate_reason("short"), "short");
    }

    #[test]
    fn test_codes_round_trip() {
        for method in [ShippingMethod::HomeDelivery, ShippingMethod::ConvenienceStore] {
            assert_eq!(ShippingMethod::from_code(method.code()), Some(method));
        }
        for payment in [PaymentType::BankTransfer, PaymentType::CashOnDelivery] {
            assert_eq!(PaymentType::from_code(payment.code()), Some(payment));
        }
        assert_eq!(ShippingMethod::from_code(0), None);
    }

    #[test]
    fn test_line_totals() {
        let l = line(1200, 1000, 3);
        assert_eq!(l.line_total(), Money::from_cents(3000));
        assert_eq!(l.promotion_discount(), Money::from_cents(600));

        // A final price above the original is not a negative discount.
        assert_eq!(line(900, 1000, 2).promotion_discount(), Money::zero());
    }

    #[test]
    fn test_skeleton_is_creating_with_estimate() {
        let draft = OrderDraft {
            code: OrderCode::new("abc"),
            user: UserId::new(1),
            estimated_total: Money::from_cents(5000),
            payment_type: PaymentType::BankTransfer,
            shipping_method: ShippingMethod::ConvenienceStore,
            user_coupon_id: Some(4),
            note: None,
        };
        let order = Order::skeleton(&draft);
        assert_eq!(order.status, OrderStatus::Creating);
        assert_eq!(order.pay_amount, Money::from_cents(5000));
        assert_eq!(order.shipping_fee, Money::zero());
        assert_eq!(order.user_coupon_id, Some(4));
    }

    #[test]
    fn test_product_ids_are_distinct() {
        let mut second = line(100, 100, 1);
        second.item = ItemId::new(11);
        let third = OrderLineItem {
            product: ProductId::new(2),
            ..line(100, 100, 1)
        };
        let assembled = AssembledOrder {
            amounts: OrderAmounts::default(),
            lines: vec![line(100, 100, 1), second, third],
            shipment: OrderShipment {
                shipping_method: ShippingMethod::HomeDelivery,
                receiver_name: "A".to_string(),
                receiver_phone: "1".to_string(),
                receiver_address: "X".to_string(),
            },
        };
        assert_eq!(
            assembled.product_ids(),
            vec![ProductId::new(1), ProductId::new(2)]
        );
    }
}
