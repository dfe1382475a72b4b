//! Amount and shipping-fee rules.

use common::Money;
use serde::Deserialize;

use super::model::{OrderLineItem, ShippingMethod};

/// Shipping fee schedule, in cents.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShippingConfig {
    /// Orders at or above this gross ship free.
    pub free_threshold_cents: i64,
    pub home_delivery_fee_cents: i64,
    pub store_fee_cents: i64,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            free_threshold_cents: 150_000,
            home_delivery_fee_cents: 10_000,
            store_fee_cents: 6_000,
        }
    }
}

impl ShippingConfig {
    pub fn fee(&self, total: Money, method: ShippingMethod) -> Money {
        if total.cents() >= self.free_threshold_cents {
            return Money::zero();
        }
        match method {
            ShippingMethod::HomeDelivery => Money::from_cents(self.home_delivery_fee_cents),
            ShippingMethod::ConvenienceStore => Money::from_cents(self.store_fee_cents),
        }
    }
}

/// The four amounts persisted on an order.
///
/// `discount` records promotion and coupon discounts together, but only the
/// coupon part is taken off `pay`: `total` is already at promotional prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrderAmounts {
    pub total: Money,
    pub discount: Money,
    pub shipping_fee: Money,
    pub pay: Money,
}

impl OrderAmounts {
    /// Gross, promotion discount and shipping for `lines`; no coupon yet.
    pub fn for_lines(
        lines: &[OrderLineItem],
        method: ShippingMethod,
        shipping: &ShippingConfig,
    ) -> Self {
        let total: Money = lines.iter().map(OrderLineItem::line_total).sum();
        let discount: Money = lines.iter().map(OrderLineItem::promotion_discount).sum();
        let shipping_fee = shipping.fee(total, method);
        Self {
            total,
            discount,
            shipping_fee,
            pay: total + shipping_fee,
        }
    }

    /// Like [`Self::for_lines`] for orders that always ship free.
    pub fn without_shipping(lines: &[OrderLineItem]) -> Self {
        let total: Money = lines.iter().map(OrderLineItem::line_total).sum();
        Self {
            total,
            discount: lines.iter().map(OrderLineItem::promotion_discount).sum(),
            shipping_fee: Money::zero(),
            pay: total,
        }
    }

    /// Applies a coupon discount; `pay` is clamped at zero.
    pub fn with_coupon(self, coupon: Money) -> Self {
        Self {
            discount: self.discount + coupon,
            pay: (self.total + self.shipping_fee - coupon).non_negative(),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ItemId, ProductId};

    fn line(original: i64, final_price: i64, qty: u32) -> OrderLineItem {
        OrderLineItem {
            product: ProductId::new(1),
            item: ItemId::new(1),
            product_name: "Widget".to_string(),
            original_price: Money::from_cents(original),
            final_price: Money::from_cents(final_price),
            quantity: qty,
            campaign: None,
        }
    }

    #[test]
    fn test_default_schedule() {
        let shipping = ShippingConfig::default();
        let below = Money::from_cents(149_999);
        assert_eq!(
            shipping.fee(below, ShippingMethod::HomeDelivery),
            Money::from_cents(10_000)
        );
        assert_eq!(
            shipping.fee(below, ShippingMethod::ConvenienceStore),
            Money::from_cents(6_000)
        );
        assert_eq!(
            shipping.fee(Money::from_cents(150_000), ShippingMethod::HomeDelivery),
            Money::zero()
        );
    }

    #[test]
    fn test_amounts_without_shipping() {
        let amounts = OrderAmounts::without_shipping(&[line(12_000, 9_000, 2)]);
        assert_eq!(amounts.total, Money::from_cents(18_000));
        assert_eq!(amounts.discount, Money::from_cents(6_000));
        assert_eq!(amounts.shipping_fee, Money::zero());
        assert_eq!(amounts.pay, Money::from_cents(18_000));
    }

    #[test]
    fn test_amounts_below_free_threshold() {
        let amounts = OrderAmounts::for_lines(
            &[line(60_000, 50_000, 2)],
            ShippingMethod::HomeDelivery,
            &ShippingConfig::default(),
        );
        assert_eq!(amounts.total, Money::from_cents(100_000));
        assert_eq!(amounts.discount, Money::from_cents(20_000));
        assert_eq!(amounts.shipping_fee, Money::from_cents(10_000));
        assert_eq!(amounts.pay, Money::from_cents(110_000));
    }

    #[test]
    fn test_coupon_only_reduces_pay_by_coupon() {
        let amounts = OrderAmounts::for_lines(
            &[line(60_000, 50_000, 2)],
            ShippingMethod::ConvenienceStore,
            &ShippingConfig::default(),
        )
        .with_coupon(Money::from_cents(5_000));
        assert_eq!(amounts.discount, Money::from_cents(25_000));
        assert_eq!(amounts.pay, Money::from_cents(101_000));
    }

    #[test]
    fn test_pay_clamped_at_zero() {
        let amounts = OrderAmounts::for_lines(
            &[line(1_000, 1_000, 1)],
            ShippingMethod::ConvenienceStore,
            &ShippingConfig::default(),
        )
        .with_coupon(Money::from_cents(50_000));
        assert_eq!(amounts.pay, Money::zero());
    }
}
