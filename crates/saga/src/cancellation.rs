//! Order cancellation and the payment callback.

use std::sync::Arc;

use chrono::Utc;
use common::{OrderCode, UserId};
use domain::OrderStore;

use crate::error::{Result, SagaError};
use crate::services::{CouponService, LimitedStockService, PaymentService, RegularStockService};

/// Cancels unpaid orders and records payments.
#[derive(Clone)]
pub struct CancellationService {
    orders: Arc<dyn OrderStore>,
    limited: Arc<dyn LimitedStockService>,
    regular: Arc<dyn RegularStockService>,
    payments: Arc<dyn PaymentService>,
    coupons: Arc<dyn CouponService>,
}

impl CancellationService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        limited: Arc<dyn LimitedStockService>,
        regular: Arc<dyn RegularStockService>,
        payments: Arc<dyn PaymentService>,
        coupons: Arc<dyn CouponService>,
    ) -> Self {
        Self {
            orders,
            limited,
            regular,
            payments,
            coupons,
        }
    }

    /// Buyer-initiated cancel. Orders owned by someone else look absent.
    pub async fn cancel(&self, user: UserId, code: &OrderCode) -> Result<bool> {
        match self.orders.find_by_code(code).await? {
            Some(order) if order.user == user => self.cancel_internal(code).await,
            _ => Err(SagaError::NotFound(format!("order {code} not found"))),
        }
    }

    /// Cancels a `PENDING_PAYMENT` order and gives back what it held.
    ///
    /// Returns `Ok(false)` when the order was not cancellable, e.g. already
    /// paid or already cancelled.
    #[tracing::instrument(skip(self, code), fields(order_code = %code))]
    pub async fn cancel_internal(&self, code: &OrderCode) -> Result<bool> {
        let Some(order) = self.orders.find_by_code(code).await? else {
            return Ok(false);
        };
        if !self.orders.cancel(code).await? {
            tracing::debug!(status = %order.status, "order not cancellable, skipping");
            return Ok(false);
        }

        let (regular, limited, payment) = tokio::join!(
            self.regular.release_regular(code),
            self.limited.release_limited(code),
            self.payments.cancel_payment(code),
        );
        for (step, result) in [
            ("regular stock release", regular),
            ("limited stock release", limited),
            ("payment cancel", payment),
        ] {
            if let Err(e) = result {
                tracing::error!(step, error = %e, "cancel follow-up failed");
                return Err(SagaError::Unavailable(format!("{step} failed: {e}")));
            }
        }

        if let Some(coupon) = order.user_coupon_id
            && let Err(e) = self.coupons.revert(coupon, code).await
        {
            tracing::warn!(user_coupon_id = coupon, error = %e, "coupon revert failed");
        }

        tracing::info!("order cancelled");
        Ok(true)
    }

    /// Records a successful payment: `PENDING_PAYMENT → PROCESSING`.
    #[tracing::instrument(skip(self, code), fields(order_code = %code))]
    pub async fn on_payment_succeeded(&self, code: &OrderCode) -> Result<bool> {
        let applied = self.orders.mark_paid(code, Utc::now()).await?;
        if !applied {
            tracing::warn!("payment callback for an order not awaiting payment");
        }
        Ok(applied)
    }
}
