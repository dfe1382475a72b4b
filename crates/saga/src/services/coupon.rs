//! Coupon service trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use common::{Money, OrderCode, UserId};
use tokio::sync::Mutex;

use crate::error::SagaError;

/// Evaluates and reverts user coupons. Discount arithmetic lives behind
/// this trait.
#[async_trait]
pub trait CouponService: Send + Sync {
    /// Returns the discount `user_coupon_id` grants on an order of `total`.
    async fn evaluate(
        &self,
        user: UserId,
        user_coupon_id: i64,
        total: Money,
        shipping_fee: Money,
    ) -> Result<Money, SagaError>;

    /// Returns a consumed coupon to the user.
    async fn revert(&self, user_coupon_id: i64, order_code: &OrderCode) -> Result<(), SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryCouponState {
    discounts: HashMap<i64, Money>,
    reverted: HashSet<i64>,
    evaluations: usize,
    fail_on_evaluate: bool,
    fail_on_revert: bool,
}

/// In-memory coupon service for testing.
///
/// Unknown coupons are rejected as not applicable.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCouponService {
    state: Arc<Mutex<InMemoryCouponState>>,
}

impl InMemoryCouponService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_coupon(&self, user_coupon_id: i64, discount: Money) {
        self.state
            .lock()
            .await
            .discounts
            .insert(user_coupon_id, discount);
    }

    pub async fn set_fail_on_evaluate(&self, fail: bool) {
        self.state.lock().await.fail_on_evaluate = fail;
    }

    pub async fn set_fail_on_revert(&self, fail: bool) {
        self.state.lock().await.fail_on_revert = fail;
    }

    pub async fn evaluation_count(&self) -> usize {
        self.state.lock().await.evaluations
    }

    pub async fn was_reverted(&self, user_coupon_id: i64) -> bool {
        self.state.lock().await.reverted.contains(&user_coupon_id)
    }
}

#[async_trait]
impl CouponService for InMemoryCouponService {
    async fn evaluate(
        &self,
        _user: UserId,
        user_coupon_id: i64,
        _total: Money,
        _shipping_fee: Money,
    ) -> Result<Money, SagaError> {
        let mut state = self.state.lock().await;
        state.evaluations += 1;
        if state.fail_on_evaluate {
            return Err(SagaError::CouponService(
                "coupon backend unreachable".to_string(),
            ));
        }
        state.discounts.get(&user_coupon_id).copied().ok_or_else(|| {
            SagaError::CouponService(format!("coupon {user_coupon_id} is not applicable"))
        })
    }

    async fn revert(&self, user_coupon_id: i64, _order_code: &OrderCode) -> Result<(), SagaError> {
        let mut state = self.state.lock().await;
        if state.fail_on_revert {
            return Err(SagaError::CouponService(
                "coupon backend unreachable".to_string(),
            ));
        }
        state.reverted.insert(user_coupon_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_evaluate_known_and_unknown() {
        let coupons = InMemoryCouponService::new();
        coupons.add_coupon(7, Money::from_cents(300)).await;

        let user = UserId::new(1);
        let total = Money::from_cents(10_000);
        assert_eq!(
            coupons.evaluate(user, 7, total, Money::zero()).await.unwrap(),
            Money::from_cents(300)
        );
        assert!(coupons.evaluate(user, 8, total, Money::zero()).await.is_err());
        assert_eq!(coupons.evaluation_count().await, 2);
    }

    #[tokio::test]
    async fn test_revert_records() {
        let coupons = InMemoryCouponService::new();
        coupons.revert(7, &OrderCode::new("x")).await.unwrap();
        assert!(coupons.was_reverted(7).await);
    }
}
