//! Checkout: order tokens, the re-entrancy guard and handing jobs to the
//! pipeline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{Money, OrderCode, UserId};
use domain::{Order, OrderDraft, OrderShipment, OrderStore, PaymentType, ShippingMethod};
use serde::Deserialize;

use crate::error::{Result, SagaError};
use crate::pipeline::{AssemblyJob, PipelineExecutor};
use crate::services::{CartLine, CartService, TokenStore};

/// How long an issued order token stays valid.
pub const ORDER_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// A `CREATING` order younger than this is returned instead of a new one.
const REENTRY_WINDOW_MINUTES: i64 = 5;

/// Storage key of an order token.
pub fn order_token_key(user: UserId, token: &str) -> String {
    format!("mall:order:token:{user}:{token}")
}

/// What the buyer submits from the checkout page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub order_token: String,
    #[serde(default)]
    pub payment_type: PaymentType,
    #[serde(default)]
    pub shipping_method: ShippingMethod,
    pub user_coupon_id: Option<i64>,
    pub receiver_name: String,
    pub receiver_phone: String,
    pub receiver_address: String,
    pub note: Option<String>,
}

impl CheckoutRequest {
    fn shipment(&self) -> OrderShipment {
        OrderShipment {
            shipping_method: self.shipping_method,
            receiver_name: self.receiver_name.clone(),
            receiver_phone: self.receiver_phone.clone(),
            receiver_address: self.receiver_address.clone(),
        }
    }
}

/// Entry point for buyers placing and polling orders.
#[derive(Clone)]
pub struct CheckoutService {
    tokens: Arc<dyn TokenStore>,
    cart: Arc<dyn CartService>,
    orders: Arc<dyn OrderStore>,
    executor: PipelineExecutor,
}

impl CheckoutService {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        cart: Arc<dyn CartService>,
        orders: Arc<dyn OrderStore>,
        executor: PipelineExecutor,
    ) -> Self {
        Self {
            tokens,
            cart,
            orders,
            executor,
        }
    }

    pub fn executor(&self) -> &PipelineExecutor {
        &self.executor
    }

    /// Issues a single-use token for the checkout page.
    pub async fn issue_token(&self, user: UserId) -> Result<String> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        self.tokens
            .put(&order_token_key(user, &token), ORDER_TOKEN_TTL)
            .await?;
        Ok(token)
    }

    /// Places an order and returns its `CREATING` skeleton right away.
    ///
    /// Assembly continues in the background; callers poll [`Self::status`].
    #[tracing::instrument(skip(self, request), fields(user = %user))]
    pub async fn submit(&self, user: UserId, request: CheckoutRequest) -> Result<Order> {
        if !self
            .tokens
            .take(&order_token_key(user, &request.order_token))
            .await?
        {
            return Err(SagaError::Conflict(
                "duplicate submission or expired page".to_string(),
            ));
        }

        let lines = self
            .cart
            .checked_lines(user)
            .await
            .map_err(|e| SagaError::Unavailable(format!("cart unavailable: {e}")))?;
        if lines.is_empty() {
            return Err(SagaError::NotFound("no cart items to check out".to_string()));
        }

        let since = Utc::now() - chrono::Duration::minutes(REENTRY_WINDOW_MINUTES);
        if let Some(existing) = self.orders.find_recent_creating(user, since).await? {
            tracing::info!(order_code = %existing.code, "order already being assembled, returning it");
            return Ok(existing);
        }

        let draft = OrderDraft {
            code: OrderCode::generate(),
            user,
            estimated_total: lines.iter().map(CartLine::snapshot_total).sum::<Money>(),
            payment_type: request.payment_type,
            shipping_method: request.shipping_method,
            user_coupon_id: request.user_coupon_id,
            note: request.note.clone(),
        };
        let order = self.orders.create_skeleton(&draft).await?;

        let job = AssemblyJob {
            code: order.code.clone(),
            user,
            lines,
            user_coupon_id: request.user_coupon_id,
            shipment: request.shipment(),
        };
        if let Err(e) = self.executor.submit(job) {
            tracing::warn!(order_code = %order.code, error = %e, "pipeline refused order");
            self.orders.mark_failed(&order.code, &e.buyer_reason()).await?;
            return Err(e);
        }

        tracing::info!(order_code = %order.code, "order accepted");
        Ok(order)
    }

    /// Loads an order for its owner.
    pub async fn status(&self, user: UserId, code: &OrderCode) -> Result<Order> {
        self.orders
            .find_by_code(code)
            .await?
            .filter(|order| order.user == user)
            .ok_or_else(|| SagaError::NotFound(format!("order {code} not found")))
    }
}
