//! Queued flash-sale purchases.
//!
//! Submitting only holds fast-ledger stock and enqueues a message; the
//! order is written later by [`FlashSaleOrderHandler`]. The buyer polls a
//! per-(user, item) status until it turns into an order code.
//!
//! ```text
//! submit: claim status ──taken──► existing status
//!            │new
//!            ▼
//!         hold stock ──fail──► drop claim, error
//!            │ok
//!            ▼
//!         publish flash.sale ──fail──► release hold, drop claim, error
//!
//! consumer: price ──► skeleton ──► commit held stock ──► complete ──► status = code
//!                 any failure: unwind durable side, mark failed, reject
//!                 rejected ──► dead letters ──► restore hold, status = FAILED
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{CampaignId, ItemId, Money, OrderCode, ProductId, UserId};
use domain::{
    AssembledOrder, OrderAmounts, OrderDraft, OrderLineItem, OrderShipment, OrderStatus,
    OrderStore, PaymentType, ShippingMethod,
};
use outbox::{MessageHandler, MessagePublisher, OutboxError, OutboxMessage};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::services::{
    PriceCheck, PricingService, PurchaseStatus, PurchaseStatusStore, QueuedStockService,
    StockLine,
};

/// How long a purchase status stays readable.
pub const FLASH_SALE_STATUS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Status key for one buyer and item: `flash_sale:order:{user}:{item}`.
pub fn flash_sale_status_key(user: UserId, item: ItemId) -> String {
    format!("flash_sale:order:{user}:{item}")
}

/// What the buyer submits for a flash-sale item.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashSaleRequest {
    pub promotion_id: CampaignId,
    pub quantity: u32,
    #[serde(default)]
    pub payment_type: PaymentType,
    #[serde(default)]
    pub shipping_method: ShippingMethod,
    pub receiver_name: String,
    pub receiver_phone: String,
    pub receiver_address: String,
}

/// The queued purchase, as carried on `flash.sale`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashSaleMessage {
    pub order_sn: OrderCode,
    pub user_id: UserId,
    pub promotion_id: CampaignId,
    pub sku_id: ItemId,
    pub quantity: u32,
    pub payment_type: PaymentType,
    pub shipping_method: ShippingMethod,
    pub receiver_name: String,
    pub receiver_phone: String,
    pub receiver_address: String,
    /// Submission time, epoch milliseconds.
    pub timestamp: i64,
}

impl FlashSaleMessage {
    fn line(&self) -> StockLine {
        StockLine {
            campaign: self.promotion_id,
            item: self.sku_id,
            quantity: self.quantity,
        }
    }

    fn shipment(&self) -> OrderShipment {
        OrderShipment {
            shipping_method: self.shipping_method,
            receiver_name: self.receiver_name.clone(),
            receiver_phone: self.receiver_phone.clone(),
            receiver_address: self.receiver_address.clone(),
        }
    }
}

/// Entry point for buyers queueing flash-sale purchases.
#[derive(Clone)]
pub struct FlashSaleService {
    stock: Arc<dyn QueuedStockService>,
    statuses: Arc<dyn PurchaseStatusStore>,
    publisher: Arc<dyn MessagePublisher>,
}

impl FlashSaleService {
    pub fn new(
        stock: Arc<dyn QueuedStockService>,
        statuses: Arc<dyn PurchaseStatusStore>,
        publisher: Arc<dyn MessagePublisher>,
    ) -> Self {
        Self {
            stock,
            statuses,
            publisher,
        }
    }

    /// Holds stock and queues the purchase.
    ///
    /// A buyer with a live purchase for `item` gets its status back instead
    /// of a second hold. Only a FAILED purchase may be submitted again.
    #[tracing::instrument(skip(self, request), fields(campaign = %request.promotion_id, qty = request.quantity))]
    pub async fn submit(
        &self,
        user: UserId,
        item: ItemId,
        request: FlashSaleRequest,
    ) -> Result<PurchaseStatus> {
        if request.promotion_id.is_regular() {
            return Err(SagaError::NotFound(format!("item {item} is not on flash sale")));
        }

        let message = FlashSaleMessage {
            order_sn: OrderCode::generate(),
            user_id: user,
            promotion_id: request.promotion_id,
            sku_id: item,
            quantity: request.quantity,
            payment_type: request.payment_type,
            shipping_method: request.shipping_method,
            receiver_name: request.receiver_name,
            receiver_phone: request.receiver_phone,
            receiver_address: request.receiver_address,
            timestamp: Utc::now().timestamp_millis(),
        };
        let payload = serde_json::to_string(&message).map_err(OutboxError::from)?;

        let key = flash_sale_status_key(user, item);
        if let Some(existing) = self.statuses.claim(&key, FLASH_SALE_STATUS_TTL).await? {
            tracing::debug!(status = existing.label(), "purchase already queued");
            return Ok(existing);
        }

        if let Err(e) = self.stock.hold(message.line()).await {
            self.drop_claim(&key).await;
            metrics::counter!("flash_sale_submissions_total", "outcome" => "rejected").increment(1);
            return Err(e);
        }

        let outbound = OutboxMessage::flash_sale_order(&message.order_sn, payload);
        if let Err(e) = self.publisher.publish(&outbound).await {
            if let Err(release_err) = self.stock.release_hold(message.line()).await {
                tracing::error!(
                    error = %release_err,
                    "flash-sale hold release failed, manual intervention required"
                );
            }
            self.drop_claim(&key).await;
            metrics::counter!("flash_sale_submissions_total", "outcome" => "unqueued").increment(1);
            return Err(e.into());
        }

        metrics::counter!("flash_sale_submissions_total", "outcome" => "queued").increment(1);
        tracing::info!(order_code = %message.order_sn, "flash-sale purchase queued");
        Ok(PurchaseStatus::Pending)
    }

    /// Current status of the buyer's purchase of `item`.
    pub async fn result(&self, user: UserId, item: ItemId) -> Result<PurchaseStatus> {
        self.statuses
            .get(&flash_sale_status_key(user, item))
            .await?
            .ok_or_else(|| {
                SagaError::NotFound(format!("no flash-sale purchase of item {item}"))
            })
    }

    async fn drop_claim(&self, key: &str) {
        if let Err(e) = self.statuses.remove(key).await {
            tracing::warn!(key, error = %e, "could not clear purchase status");
        }
    }
}

/// Turns queued purchases into orders (`flash.sale`).
///
/// Rejecting a delivery dead-letters it; the dead-letter consumer gives
/// the hold back and marks the purchase FAILED.
#[derive(Clone)]
pub struct FlashSaleOrderHandler {
    stock: Arc<dyn QueuedStockService>,
    pricing: Arc<dyn PricingService>,
    orders: Arc<dyn OrderStore>,
    statuses: Arc<dyn PurchaseStatusStore>,
}

impl FlashSaleOrderHandler {
    pub fn new(
        stock: Arc<dyn QueuedStockService>,
        pricing: Arc<dyn PricingService>,
        orders: Arc<dyn OrderStore>,
        statuses: Arc<dyn PurchaseStatusStore>,
    ) -> Self {
        Self {
            stock,
            pricing,
            orders,
            statuses,
        }
    }

    /// Creates the order for `message`. Safe to run again for the same message.
    #[tracing::instrument(skip(self, message), fields(order_code = %message.order_sn, user = %message.user_id, item = %message.sku_id))]
    pub async fn create_order(&self, message: &FlashSaleMessage) -> Result<OrderCode> {
        let code = &message.order_sn;
        let resumed = match self.orders.find_by_code(code).await? {
            Some(order) if order.status == OrderStatus::Creating => true,
            Some(order) if order.status == OrderStatus::CreateFailed => {
                return Err(SagaError::Conflict(format!(
                    "flash-sale order {code} already failed"
                )));
            }
            Some(_) => return Ok(code.clone()),
            None => false,
        };

        let line = match self.price(message).await {
            Ok(line) => line,
            Err(e) if resumed => return Err(self.fail(code, e).await),
            Err(e) => return Err(e),
        };

        if !resumed {
            self.orders
                .create_skeleton(&OrderDraft {
                    code: code.clone(),
                    user: message.user_id,
                    estimated_total: line.line_total(),
                    payment_type: message.payment_type,
                    shipping_method: message.shipping_method,
                    user_coupon_id: None,
                    note: None,
                })
                .await?;
        }

        if let Err(e) = self
            .stock
            .commit_held(code, message.user_id, message.line())
            .await
        {
            return Err(self.fail(code, e).await);
        }

        let assembled = AssembledOrder {
            amounts: OrderAmounts::without_shipping(std::slice::from_ref(&line)),
            lines: vec![line],
            shipment: message.shipment(),
        };
        let completed = match self.orders.complete_assembly(code, &assembled).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(SagaError::Conflict(format!(
                "order {code} is no longer CREATING"
            ))),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = completed {
            if let Err(release_err) = self.stock.release_committed(code, message.sku_id).await {
                tracing::error!(
                    error = %release_err,
                    "durable release failed, manual intervention required"
                );
            }
            return Err(self.fail(code, e).await);
        }

        tracing::info!(pay = %assembled.amounts.pay, "flash-sale order created");
        Ok(code.clone())
    }

    /// The flash-sale price of the purchased line. Without one there is no order.
    async fn price(&self, message: &FlashSaleMessage) -> Result<OrderLineItem> {
        let product = self
            .stock
            .product_of(message.promotion_id, message.sku_id)
            .await?;
        let quotes = self
            .pricing
            .best_prices(&[PriceCheck {
                product,
                item: message.sku_id,
                // No cart snapshot here; the quote carries the list price.
                original_price: Money::zero(),
            }])
            .await?;
        let quote = quotes
            .into_iter()
            .find(|q| q.item == message.sku_id)
            .filter(|q| q.campaign == Some(message.promotion_id));
        let Some(final_price) = quote.as_ref().and_then(|q| q.final_price) else {
            return Err(SagaError::PricingService(format!(
                "no flash-sale price for item {} in campaign {}",
                message.sku_id, message.promotion_id
            )));
        };
        Ok(flash_line(
            product,
            message,
            quote.and_then(|q| q.original_price).unwrap_or(final_price),
            final_price,
        ))
    }

    /// Marks the order failed and hands the error back.
    async fn fail(&self, code: &OrderCode, e: SagaError) -> SagaError {
        if let Err(mark_err) = self.orders.mark_failed(code, &e.buyer_reason()).await {
            tracing::error!(
                error = %mark_err,
                "marking flash-sale order failed did not persist, manual intervention required"
            );
        }
        e
    }
}

fn flash_line(
    product: ProductId,
    message: &FlashSaleMessage,
    original_price: Money,
    final_price: Money,
) -> OrderLineItem {
    OrderLineItem {
        product,
        item: message.sku_id,
        product_name: format!("Flash sale item {}", message.sku_id),
        original_price,
        final_price,
        quantity: message.quantity,
        campaign: Some(message.promotion_id),
    }
}

#[async_trait]
impl MessageHandler for FlashSaleOrderHandler {
    async fn handle(&self, payload: &[u8]) -> outbox::Result<()> {
        let message: FlashSaleMessage = serde_json::from_slice(payload)?;
        let key = flash_sale_status_key(message.user_id, message.sku_id);

        if let Some(PurchaseStatus::Created(code)) = self
            .statuses
            .get(&key)
            .await
            .map_err(|e| OutboxError::Rejected(e.to_string()))?
            && code == message.order_sn
        {
            tracing::debug!(order_code = %code, "flash-sale order already created");
            return Ok(());
        }

        let code = match self.create_order(&message).await {
            Ok(code) => code,
            Err(e) => {
                metrics::counter!("flash_sale_orders_total", "outcome" => "failed").increment(1);
                return Err(OutboxError::Rejected(e.to_string()));
            }
        };
        metrics::counter!("flash_sale_orders_total", "outcome" => "created").increment(1);

        // The order exists now; rejecting would restore stock it still holds.
        if let Err(e) = self
            .statuses
            .set(&key, &PurchaseStatus::Created(code.clone()), FLASH_SALE_STATUS_TTL)
            .await
        {
            tracing::error!(
                order_code = %code,
                error = %e,
                "purchase status not updated, manual intervention required"
            );
        }
        Ok(())
    }
}
