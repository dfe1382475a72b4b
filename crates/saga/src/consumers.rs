//! Queue consumers wired to the broker by the service binary.

use std::sync::Arc;

use async_trait::async_trait;
use common::{CampaignId, ItemId, UserId};
use inventory::FastStockLedger;
use outbox::{MessageHandler, OutboxError, OutboxMessage};
use serde::Deserialize;

use crate::cancellation::CancellationService;
use crate::flash_sale::{FLASH_SALE_STATUS_TTL, flash_sale_status_key};
use crate::services::{
    LimitedStockService, PurchaseStatus, PurchaseStatusStore, RegularStockService,
};

/// Cancels orders whose payment window expired (`order.delay`).
#[derive(Clone)]
pub struct DelayedCancelHandler {
    cancellation: CancellationService,
}

impl DelayedCancelHandler {
    pub fn new(cancellation: CancellationService) -> Self {
        Self { cancellation }
    }
}

#[async_trait]
impl MessageHandler for DelayedCancelHandler {
    async fn handle(&self, payload: &[u8]) -> outbox::Result<()> {
        let code = OutboxMessage::decode_order_code(payload)?;
        match self.cancellation.cancel_internal(&code).await {
            Ok(true) => {
                tracing::info!(order_code = %code, "unpaid order cancelled after timeout");
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => Err(OutboxError::Rejected(e.to_string())),
        }
    }
}

/// Returns stock held by cancelled orders (`order.cancelled`).
#[derive(Clone)]
pub struct StockReleaseHandler {
    limited: Arc<dyn LimitedStockService>,
    regular: Arc<dyn RegularStockService>,
}

impl StockReleaseHandler {
    pub fn new(
        limited: Arc<dyn LimitedStockService>,
        regular: Arc<dyn RegularStockService>,
    ) -> Self {
        Self { limited, regular }
    }
}

#[async_trait]
impl MessageHandler for StockReleaseHandler {
    async fn handle(&self, payload: &[u8]) -> outbox::Result<()> {
        let code = OutboxMessage::decode_order_code(payload)?;
        let (regular, limited) = tokio::join!(
            self.regular.release_regular(&code),
            self.limited.release_limited(&code),
        );
        regular
            .and(limited)
            .map_err(|e| OutboxError::Rejected(e.to_string()))
    }
}

/// The part of a dead-lettered flash-sale purchase the restorer needs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetteredDeduction {
    pub user_id: UserId,
    pub sku_id: ItemId,
    pub promotion_id: CampaignId,
    pub quantity: u32,
}

/// Gives held stock back for purchases the order consumer rejected, and
/// marks them FAILED so the buyer's poll ends.
///
/// Always acknowledges: a second dead-letter hop would lose the message.
#[derive(Clone)]
pub struct DeadLetterStockRestorer<F: FastStockLedger> {
    fast: F,
    statuses: Arc<dyn PurchaseStatusStore>,
}

impl<F: FastStockLedger> DeadLetterStockRestorer<F> {
    pub fn new(fast: F, statuses: Arc<dyn PurchaseStatusStore>) -> Self {
        Self { fast, statuses }
    }
}

#[async_trait]
impl<F: FastStockLedger> MessageHandler for DeadLetterStockRestorer<F> {
    async fn handle(&self, payload: &[u8]) -> outbox::Result<()> {
        let deduction: DeadLetteredDeduction = match serde_json::from_slice(payload) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(error = %e, "unreadable dead letter, manual intervention required");
                return Ok(());
            }
        };

        let key = flash_sale_status_key(deduction.user_id, deduction.sku_id);
        if let Err(e) = self
            .statuses
            .set(&key, &PurchaseStatus::Failed, FLASH_SALE_STATUS_TTL)
            .await
        {
            tracing::warn!(user = %deduction.user_id, error = %e, "could not mark purchase failed");
        }

        if let Err(e) = self
            .fast
            .release(deduction.promotion_id, deduction.sku_id, deduction.quantity)
            .await
        {
            tracing::error!(
                user = %deduction.user_id,
                campaign = %deduction.promotion_id,
                item = %deduction.sku_id,
                qty = deduction.quantity,
                error = %e,
                "dead-letter stock restore failed, manual intervention required"
            );
            return Ok(());
        }

        tracing::info!(
            campaign = %deduction.promotion_id,
            item = %deduction.sku_id,
            qty = deduction.quantity,
            "stock restored from dead letter"
        );
        Ok(())
    }
}
