//! Stock services backed by the deduction manager.
//!
//! Limited (flash-sale) and regular stock are separate collaborators so the
//! pipeline can deduct them concurrently and compensate them independently.

use std::sync::Arc;

use async_trait::async_trait;
use common::{CampaignId, ItemId, OrderCode, ProductId, UserId};
use inventory::{
    DeductionRequest, FastStockLedger, ReleaseScope, StockDeductionManager, StockStore,
};

use crate::error::SagaError;

/// One line to deduct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLine {
    pub campaign: CampaignId,
    pub item: ItemId,
    pub quantity: u32,
}

/// Deducts and releases flash-sale stock.
#[async_trait]
pub trait LimitedStockService: Send + Sync {
    async fn deduct_limited(
        &self,
        order_code: &OrderCode,
        user: UserId,
        lines: &[StockLine],
    ) -> Result<(), SagaError>;

    /// Releases whatever limited stock the order holds. Idempotent.
    async fn release_limited(&self, order_code: &OrderCode) -> Result<(), SagaError>;
}

/// Deducts and releases regular catalog stock.
#[async_trait]
pub trait RegularStockService: Send + Sync {
    async fn deduct_regular(
        &self,
        order_code: &OrderCode,
        user: UserId,
        lines: &[StockLine],
    ) -> Result<(), SagaError>;

    /// Releases whatever regular stock the order holds. Idempotent.
    async fn release_regular(&self, order_code: &OrderCode) -> Result<(), SagaError>;
}

/// Two-phase stock for queued flash-sale purchases.
///
/// `hold` takes fast-ledger stock at submit time; the order consumer later
/// commits it durably. The hold is only given back by `release_hold`.
#[async_trait]
pub trait QueuedStockService: Send + Sync {
    /// The product behind a stock row.
    async fn product_of(&self, campaign: CampaignId, item: ItemId) -> Result<ProductId, SagaError>;

    async fn hold(&self, line: StockLine) -> Result<(), SagaError>;

    async fn release_hold(&self, line: StockLine) -> Result<(), SagaError>;

    /// Commits a held line for `order_code`. Idempotent.
    async fn commit_held(
        &self,
        order_code: &OrderCode,
        user: UserId,
        line: StockLine,
    ) -> Result<(), SagaError>;

    /// Undoes `commit_held` on the durable side only.
    async fn release_committed(&self, order_code: &OrderCode, item: ItemId)
    -> Result<(), SagaError>;
}

/// Both stock services over a shared [`StockDeductionManager`].
pub struct ManagedStock<F, S>
where
    F: FastStockLedger,
    S: StockStore,
{
    manager: Arc<StockDeductionManager<F, S>>,
}

impl<F, S> Clone for ManagedStock<F, S>
where
    F: FastStockLedger,
    S: StockStore,
{
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

impl<F, S> ManagedStock<F, S>
where
    F: FastStockLedger,
    S: StockStore,
{
    pub fn new(manager: Arc<StockDeductionManager<F, S>>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &StockDeductionManager<F, S> {
        &self.manager
    }

    async fn deduct(
        &self,
        order_code: &OrderCode,
        user: UserId,
        lines: &[StockLine],
        campaign_of: impl Fn(&StockLine) -> CampaignId,
    ) -> Result<(), SagaError> {
        let requests: Vec<DeductionRequest> = lines
            .iter()
            .map(|line| {
                DeductionRequest::new(
                    order_code.clone(),
                    campaign_of(line),
                    line.item,
                    user,
                    line.quantity,
                )
            })
            .collect();
        self.manager.deduct_batch(&requests).await?;
        Ok(())
    }
}

#[async_trait]
impl<F, S> LimitedStockService for ManagedStock<F, S>
where
    F: FastStockLedger,
    S: StockStore,
{
    async fn deduct_limited(
        &self,
        order_code: &OrderCode,
        user: UserId,
        lines: &[StockLine],
    ) -> Result<(), SagaError> {
        self.deduct(order_code, user, lines, |line| line.campaign)
            .await
    }

    async fn release_limited(&self, order_code: &OrderCode) -> Result<(), SagaError> {
        self.manager
            .release_order(order_code, ReleaseScope::Limited)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<F, S> RegularStockService for ManagedStock<F, S>
where
    F: FastStockLedger,
    S: StockStore,
{
    async fn deduct_regular(
        &self,
        order_code: &OrderCode,
        user: UserId,
        lines: &[StockLine],
    ) -> Result<(), SagaError> {
        self.deduct(order_code, user, lines, |_| CampaignId::REGULAR)
            .await
    }

    async fn release_regular(&self, order_code: &OrderCode) -> Result<(), SagaError> {
        self.manager
            .release_order(order_code, ReleaseScope::Regular)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<F, S> QueuedStockService for ManagedStock<F, S>
where
    F: FastStockLedger,
    S: StockStore,
{
    async fn product_of(&self, campaign: CampaignId, item: ItemId) -> Result<ProductId, SagaError> {
        Ok(self.manager.item(campaign, item).await?.product)
    }

    async fn hold(&self, line: StockLine) -> Result<(), SagaError> {
        self.manager
            .hold(line.campaign, line.item, line.quantity)
            .await?;
        Ok(())
    }

    async fn release_hold(&self, line: StockLine) -> Result<(), SagaError> {
        self.manager
            .release_hold(line.campaign, line.item, line.quantity)
            .await?;
        Ok(())
    }

    async fn commit_held(
        &self,
        order_code: &OrderCode,
        user: UserId,
        line: StockLine,
    ) -> Result<(), SagaError> {
        let request = DeductionRequest::new(
            order_code.clone(),
            line.campaign,
            line.item,
            user,
            line.quantity,
        );
        self.manager.commit_held(&request).await?;
        Ok(())
    }

    async fn release_committed(
        &self,
        order_code: &OrderCode,
        item: ItemId,
    ) -> Result<(), SagaError> {
        self.manager.release_committed(order_code, item).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inventory::{InMemoryFastLedger, InMemoryStockStore, StockItem};

    async fn stock() -> ManagedStock<InMemoryFastLedger, InMemoryStockStore> {
        let manager = StockDeductionManager::new(
            InMemoryFastLedger::new(),
            InMemoryStockStore::new(),
        );
        for item in [
            StockItem::new(CampaignId::new(5), ItemId::new(1), 10),
            StockItem::new(CampaignId::REGULAR, ItemId::new(2), 10),
        ] {
            manager.store().upsert_item(item).await.unwrap();
        }
        manager.resync_fast_ledger().await.unwrap();
        ManagedStock::new(Arc::new(manager))
    }

    #[tokio::test]
    async fn test_release_is_scoped() {
        let stock = stock().await;
        let code = OrderCode::new("o1");
        let user = UserId::new(1);

        stock
            .deduct_limited(
                &code,
                user,
                &[StockLine {
                    campaign: CampaignId::new(5),
                    item: ItemId::new(1),
                    quantity: 2,
                }],
            )
            .await
            .unwrap();
        stock
            .deduct_regular(
                &code,
                user,
                &[StockLine {
                    campaign: CampaignId::new(99),
                    item: ItemId::new(2),
                    quantity: 3,
                }],
            )
            .await
            .unwrap();

        let fast = stock.manager().fast();
        assert_eq!(fast.peek(CampaignId::new(5), ItemId::new(1)).await.unwrap(), Some(8));
        assert_eq!(fast.peek(CampaignId::REGULAR, ItemId::new(2)).await.unwrap(), Some(7));

        stock.release_regular(&code).await.unwrap();
        assert_eq!(fast.peek(CampaignId::REGULAR, ItemId::new(2)).await.unwrap(), Some(10));
        assert_eq!(fast.peek(CampaignId::new(5), ItemId::new(1)).await.unwrap(), Some(8));

        stock.release_limited(&code).await.unwrap();
        stock.release_limited(&code).await.unwrap();
        assert_eq!(fast.peek(CampaignId::new(5), ItemId::new(1)).await.unwrap(), Some(10));
    }
}
