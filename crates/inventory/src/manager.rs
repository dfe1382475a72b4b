//! Stock deduction manager.
//!
//! The only component allowed to mutate either ledger. Deduction always
//! goes fast-then-durable; release always goes durable-then-fast.
//!
//! ```text
//! deduct:  log hit? ──yes──► done
//!             │no
//!             ▼
//!          fast.reserve ──fail──► InsufficientStock / NotFound
//!             │ok
//!             ▼
//!          store.commit_deduction ──fail──► fast.release, propagate
//!             │ok
//!             ▼
//!          Deducted
//! ```

use std::time::Duration;

use common::{CampaignId, ItemId, OrderCode};
use serde::Deserialize;
use tokio::sync::watch;

use crate::fast::{FastStockLedger, ReserveOutcome};
use crate::model::{DeductOutcome, DeductionRequest, ReleaseScope, ReservationEntry, StockItem};
use crate::store::StockStore;
use crate::{InventoryError, Result};

/// Schedule of the fast-ledger re-warm check.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RewarmConfig {
    pub interval_secs: u64,
    pub initial_delay_secs: u64,
}

impl Default for RewarmConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            initial_delay_secs: 60,
        }
    }
}

/// Coordinates the fast ledger, the durable ledger and the reservation log.
#[derive(Clone)]
pub struct StockDeductionManager<F, S>
where
    F: FastStockLedger,
    S: StockStore,
{
    fast: F,
    store: S,
}

impl<F, S> StockDeductionManager<F, S>
where
    F: FastStockLedger,
    S: StockStore,
{
    /// Creates a new deduction manager.
    pub fn new(fast: F, store: S) -> Self {
        Self { fast, store }
    }

    /// Returns the fast ledger.
    pub fn fast(&self) -> &F {
        &self.fast
    }

    /// Returns the durable store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Deducts one line.
    ///
    /// Idempotent per (order, item): a retry after success returns
    /// [`DeductOutcome::AlreadyApplied`] without touching either ledger.
    #[tracing::instrument(
        skip(self, request),
        fields(order_code = %request.order_code, campaign = %request.campaign, item = %request.item, qty = request.quantity)
    )]
    pub async fn deduct(&self, request: &DeductionRequest) -> Result<DeductOutcome> {
        if self
            .store
            .find_reservation(&request.order_code, request.item)
            .await?
            .is_some()
        {
            tracing::debug!("reservation already recorded, skipping");
            metrics::counter!("stock_deductions_total", "outcome" => "already_applied").increment(1);
            return Ok(DeductOutcome::AlreadyApplied);
        }

        match self
            .fast
            .reserve(request.campaign, request.item, request.quantity)
            .await?
        {
            ReserveOutcome::Reserved { remaining } => {
                tracing::debug!(remaining, "fast ledger reserved");
            }
            ReserveOutcome::Insufficient => {
                metrics::counter!("stock_deductions_total", "outcome" => "sold_out").increment(1);
                return Err(InventoryError::InsufficientStock {
                    campaign: request.campaign,
                    item: request.item,
                    requested: request.quantity,
                });
            }
            ReserveOutcome::Missing => {
                metrics::counter!("stock_deductions_total", "outcome" => "not_warmed").increment(1);
                return Err(InventoryError::ItemNotFound {
                    campaign: request.campaign,
                    item: request.item,
                });
            }
        }

        match self.store.commit_deduction(request).await {
            Ok(_) => {
                metrics::counter!("stock_deductions_total", "outcome" => "deducted").increment(1);
                Ok(DeductOutcome::Deducted)
            }
            Err(InventoryError::DuplicateReservation { .. }) => {
                // A concurrent retry of the same (order, item) won; ours is surplus.
                self.release_fast(request.campaign, request.item, request.quantity)
                    .await;
                metrics::counter!("stock_deductions_total", "outcome" => "already_applied").increment(1);
                Ok(DeductOutcome::AlreadyApplied)
            }
            Err(e) => {
                self.release_fast(request.campaign, request.item, request.quantity)
                    .await;
                metrics::counter!("stock_deductions_total", "outcome" => "rejected").increment(1);
                tracing::warn!(error = %e, "durable deduction failed, fast ledger restored");
                Err(e)
            }
        }
    }

    /// Deducts every line of one order.
    ///
    /// Lines are processed in item order so two orders touching the same
    /// items always lock them in the same sequence. If a line fails, every
    /// line this call already deducted is reverted before the error is
    /// returned.
    #[tracing::instrument(skip(self, requests), fields(lines = requests.len()))]
    pub async fn deduct_batch(&self, requests: &[DeductionRequest]) -> Result<()> {
        let mut ordered: Vec<&DeductionRequest> = requests.iter().collect();
        ordered.sort_by_key(|r| r.sort_key());

        let mut deducted: Vec<&DeductionRequest> = Vec::with_capacity(ordered.len());
        for request in ordered {
            match self.deduct(request).await {
                Ok(DeductOutcome::Deducted) => deducted.push(request),
                Ok(DeductOutcome::AlreadyApplied) => {}
                Err(e) => {
                    tracing::warn!(
                        order_code = %request.order_code,
                        item = %request.item,
                        error = %e,
                        rollback = deducted.len(),
                        "batch deduction failed, rolling back"
                    );
                    for done in deducted.iter().rev() {
                        if let Err(rollback_err) = self.release_line(done).await {
                            tracing::error!(
                                order_code = %done.order_code,
                                item = %done.item,
                                error = %rollback_err,
                                "batch rollback failed, manual intervention required"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Releases every reservation of `order_code` within `scope`.
    ///
    /// Safe to call any number of times, concurrently: the reservation log
    /// delete decides which caller gives the stock back. A failing entry
    /// does not stop the others; failures are logged one by one and
    /// reported together as [`InventoryError::PartialRelease`].
    #[tracing::instrument(skip(self, order_code, scope), fields(order_code = %order_code, scope = scope.as_str()))]
    pub async fn release_order(
        &self,
        order_code: &OrderCode,
        scope: ReleaseScope,
    ) -> Result<Vec<ReservationEntry>> {
        let entries = self.store.list_reservations(order_code, scope).await?;
        let total = entries.len();
        let mut released = Vec::with_capacity(total);
        let mut failed = 0usize;
        for entry in entries {
            let taken = match self.store.take_reservation(order_code, entry.item).await {
                Ok(Some(taken)) => taken,
                Ok(None) => continue,
                Err(e) => {
                    failed += 1;
                    tracing::error!(
                        item = %entry.item,
                        qty = entry.quantity,
                        error = %e,
                        "durable release failed, manual intervention required"
                    );
                    continue;
                }
            };
            if let Err(e) = self
                .fast
                .release(taken.campaign, taken.item, taken.quantity)
                .await
            {
                failed += 1;
                tracing::error!(
                    campaign = %taken.campaign,
                    item = %taken.item,
                    qty = taken.quantity,
                    error = %e,
                    "fast ledger release failed, manual intervention required"
                );
                continue;
            }
            metrics::counter!("stock_releases_total").increment(1);
            released.push(taken);
        }
        if !released.is_empty() {
            tracing::info!(count = released.len(), "stock released");
        }
        if failed > 0 {
            metrics::counter!("stock_release_failures_total").increment(failed as u64);
            return Err(InventoryError::PartialRelease {
                order_code: order_code.clone(),
                failed,
                total,
            });
        }
        Ok(released)
    }

    /// Reads one durable stock row.
    pub async fn item(&self, campaign: CampaignId, item: ItemId) -> Result<StockItem> {
        self.store
            .get_item(campaign, item)
            .await?
            .ok_or(InventoryError::ItemNotFound { campaign, item })
    }

    /// Takes `quantity` from the fast ledger only.
    ///
    /// Used by queued purchases: the durable side is committed later by
    /// [`Self::commit_held`], and whoever abandons the purchase gives the
    /// hold back with [`Self::release_hold`].
    #[tracing::instrument(skip(self))]
    pub async fn hold(&self, campaign: CampaignId, item: ItemId, quantity: u32) -> Result<i64> {
        match self.fast.reserve(campaign, item, quantity).await? {
            ReserveOutcome::Reserved { remaining } => {
                metrics::counter!("stock_holds_total", "outcome" => "held").increment(1);
                Ok(remaining)
            }
            ReserveOutcome::Insufficient => {
                metrics::counter!("stock_holds_total", "outcome" => "sold_out").increment(1);
                Err(InventoryError::InsufficientStock {
                    campaign,
                    item,
                    requested: quantity,
                })
            }
            ReserveOutcome::Missing => {
                metrics::counter!("stock_holds_total", "outcome" => "not_warmed").increment(1);
                Err(InventoryError::ItemNotFound { campaign, item })
            }
        }
    }

    /// Gives a fast-ledger hold back.
    pub async fn release_hold(&self, campaign: CampaignId, item: ItemId, quantity: u32) -> Result<()> {
        self.fast.release(campaign, item, quantity).await
    }

    /// Commits a held quantity to the durable ledger.
    ///
    /// Never touches the fast ledger, not even on failure: the hold stays
    /// with the caller. Idempotent per (order, item) like [`Self::deduct`].
    #[tracing::instrument(
        skip(self, request),
        fields(order_code = %request.order_code, campaign = %request.campaign, item = %request.item, qty = request.quantity)
    )]
    pub async fn commit_held(&self, request: &DeductionRequest) -> Result<DeductOutcome> {
        if self
            .store
            .find_reservation(&request.order_code, request.item)
            .await?
            .is_some()
        {
            return Ok(DeductOutcome::AlreadyApplied);
        }
        match self.store.commit_deduction(request).await {
            Ok(_) => {
                metrics::counter!("stock_deductions_total", "outcome" => "deducted").increment(1);
                Ok(DeductOutcome::Deducted)
            }
            Err(InventoryError::DuplicateReservation { .. }) => Ok(DeductOutcome::AlreadyApplied),
            Err(e) => {
                metrics::counter!("stock_deductions_total", "outcome" => "rejected").increment(1);
                Err(e)
            }
        }
    }

    /// Undoes [`Self::commit_held`] on the durable ledger only.
    pub async fn release_committed(
        &self,
        order_code: &OrderCode,
        item: ItemId,
    ) -> Result<Option<ReservationEntry>> {
        self.store.take_reservation(order_code, item).await
    }

    /// Overwrites the fast ledger with the durable stock of every item.
    #[tracing::instrument(skip(self))]
    pub async fn resync_fast_ledger(&self) -> Result<usize> {
        let items = self.store.list_items().await?;
        for item in &items {
            self.fast.prepare(item.campaign, item.item, item.stock).await?;
        }
        tracing::info!(items = items.len(), "fast ledger resynchronized");
        Ok(items.len())
    }

    /// Resyncs only if the fast ledger has lost every key.
    pub async fn rewarm_if_empty(&self) -> Result<Option<usize>> {
        if self.fast.has_any_keys().await? {
            tracing::debug!("fast ledger populated, no re-warm needed");
            return Ok(None);
        }
        tracing::warn!("fast ledger empty, re-warming from durable ledger");
        self.resync_fast_ledger().await.map(Some)
    }

    /// Periodically runs [`Self::rewarm_if_empty`] until `shutdown` flips to true.
    pub async fn run_rewarm(&self, config: RewarmConfig, mut shutdown: watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(config.initial_delay_secs)) => {}
            _ = shutdown.changed() => return,
        }

        let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_secs));
        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.rewarm_if_empty().await {
                        tracing::error!(error = %e, "fast ledger re-warm failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("fast ledger re-warm stopped");
    }

    async fn release_line(&self, request: &DeductionRequest) -> Result<()> {
        if let Some(taken) = self
            .store
            .take_reservation(&request.order_code, request.item)
            .await?
        {
            self.fast
                .release(taken.campaign, taken.item, taken.quantity)
                .await?;
        }
        Ok(())
    }

    async fn release_fast(&self, campaign: CampaignId, item: ItemId, qty: u32) {
        if let Err(e) = self.fast.release(campaign, item, qty).await {
            tracing::error!(
                %campaign,
                %item,
                qty,
                error = %e,
                "fast ledger release failed, manual intervention required"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fast::InMemoryFastLedger;
    use crate::store::InMemoryStockStore;
    use common::UserId;

    const CAMPAIGN: CampaignId = CampaignId::new(1);
    const USER: UserId = UserId::new(7);

    async fn setup(
        items: &[(ItemId, i64)],
    ) -> StockDeductionManager<InMemoryFastLedger, InMemoryStockStore> {
        let manager = StockDeductionManager::new(InMemoryFastLedger::new(), InMemoryStockStore::new());
        for (item, stock) in items {
            manager
                .store()
                .upsert_item(StockItem::new(CAMPAIGN, *item, *stock))
                .await
                .unwrap();
        }
        manager.resync_fast_ledger().await.unwrap();
        manager
    }

    fn line(order: &str, item: ItemId, qty: u32) -> DeductionRequest {
        DeductionRequest::new(OrderCode::new(order), CAMPAIGN, item, USER, qty)
    }

    #[tokio::test]
    async fn deduct_is_idempotent_per_order_item() {
        let item = ItemId::new(1);
        let manager = setup(&[(item, 5)]).await;

        assert_eq!(
            manager.deduct(&line("o1", item, 2)).await.unwrap(),
            DeductOutcome::Deducted
        );
        assert_eq!(
            manager.deduct(&line("o1", item, 2)).await.unwrap(),
            DeductOutcome::AlreadyApplied
        );
        assert_eq!(manager.fast().peek(CAMPAIGN, item).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn durable_failure_restores_fast_ledger() {
        let item = ItemId::new(1);
        let manager = setup(&[(item, 5)]).await;
        manager.store().set_fail_on_commit(true);

        assert!(manager.deduct(&line("o1", item, 2)).await.is_err());
        assert_eq!(manager.fast().peek(CAMPAIGN, item).await.unwrap(), Some(5));
        assert_eq!(manager.store().reservation_count().await, 0);
    }

    #[tokio::test]
    async fn unwarmed_item_is_not_found() {
        let manager = StockDeductionManager::new(InMemoryFastLedger::new(), InMemoryStockStore::new());
        let err = manager
            .deduct(&line("o1", ItemId::new(9), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::ItemNotFound { .. }));
    }

    #[tokio::test]
    async fn batch_failure_rolls_back_earlier_lines() {
        let (a, b) = (ItemId::new(1), ItemId::new(2));
        let manager = setup(&[(a, 5), (b, 1)]).await;

        let err = manager
            .deduct_batch(&[line("o1", b, 2), line("o1", a, 3)])
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::InsufficientStock { .. }));

        assert_eq!(manager.fast().peek(CAMPAIGN, a).await.unwrap(), Some(5));
        assert_eq!(manager.fast().peek(CAMPAIGN, b).await.unwrap(), Some(1));
        assert_eq!(manager.store().reservation_count().await, 0);
        let row = manager.store().get_item(CAMPAIGN, a).await.unwrap().unwrap();
        assert_eq!(row.stock, 5);
    }

    #[tokio::test]
    async fn release_order_twice_releases_once() {
        let item = ItemId::new(1);
        let manager = setup(&[(item, 5)]).await;
        manager.deduct(&line("o1", item, 3)).await.unwrap();

        let order = OrderCode::new("o1");
        let first = manager.release_order(&order, ReleaseScope::All).await.unwrap();
        let second = manager.release_order(&order, ReleaseScope::All).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(manager.fast().peek(CAMPAIGN, item).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn release_order_continues_past_fast_failures() {
        let (a, b) = (ItemId::new(1), ItemId::new(2));
        let manager = setup(&[(a, 5), (b, 5)]).await;
        manager.deduct(&line("o1", a, 2)).await.unwrap();
        manager.deduct(&line("o1", b, 2)).await.unwrap();
        manager.fast().set_fail_on_release(true);

        let err = manager
            .release_order(&OrderCode::new("o1"), ReleaseScope::All)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InventoryError::PartialRelease { failed: 2, total: 2, .. }
        ));
        assert_eq!(err.kind(), common::ErrorKind::DownstreamUnavailable);

        // Every durable row was restored and every log entry consumed,
        // even though the first fast release already failed.
        for item in [a, b] {
            let row = manager.store().get_item(CAMPAIGN, item).await.unwrap().unwrap();
            assert_eq!(row.stock, 5);
        }
        assert_eq!(manager.store().reservation_count().await, 0);
    }

    #[tokio::test]
    async fn release_scope_leaves_other_pool_alone() {
        let item = ItemId::new(1);
        let regular_item = ItemId::new(2);
        let manager = setup(&[(item, 5)]).await;
        manager
            .store()
            .upsert_item(StockItem::new(CampaignId::REGULAR, regular_item, 5))
            .await
            .unwrap();
        manager.resync_fast_ledger().await.unwrap();

        manager.deduct(&line("o1", item, 1)).await.unwrap();
        manager
            .deduct(&DeductionRequest::new(
                OrderCode::new("o1"),
                CampaignId::REGULAR,
                regular_item,
                USER,
                1,
            ))
            .await
            .unwrap();

        let released = manager
            .release_order(&OrderCode::new("o1"), ReleaseScope::Regular)
            .await
            .unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].item, regular_item);
        assert_eq!(manager.store().reservation_count().await, 1);
    }

    #[tokio::test]
    async fn held_stock_commits_without_touching_fast_ledger() {
        let item = ItemId::new(1);
        let manager = setup(&[(item, 5)]).await;

        assert_eq!(manager.hold(CAMPAIGN, item, 2).await.unwrap(), 3);
        let request = line("q1", item, 2);
        assert_eq!(
            manager.commit_held(&request).await.unwrap(),
            DeductOutcome::Deducted
        );
        assert_eq!(
            manager.commit_held(&request).await.unwrap(),
            DeductOutcome::AlreadyApplied
        );
        assert_eq!(manager.fast().peek(CAMPAIGN, item).await.unwrap(), Some(3));
        assert_eq!(manager.item(CAMPAIGN, item).await.unwrap().stock, 3);

        manager
            .release_committed(&OrderCode::new("q1"), item)
            .await
            .unwrap();
        assert_eq!(manager.item(CAMPAIGN, item).await.unwrap().stock, 5);
        assert_eq!(manager.fast().peek(CAMPAIGN, item).await.unwrap(), Some(3));

        manager.release_hold(CAMPAIGN, item, 2).await.unwrap();
        assert_eq!(manager.fast().peek(CAMPAIGN, item).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn hold_reports_sold_out_and_unwarmed() {
        let item = ItemId::new(1);
        let manager = setup(&[(item, 1)]).await;
        assert!(matches!(
            manager.hold(CAMPAIGN, item, 2).await.unwrap_err(),
            InventoryError::InsufficientStock { requested: 2, .. }
        ));
        assert!(matches!(
            manager.hold(CAMPAIGN, ItemId::new(9), 1).await.unwrap_err(),
            InventoryError::ItemNotFound { .. }
        ));
        assert!(matches!(
            manager.item(CAMPAIGN, ItemId::new(9)).await.unwrap_err(),
            InventoryError::ItemNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn failed_commit_keeps_the_hold() {
        let item = ItemId::new(1);
        let manager = setup(&[(item, 5)]).await;
        manager.hold(CAMPAIGN, item, 2).await.unwrap();
        manager.store().set_fail_on_commit(true);

        assert!(manager.commit_held(&line("q1", item, 2)).await.is_err());
        assert_eq!(manager.fast().peek(CAMPAIGN, item).await.unwrap(), Some(3));
        assert_eq!(manager.store().reservation_count().await, 0);
    }

    #[tokio::test]
    async fn rewarm_only_when_empty() {
        let item = ItemId::new(1);
        let manager = setup(&[(item, 5)]).await;
        assert_eq!(manager.rewarm_if_empty().await.unwrap(), None);

        manager.fast().clear().await;
        assert_eq!(manager.rewarm_if_empty().await.unwrap(), Some(1));
        assert_eq!(manager.fast().peek(CAMPAIGN, item).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn run_rewarm_stops_on_shutdown() {
        let manager = setup(&[]).await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { manager.run_rewarm(RewarmConfig::default(), rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
