//! Order assembly pipeline.
//!
//! Turns a `CREATING` skeleton into a priced, stock-backed
//! `PENDING_PAYMENT` order, or compensates and marks it `CREATE_FAILED`.
//!
//! ```text
//! pricing ──► amounts ──► split lines ──► join!(coupon, limited, regular)
//!                                               │ all ok        │ any err
//!                                               ▼               ▼
//!                                       complete_assembly   compensate:
//!                                          │ ok   │ no-op    release regular
//!                                          ▼      └───────►  release limited
//!                                      clear cart            mark CREATE_FAILED
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use common::{CampaignId, ErrorKind, ItemId, Money, OrderCode, UserId};
use domain::{
    AssembledOrder, OrderAmounts, OrderLineItem, OrderShipment, OrderStore, ShippingConfig,
};
use serde::Deserialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::error::{Result, SagaError};
use crate::services::{
    CartLine, CartService, CouponService, LimitedStockService, PriceCheck, PriceQuote,
    PricingService, RegularStockService, StockLine,
};

/// Pool sizes for the pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Orders assembled at once.
    pub max_concurrency: usize,
    /// Orders allowed to wait for a worker before `submit` refuses.
    pub queue_capacity: usize,
    /// Downstream calls in flight at once, across all orders.
    pub rpc_max_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 30,
            queue_capacity: 200,
            rpc_max_concurrency: 50,
        }
    }
}

/// Everything needed to assemble one order.
#[derive(Debug, Clone)]
pub struct AssemblyJob {
    pub code: OrderCode,
    pub user: UserId,
    pub lines: Vec<CartLine>,
    pub user_coupon_id: Option<i64>,
    pub shipment: OrderShipment,
}

/// How an assembly ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyOutcome {
    /// The order is `PENDING_PAYMENT`.
    Completed,
    /// The order was compensated; carries the failure reason.
    Failed(String),
}

impl AssemblyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssemblyOutcome::Completed => "completed",
            AssemblyOutcome::Failed(_) => "failed",
        }
    }
}

/// Collaborators of the pipeline.
#[derive(Clone)]
pub struct PipelineServices {
    pub pricing: Arc<dyn PricingService>,
    pub coupons: Arc<dyn CouponService>,
    pub limited: Arc<dyn LimitedStockService>,
    pub regular: Arc<dyn RegularStockService>,
    pub cart: Arc<dyn CartService>,
    pub orders: Arc<dyn OrderStore>,
}

/// Which stock deductions were started and so need compensating.
#[derive(Debug, Clone, Copy, Default)]
struct Attempted {
    limited: bool,
    regular: bool,
}

/// Assembles orders. See the module docs for the flow.
#[derive(Clone)]
pub struct OrderAssemblyPipeline {
    services: PipelineServices,
    shipping: ShippingConfig,
    rpc: Arc<Semaphore>,
}

impl OrderAssemblyPipeline {
    pub fn new(services: PipelineServices, shipping: ShippingConfig, rpc_permits: usize) -> Self {
        Self {
            services,
            shipping,
            rpc: Arc::new(Semaphore::new(rpc_permits.max(1))),
        }
    }

    pub fn services(&self) -> &PipelineServices {
        &self.services
    }

    /// Runs one assembly to completion, compensating on failure.
    ///
    /// Never returns an error: the outcome is recorded on the order.
    #[tracing::instrument(
        skip(self, job),
        fields(order_code = %job.code, user = %job.user, lines = job.lines.len())
    )]
    pub async fn process(&self, job: AssemblyJob) -> AssemblyOutcome {
        let started = Instant::now();
        let mut attempted = Attempted::default();

        let outcome = match self.assemble(&job, &mut attempted).await {
            Ok(pay) => {
                tracing::info!(pay = %pay, "order assembled");
                AssemblyOutcome::Completed
            }
            Err(e) => {
                match e.kind() {
                    ErrorKind::DownstreamUnavailable | ErrorKind::Internal => {
                        tracing::error!(error = %e, kind = %e.kind(), "assembly failed, compensating");
                    }
                    _ => tracing::warn!(error = %e, kind = %e.kind(), "assembly failed, compensating"),
                }
                let reason = e.buyer_reason();
                self.compensate(&job.code, attempted, &reason).await;
                AssemblyOutcome::Failed(reason)
            }
        };

        metrics::counter!("order_assembly_total", "outcome" => outcome.as_str()).increment(1);
        metrics::histogram!("order_assembly_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        outcome
    }

    async fn assemble(&self, job: &AssemblyJob, attempted: &mut Attempted) -> Result<Money> {
        let lines = self.resolve_prices(&job.lines).await;
        let amounts = OrderAmounts::for_lines(&lines, job.shipment.shipping_method, &self.shipping);
        let (limited, regular) = split_lines(&lines);

        attempted.limited = !limited.is_empty();
        attempted.regular = !regular.is_empty();

        let coupon = async {
            match job.user_coupon_id {
                Some(id) => self
                    .with_rpc_permit(self.services.coupons.evaluate(
                        job.user,
                        id,
                        amounts.total,
                        amounts.shipping_fee,
                    ))
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };
        let limited_deduction = async {
            if limited.is_empty() {
                return Ok(());
            }
            self.with_rpc_permit(
                self.services
                    .limited
                    .deduct_limited(&job.code, job.user, &limited),
            )
            .await
        };
        let regular_deduction = async {
            if regular.is_empty() {
                return Ok(());
            }
            self.with_rpc_permit(
                self.services
                    .regular
                    .deduct_regular(&job.code, job.user, &regular),
            )
            .await
        };

        let (coupon, limited_result, regular_result) =
            tokio::join!(coupon, limited_deduction, regular_deduction);
        let coupon = coupon?;
        limited_result?;
        regular_result?;

        let amounts = match coupon {
            Some(discount) => {
                tracing::debug!(discount = %discount, "coupon applied");
                amounts.with_coupon(discount)
            }
            None => amounts,
        };

        let assembled = AssembledOrder {
            amounts,
            lines,
            shipment: job.shipment.clone(),
        };
        if !self
            .services
            .orders
            .complete_assembly(&job.code, &assembled)
            .await?
        {
            return Err(SagaError::Conflict(format!(
                "order {} is no longer CREATING",
                job.code
            )));
        }

        let items: Vec<ItemId> = job.lines.iter().map(|l| l.item).collect();
        if let Err(e) = self.services.cart.remove_lines(job.user, &items).await {
            tracing::warn!(error = %e, "cart cleanup failed, order unaffected");
        }

        Ok(amounts.pay)
    }

    /// Prices every cart line, preferring live prices over the snapshot.
    async fn resolve_prices(&self, lines: &[CartLine]) -> Vec<OrderLineItem> {
        let checks: Vec<PriceCheck> = lines
            .iter()
            .map(|l| PriceCheck {
                product: l.product,
                item: l.item,
                original_price: l.original_price.unwrap_or(l.price),
            })
            .collect();

        let quotes: HashMap<ItemId, PriceQuote> = match self
            .with_rpc_permit(self.services.pricing.best_prices(&checks))
            .await
        {
            Ok(quotes) => quotes.into_iter().map(|q| (q.item, q)).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "repricing failed, using cart snapshot");
                HashMap::new()
            }
        };

        lines
            .iter()
            .map(|line| price_line(line, quotes.get(&line.item)))
            .collect()
    }

    async fn with_rpc_permit<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let _permit = self
            .rpc
            .acquire()
            .await
            .map_err(|_| SagaError::Unavailable("downstream call pool closed".to_string()))?;
        call.await
    }

    async fn compensate(&self, code: &OrderCode, attempted: Attempted, reason: &str) {
        if attempted.regular
            && let Err(e) = self.services.regular.release_regular(code).await
        {
            tracing::error!(order_code = %code, error = %e, "regular stock release failed, manual intervention required");
        }
        if attempted.limited
            && let Err(e) = self.services.limited.release_limited(code).await
        {
            tracing::error!(order_code = %code, error = %e, "limited stock release failed, manual intervention required");
        }
        match self.services.orders.mark_failed(code, reason).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(order_code = %code, "order already left CREATING"),
            Err(e) => {
                tracing::error!(order_code = %code, error = %e, "marking order failed did not persist, manual intervention required");
            }
        }
    }
}

/// Merges a live quote with the cart snapshot, field by field.
fn price_line(line: &CartLine, quote: Option<&PriceQuote>) -> OrderLineItem {
    let snapshot_original = line.original_price.unwrap_or(line.price);
    let (final_price, original_price, campaign) = match quote {
        Some(q) => (
            q.final_price.unwrap_or(line.price),
            q.original_price.unwrap_or(snapshot_original),
            q.campaign,
        ),
        None => (line.price, snapshot_original, line.campaign),
    };
    OrderLineItem {
        product: line.product,
        item: line.item,
        product_name: line.product_name.clone(),
        original_price,
        final_price,
        quantity: line.quantity,
        campaign: campaign.filter(|c| !c.is_regular()),
    }
}

/// Limited lines first, regular lines second.
fn split_lines(lines: &[OrderLineItem]) -> (Vec<StockLine>, Vec<StockLine>) {
    let mut limited = Vec::new();
    let mut regular = Vec::new();
    for line in lines {
        match line.campaign {
            Some(campaign) => limited.push(StockLine {
                campaign,
                item: line.item,
                quantity: line.quantity,
            }),
            None => regular.push(StockLine {
                campaign: CampaignId::REGULAR,
                item: line.item,
                quantity: line.quantity,
            }),
        }
    }
    (limited, regular)
}

/// Bounded executor in front of the pipeline.
///
/// `queue` caps accepted-but-unfinished jobs at workers + queue capacity;
/// `workers` caps how many of them run at once.
#[derive(Clone)]
pub struct PipelineExecutor {
    pipeline: Arc<OrderAssemblyPipeline>,
    workers: Arc<Semaphore>,
    queue: Arc<Semaphore>,
    capacity: usize,
}

impl PipelineExecutor {
    pub fn new(pipeline: OrderAssemblyPipeline, config: &PipelineConfig) -> Self {
        let workers = config.max_concurrency.max(1);
        let capacity = workers + config.queue_capacity;
        Self {
            pipeline: Arc::new(pipeline),
            workers: Arc::new(Semaphore::new(workers)),
            queue: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn pipeline(&self) -> &OrderAssemblyPipeline {
        &self.pipeline
    }

    /// Accepts a job and spawns its assembly.
    ///
    /// Fails fast with [`SagaError::Unavailable`] when the queue is full.
    pub fn submit(&self, job: AssemblyJob) -> Result<JoinHandle<AssemblyOutcome>> {
        let slot: OwnedSemaphorePermit =
            Arc::clone(&self.queue).try_acquire_owned().map_err(|_| {
                metrics::counter!("order_assembly_rejected_total").increment(1);
                SagaError::Unavailable("order pipeline saturated, retry later".to_string())
            })?;

        let workers = Arc::clone(&self.workers);
        let pipeline = Arc::clone(&self.pipeline);
        Ok(tokio::spawn(async move {
            let _slot = slot;
            let Ok(_worker) = workers.acquire_owned().await else {
                return AssemblyOutcome::Failed("order pipeline closed".to_string());
            };
            pipeline.process(job).await
        }))
    }

    /// Jobs accepted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.queue.available_permits()
    }

    /// Waits until every accepted job has finished.
    pub async fn drain(&self) {
        let Ok(permits) = u32::try_from(self.capacity) else {
            return;
        };
        if let Ok(all) = self.queue.acquire_many(permits).await {
            drop(all);
        }
    }
}
