//! Stale-order sweeper.
//!
//! Fails orders stuck in `CREATING`, e.g. after a crash mid-assembly. It
//! only flips status; a late pipeline that finds its order failed runs its
//! own compensation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use domain::OrderStore;
use serde::Deserialize;
use tokio::sync::watch;

use crate::error::Result;

/// Reason recorded on swept orders.
pub const STALE_ORDER_REASON: &str = "order assembly timed out (>5min), please resubmit";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub interval_secs: u64,
    /// Orders `CREATING` for longer than this are failed.
    pub timeout_secs: u64,
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            timeout_secs: 300,
            batch_size: 100,
        }
    }
}

#[derive(Clone)]
pub struct StaleOrderSweeper {
    orders: Arc<dyn OrderStore>,
    config: SweeperConfig,
}

impl StaleOrderSweeper {
    pub fn new(orders: Arc<dyn OrderStore>, config: SweeperConfig) -> Self {
        Self { orders, config }
    }

    /// Sweeps once against the current time.
    pub async fn sweep_once(&self) -> Result<usize> {
        self.sweep_once_at(Utc::now()).await
    }

    /// Fails every stale order found as of `now`; returns how many flipped.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let timeout = chrono::Duration::seconds(self.config.timeout_secs as i64);
        let stale = self
            .orders
            .find_stale_creating(now - timeout, self.config.batch_size)
            .await?;

        let mut failed = 0;
        for order in stale {
            if self.orders.mark_failed(&order.code, STALE_ORDER_REASON).await? {
                tracing::warn!(order_code = %order.code, created_at = %order.created_at, "stale order failed");
                failed += 1;
            }
        }
        if failed > 0 {
            metrics::counter!("stale_orders_failed_total").increment(failed as u64);
        }
        Ok(failed)
    }

    /// Sweeps every `interval_secs` until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::error!(error = %e, "stale order sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("stale order sweeper stopped");
    }
}
