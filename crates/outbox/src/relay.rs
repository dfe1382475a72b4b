//! The relay that drains the outbox into the broker.
//!
//! Each cycle reclaims rows stuck in `PROCESSING`, then walks `NEW` rows and
//! due `FAILED` rows. A row is claimed with a compare-and-set before it is
//! published, so concurrent relays never send the same row in one window.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::watch;

use crate::Result;
use crate::message::{OutboxMessage, OutboxStatus};
use crate::publisher::MessagePublisher;
use crate::store::OutboxStore;

/// Relay schedule and retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub interval_secs: u64,
    pub batch_size: usize,
    /// A `PROCESSING` row untouched for this long is returned to `NEW`.
    pub reclaim_after_secs: u64,
    pub backoff_base_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            batch_size: 50,
            reclaim_after_secs: 60,
            backoff_base_secs: 5,
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub reclaimed: u64,
    pub sent: usize,
    pub failed: usize,
    pub dead: usize,
    /// Rows another relay claimed first.
    pub skipped: usize,
}

enum Attempt {
    Sent,
    Failed,
    Dead,
    Skipped,
}

/// Claims, publishes and retries outbox rows.
pub struct MessageRelay<S, P>
where
    S: OutboxStore,
    P: MessagePublisher,
{
    store: S,
    publisher: P,
    config: RelayConfig,
}

impl<S, P> MessageRelay<S, P>
where
    S: OutboxStore,
    P: MessagePublisher,
{
    pub fn new(store: S, publisher: P, config: RelayConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Runs one cycle against the wall clock.
    pub async fn run_cycle(&self) -> Result<RelayReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Runs one cycle as if the time were `now`.
    #[tracing::instrument(skip(self))]
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<RelayReport> {
        let mut report = RelayReport::default();

        let cutoff = now - seconds(self.config.reclaim_after_secs);
        report.reclaimed = self.store.reclaim_stale(cutoff).await?;
        if report.reclaimed > 0 {
            tracing::warn!(count = report.reclaimed, "reclaimed stale outbox rows");
        }

        let fresh = self.store.fetch_new(self.config.batch_size).await?;
        let due = self
            .store
            .fetch_retryable(now, self.config.batch_size)
            .await?;

        for message in fresh.iter().chain(due.iter()) {
            match self.deliver(message, now).await {
                Ok(Attempt::Sent) => report.sent += 1,
                Ok(Attempt::Failed) => report.failed += 1,
                Ok(Attempt::Dead) => report.dead += 1,
                Ok(Attempt::Skipped) => report.skipped += 1,
                Err(e) => {
                    // The row stays PROCESSING and is reclaimed later.
                    tracing::error!(id = message.id, error = %e, "outbox bookkeeping failed");
                }
            }
        }

        if report.sent + report.failed + report.dead > 0 {
            tracing::info!(
                sent = report.sent,
                failed = report.failed,
                dead = report.dead,
                skipped = report.skipped,
                "outbox relay cycle"
            );
        }
        Ok(report)
    }

    async fn deliver(&self, message: &OutboxMessage, now: DateTime<Utc>) -> Result<Attempt> {
        if !self.store.claim(message.id, message.status).await? {
            return Ok(Attempt::Skipped);
        }

        match self.publisher.publish(message).await {
            Ok(()) => {
                if !self.store.mark_sent(message.id).await? {
                    tracing::warn!(id = message.id, "outbox row changed before mark_sent");
                }
                metrics::counter!("outbox_published_total", "kind" => message.kind.as_str())
                    .increment(1);
                Ok(Attempt::Sent)
            }
            Err(e) => {
                let base = Duration::from_secs(self.config.backoff_base_secs);
                let update = message.next_failure(base, now);
                self.store
                    .mark_failed(message.id, OutboxStatus::Processing, update)
                    .await?;

                if update.status == OutboxStatus::Dead {
                    tracing::error!(
                        id = message.id,
                        kind = %message.kind,
                        retries = update.retry_count,
                        error = %e,
                        "outbox message dead, manual intervention required"
                    );
                    metrics::counter!("outbox_dead_total", "kind" => message.kind.as_str())
                        .increment(1);
                    Ok(Attempt::Dead)
                } else {
                    tracing::warn!(
                        id = message.id,
                        kind = %message.kind,
                        retries = update.retry_count,
                        next_retry_at = %update.next_retry_at,
                        error = %e,
                        "outbox publish failed, will retry"
                    );
                    metrics::counter!("outbox_failed_total", "kind" => message.kind.as_str())
                        .increment(1);
                    Ok(Attempt::Failed)
                }
            }
        }
    }

    /// Runs cycles every `interval_secs` until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        tracing::error!(error = %e, "outbox relay cycle failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("outbox relay stopped");
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}
