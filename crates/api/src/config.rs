//! Application configuration loaded from environment variables.

use std::str::FromStr;

use domain::ShippingConfig;
use inventory::RewarmConfig;
use outbox::RelayConfig;
use saga::{PipelineConfig, SweeperConfig};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Unset `DATABASE_URL`, `REDIS_URL` or `AMQP_URL` selects the in-memory
/// backend for that concern.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub redis_url: Option<String>,
    pub amqp_url: Option<String>,
    /// How long an unpaid order lives before the delayed cancel fires.
    pub payment_timeout_secs: u64,
    pub shipping: ShippingConfig,
    pub pipeline: PipelineConfig,
    pub relay: RelayConfig,
    pub sweeper: SweeperConfig,
    pub rewarm: RewarmConfig,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(d.host),
            port: env_or("PORT", d.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(d.log_level),
            log_format: env_or("LOG_FORMAT", d.log_format),
            database_url: env_opt("DATABASE_URL"),
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", d.database_max_connections),
            redis_url: env_opt("REDIS_URL"),
            amqp_url: env_opt("AMQP_URL"),
            payment_timeout_secs: env_or("PAYMENT_TIMEOUT_SECS", d.payment_timeout_secs),
            shipping: ShippingConfig {
                free_threshold_cents: env_or(
                    "SHIPPING_FREE_THRESHOLD_CENTS",
                    d.shipping.free_threshold_cents,
                ),
                home_delivery_fee_cents: env_or(
                    "SHIPPING_HOME_DELIVERY_FEE_CENTS",
                    d.shipping.home_delivery_fee_cents,
                ),
                store_fee_cents: env_or("SHIPPING_STORE_FEE_CENTS", d.shipping.store_fee_cents),
            },
            pipeline: PipelineConfig {
                max_concurrency: env_or("PIPELINE_MAX_CONCURRENCY", d.pipeline.max_concurrency),
                queue_capacity: env_or("PIPELINE_QUEUE_CAPACITY", d.pipeline.queue_capacity),
                rpc_max_concurrency: env_or("RPC_MAX_CONCURRENCY", d.pipeline.rpc_max_concurrency),
            },
            relay: RelayConfig {
                interval_secs: env_or("RELAY_INTERVAL_SECS", d.relay.interval_secs),
                batch_size: env_or("RELAY_BATCH_SIZE", d.relay.batch_size),
                reclaim_after_secs: env_or("RELAY_RECLAIM_SECS", d.relay.reclaim_after_secs),
                backoff_base_secs: env_or("RELAY_BACKOFF_BASE_SECS", d.relay.backoff_base_secs),
            },
            sweeper: SweeperConfig {
                interval_secs: env_or("SWEEPER_INTERVAL_SECS", d.sweeper.interval_secs),
                timeout_secs: env_or("SWEEPER_TIMEOUT_SECS", d.sweeper.timeout_secs),
                ..d.sweeper
            },
            rewarm: RewarmConfig {
                interval_secs: env_or("REWARM_INTERVAL_SECS", d.rewarm.interval_secs),
                ..d.rewarm
            },
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 10,
            redis_url: None,
            amqp_url: None,
            payment_timeout_secs: 30 * 60,
            shipping: ShippingConfig::default(),
            pipeline: PipelineConfig::default(),
            relay: RelayConfig::default(),
            sweeper: SweeperConfig::default(),
            rewarm: RewarmConfig::default(),
        }
    }
}
