//! Single-use order tokens.
//!
//! A token is issued when the checkout page loads and consumed by the
//! submit. Consumption is an atomic delete, so two concurrent submits with
//! the same token cannot both succeed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::SagaError;

/// Key-value store for order tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Stores `key` for `ttl`.
    async fn put(&self, key: &str, ttl: Duration) -> Result<(), SagaError>;

    /// Deletes `key`, returning true only if it existed and had not expired.
    async fn take(&self, key: &str) -> Result<bool, SagaError>;
}

/// In-memory token store for testing. Expiry follows tokio's clock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTokenStore {
    tokens: Arc<Mutex<HashMap<String, Instant>>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn token_count(&self) -> usize {
        let now = Instant::now();
        self.tokens
            .lock()
            .await
            .values()
            .filter(|expires| **expires > now)
            .count()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn put(&self, key: &str, ttl: Duration) -> Result<(), SagaError> {
        self.tokens
            .lock()
            .await
            .insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<bool, SagaError> {
        let expires = self.tokens.lock().await.remove(key);
        Ok(expires.is_some_and(|at| at > Instant::now()))
    }
}

/// Token store in Redis (`SET EX` to issue, `DEL` to consume).
#[derive(Clone)]
pub struct RedisTokenStore {
    conn_manager: ConnectionManager,
}

impl RedisTokenStore {
    /// Connects to Redis at `redis_url`.
    pub async fn new(redis_url: &str) -> Result<Self, SagaError> {
        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;
        Ok(Self { conn_manager })
    }

    /// Wraps an existing connection manager.
    pub fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn put(&self, key: &str, ttl: Duration) -> Result<(), SagaError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.set_ex(key, "1", ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<bool, SagaError> {
        let mut conn = self.conn_manager.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }
}
