//! Per-(user, item) status of queued flash-sale purchases.
//!
//! The buyer polls this key while the purchase waits in the queue. Values
//! are `PENDING`, `FAILED`, or the order code once the order exists.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::OrderCode;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::SagaError;

const PENDING: &str = "PENDING";
const FAILED: &str = "FAILED";

/// Claims the key unless a live status other than FAILED is already there,
/// in which case that status is returned untouched.
const CLAIM_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current and current ~= 'FAILED' then
    return current
end
redis.call('SET', KEYS[1], 'PENDING', 'EX', ARGV[1])
return false
"#;

/// Where a queued purchase stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseStatus {
    /// Waiting for the order consumer.
    Pending,
    /// Dead-lettered; the hold was given back.
    Failed,
    /// The order exists.
    Created(OrderCode),
}

impl PurchaseStatus {
    pub fn encode(&self) -> &str {
        match self {
            PurchaseStatus::Pending => PENDING,
            PurchaseStatus::Failed => FAILED,
            PurchaseStatus::Created(code) => code.as_str(),
        }
    }

    pub fn decode(raw: &str) -> Self {
        match raw {
            PENDING => PurchaseStatus::Pending,
            FAILED => PurchaseStatus::Failed,
            code => PurchaseStatus::Created(OrderCode::new(code)),
        }
    }

    /// Label shown to the buyer.
    pub fn label(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "QUEUED",
            PurchaseStatus::Failed => "FAILED",
            PurchaseStatus::Created(_) => "CREATED",
        }
    }
}

/// Key-value store for purchase statuses.
#[async_trait]
pub trait PurchaseStatusStore: Send + Sync {
    /// Sets `key` to PENDING for `ttl`, unless it already holds a live
    /// status other than FAILED. Returns that status when it does.
    async fn claim(&self, key: &str, ttl: Duration) -> Result<Option<PurchaseStatus>, SagaError>;

    async fn get(&self, key: &str) -> Result<Option<PurchaseStatus>, SagaError>;

    async fn set(&self, key: &str, status: &PurchaseStatus, ttl: Duration)
    -> Result<(), SagaError>;

    async fn remove(&self, key: &str) -> Result<(), SagaError>;
}

#[async_trait]
impl<T: PurchaseStatusStore + ?Sized> PurchaseStatusStore for Arc<T> {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<Option<PurchaseStatus>, SagaError> {
        (**self).claim(key, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<PurchaseStatus>, SagaError> {
        (**self).get(key).await
    }

    async fn set(
        &self,
        key: &str,
        status: &PurchaseStatus,
        ttl: Duration,
    ) -> Result<(), SagaError> {
        (**self).set(key, status, ttl).await
    }

    async fn remove(&self, key: &str) -> Result<(), SagaError> {
        (**self).remove(key).await
    }
}

/// In-memory status store for testing. Expiry follows tokio's clock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPurchaseStatusStore {
    entries: Arc<Mutex<HashMap<String, (PurchaseStatus, Instant)>>>,
}

impl InMemoryPurchaseStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PurchaseStatusStore for InMemoryPurchaseStatusStore {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<Option<PurchaseStatus>, SagaError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if let Some((status, expires)) = entries.get(key)
            && *expires > now
            && *status != PurchaseStatus::Failed
        {
            return Ok(Some(status.clone()));
        }
        entries.insert(key.to_string(), (PurchaseStatus::Pending, now + ttl));
        Ok(None)
    }

    async fn get(&self, key: &str) -> Result<Option<PurchaseStatus>, SagaError> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .await
            .get(key)
            .filter(|(_, expires)| *expires > now)
            .map(|(status, _)| status.clone()))
    }

    async fn set(
        &self,
        key: &str,
        status: &PurchaseStatus,
        ttl: Duration,
    ) -> Result<(), SagaError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (status.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), SagaError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// Status store in Redis; `claim` is one Lua script.
#[derive(Clone)]
pub struct RedisPurchaseStatusStore {
    conn_manager: ConnectionManager,
    claim_script: Script,
}

impl RedisPurchaseStatusStore {
    /// Connects to Redis at `redis_url`.
    pub async fn new(redis_url: &str) -> Result<Self, SagaError> {
        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;
        Ok(Self::from_manager(conn_manager))
    }

    /// Wraps an existing connection manager.
    pub fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            claim_script: Script::new(CLAIM_SCRIPT),
        }
    }
}

#[async_trait]
impl PurchaseStatusStore for RedisPurchaseStatusStore {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<Option<PurchaseStatus>, SagaError> {
        let mut conn = self.conn_manager.clone();
        let current: Option<String> = self
            .claim_script
            .key(key)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(current.as_deref().map(PurchaseStatus::decode))
    }

    async fn get(&self, key: &str) -> Result<Option<PurchaseStatus>, SagaError> {
        let mut conn = self.conn_manager.clone();
        let raw: Option<String> = conn.get(key).await?;
        Ok(raw.as_deref().map(PurchaseStatus::decode))
    }

    async fn set(
        &self,
        key: &str,
        status: &PurchaseStatus,
        ttl: Duration,
    ) -> Result<(), SagaError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .set_ex(key, status.encode(), ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), SagaError> {
        let mut conn = self.conn_manager.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_codec() {
        assert_eq!(PurchaseStatus::decode("PENDING"), PurchaseStatus::Pending);
        assert_eq!(PurchaseStatus::decode("FAILED"), PurchaseStatus::Failed);
        let created = PurchaseStatus::decode("abc123");
        assert_eq!(created, PurchaseStatus::Created(OrderCode::new("abc123")));
        assert_eq!(created.encode(), "abc123");
        assert_eq!(created.label(), "CREATED");
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_failed() {
        let store = InMemoryPurchaseStatusStore::new();
        assert_eq!(store.claim("k", TTL).await.unwrap(), None);
        assert_eq!(
            store.claim("k", TTL).await.unwrap(),
            Some(PurchaseStatus::Pending)
        );

        store.set("k", &PurchaseStatus::Failed, TTL).await.unwrap();
        assert_eq!(store.claim("k", TTL).await.unwrap(), None);
        assert_eq!(store.get("k").await.unwrap(), Some(PurchaseStatus::Pending));

        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_status_is_gone() {
        let store = InMemoryPurchaseStatusStore::new();
        let created = PurchaseStatus::Created(OrderCode::new("abc"));
        store.set("k", &created, TTL).await.unwrap();
        assert_eq!(store.claim("k", TTL).await.unwrap(), Some(created));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.claim("k", TTL).await.unwrap(), None);
    }
}
