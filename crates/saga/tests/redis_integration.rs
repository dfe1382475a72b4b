//! Redis integration tests for purchase statuses and order tokens.
//!
//! These tests use a shared Redis container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p saga --test redis_integration
//! ```

use std::sync::Arc;
use std::time::Duration;

use common::{ItemId, OrderCode, UserId};
use saga::{
    PurchaseStatus, PurchaseStatusStore, RedisPurchaseStatusStore, RedisTokenStore, TokenStore,
    flash_sale_status_key,
};
use serial_test::serial;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Redis>,
    url: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Redis::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(6379).await.unwrap();
            let url = format!("redis://{}:{}", host, port);

            Arc::new(ContainerInfo { container, url })
        })
        .await
        .clone()
}

async fn flushed_url() -> String {
    let info = get_container_info().await;
    let client = redis::Client::open(info.url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await.unwrap();
    info.url.clone()
}

const TTL: Duration = Duration::from_secs(60);

#[tokio::test]
#[serial]
async fn claim_is_exclusive_until_failed() {
    let store = RedisPurchaseStatusStore::new(&flushed_url().await).await.unwrap();
    let key = flash_sale_status_key(UserId::new(1), ItemId::new(9));

    assert_eq!(store.claim(&key, TTL).await.unwrap(), None);
    assert_eq!(
        store.claim(&key, TTL).await.unwrap(),
        Some(PurchaseStatus::Pending)
    );

    let created = PurchaseStatus::Created(OrderCode::new("FS-1"));
    store.set(&key, &created, TTL).await.unwrap();
    assert_eq!(store.claim(&key, TTL).await.unwrap(), Some(created.clone()));
    assert_eq!(store.get(&key).await.unwrap(), Some(created));

    store.set(&key, &PurchaseStatus::Failed, TTL).await.unwrap();
    assert_eq!(store.claim(&key, TTL).await.unwrap(), None);
    assert_eq!(store.get(&key).await.unwrap(), Some(PurchaseStatus::Pending));

    store.remove(&key).await.unwrap();
    assert_eq!(store.get(&key).await.unwrap(), None);
}

#[tokio::test]
#[serial]
async fn concurrent_claims_have_one_winner() {
    let store = RedisPurchaseStatusStore::new(&flushed_url().await).await.unwrap();
    let key = flash_sale_status_key(UserId::new(2), ItemId::new(9));

    let attempts: Vec<_> = (0..10)
        .map(|_| {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move { store.claim(&key, TTL).await.unwrap() })
        })
        .collect();

    let mut winners = 0;
    for attempt in attempts {
        if attempt.await.unwrap().is_none() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
#[serial]
async fn order_token_is_single_use() {
    let tokens = RedisTokenStore::new(&flushed_url().await).await.unwrap();

    tokens.put("order:token:1:abc", TTL).await.unwrap();
    assert!(tokens.take("order:token:1:abc").await.unwrap());
    assert!(!tokens.take("order:token:1:abc").await.unwrap());
    assert!(!tokens.take("order:token:1:never-issued").await.unwrap());
}
