//! Redis integration tests for the fast ledger's reserve script.
//!
//! These tests use a shared Redis container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p inventory --test redis_integration
//! ```

use std::sync::Arc;

use common::{CampaignId, ItemId};
use inventory::{FastStockLedger, RedisFastLedger, ReserveOutcome};
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

async fn get_test_ledger() -> RedisFastLedger {
    let info = get_container_info().await;

    let client = redis::Client::open(info.url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await.unwrap();

    RedisFastLedger::new(&info.url).await.unwrap()
}

const CAMPAIGN: CampaignId = CampaignId::new(5);
const ITEM: ItemId = ItemId::new(50);

#[tokio::test]
#[serial]
async fn reserve_reports_missing_short_and_taken() {
    let ledger = get_test_ledger().await;

    assert_eq!(
        ledger.reserve(CAMPAIGN, ITEM, 1).await.unwrap(),
        ReserveOutcome::Missing
    );
    assert_eq!(ledger.peek(CAMPAIGN, ITEM).await.unwrap(), None);
    assert!(!ledger.has_any_keys().await.unwrap());

    ledger.prepare(CAMPAIGN, ITEM, 3).await.unwrap();
    assert!(ledger.has_any_keys().await.unwrap());

    assert_eq!(
        ledger.reserve(CAMPAIGN, ITEM, 4).await.unwrap(),
        ReserveOutcome::Insufficient
    );
    assert_eq!(ledger.peek(CAMPAIGN, ITEM).await.unwrap(), Some(3));

    assert_eq!(
        ledger.reserve(CAMPAIGN, ITEM, 3).await.unwrap(),
        ReserveOutcome::Reserved { remaining: 0 }
    );
    assert_eq!(
        ledger.reserve(CAMPAIGN, ITEM, 1).await.unwrap(),
        ReserveOutcome::Insufficient
    );

    ledger.release(CAMPAIGN, ITEM, 2).await.unwrap();
    assert_eq!(ledger.peek(CAMPAIGN, ITEM).await.unwrap(), Some(2));
}

#[tokio::test]
#[serial]
async fn concurrent_reserves_never_oversell() {
    let ledger = get_test_ledger().await;
    ledger.prepare(CAMPAIGN, ITEM, 10).await.unwrap();

    let attempts: Vec<_> = (0..25)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.reserve(CAMPAIGN, ITEM, 1).await.unwrap() })
        })
        .collect();

    let mut reserved = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            ReserveOutcome::Reserved { remaining } => {
                assert!(remaining >= 0);
                reserved += 1;
            }
            ReserveOutcome::Insufficient => {}
            ReserveOutcome::Missing => panic!("key was prepared"),
        }
    }
    assert_eq!(reserved, 10);
    assert_eq!(ledger.peek(CAMPAIGN, ITEM).await.unwrap(), Some(0));
}

#[tokio::test]
#[serial]
async fn prepare_overwrites_and_keys_are_scoped_per_campaign() {
    let ledger = get_test_ledger().await;
    ledger.prepare(CAMPAIGN, ITEM, 1).await.unwrap();
    ledger.prepare(CAMPAIGN, ITEM, 7).await.unwrap();
    ledger.prepare(CampaignId::REGULAR, ITEM, 2).await.unwrap();

    assert_eq!(
        ledger.reserve(CAMPAIGN, ITEM, 5).await.unwrap(),
        ReserveOutcome::Reserved { remaining: 2 }
    );
    assert_eq!(
        ledger.peek(CampaignId::REGULAR, ITEM).await.unwrap(),
        Some(2)
    );
}
