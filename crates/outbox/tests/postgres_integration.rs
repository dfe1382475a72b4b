//! PostgreSQL integration tests for the outbox store.
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p outbox --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::OrderCode;
use outbox::{FailureUpdate, OutboxMessage, OutboxStatus, OutboxStore, PostgresOutboxStore};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_purchase_schema.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresOutboxStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE outbox_messages")
        .execute(&pool)
        .await
        .unwrap();

    PostgresOutboxStore::new(pool)
}

fn code() -> OrderCode {
    OrderCode::new("pg-order-1")
}

async fn backdate(store: &PostgresOutboxStore, id: i64, seconds: i64) {
    sqlx::query(
        "UPDATE outbox_messages SET updated_at = NOW() - make_interval(secs => $2) WHERE id = $1",
    )
    .bind(id)
    .bind(seconds as f64)
    .execute(store.pool())
    .await
    .unwrap();
}

async fn fail_once(store: &PostgresOutboxStore, id: i64, next_retry_at: chrono::DateTime<Utc>) {
    assert!(store.claim(id, OutboxStatus::New).await.unwrap());
    let update = FailureUpdate {
        retry_count: 1,
        next_retry_at,
        status: OutboxStatus::Failed,
    };
    assert!(
        store
            .mark_failed(id, OutboxStatus::Processing, update)
            .await
            .unwrap()
    );
}

#[tokio::test]
#[serial]
async fn claim_is_compare_and_set() {
    let store = get_test_store().await;
    let id = store
        .insert(&[OutboxMessage::order_delay(&code())])
        .await
        .unwrap()[0];

    assert!(store.claim(id, OutboxStatus::New).await.unwrap());
    assert!(!store.claim(id, OutboxStatus::New).await.unwrap());
    assert!(!store.claim(id, OutboxStatus::Failed).await.unwrap());
    assert!(!store.claim(id + 1_000, OutboxStatus::New).await.unwrap());

    let row = store.get(id).await.unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Processing);
}

#[tokio::test]
#[serial]
async fn concurrent_claims_have_one_winner() {
    let store = get_test_store().await;
    let id = store
        .insert(&[OutboxMessage::order_delay(&code())])
        .await
        .unwrap()[0];

    let attempts = (0..8).map(|_| {
        let store = store.clone();
        tokio::spawn(async move { store.claim(id, OutboxStatus::New).await.unwrap() })
    });
    let mut winners = 0;
    for attempt in attempts {
        if attempt.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
#[serial]
async fn reclaim_only_touches_stale_processing_rows() {
    let store = get_test_store().await;
    let ids = store
        .insert(&[
            OutboxMessage::order_delay(&code()),
            OutboxMessage::order_delay(&code()),
            OutboxMessage::order_cancelled(&code()),
        ])
        .await
        .unwrap();
    store.claim(ids[0], OutboxStatus::New).await.unwrap();
    store.claim(ids[1], OutboxStatus::New).await.unwrap();
    backdate(&store, ids[0], 120).await;
    // Old but never claimed: nothing to reclaim.
    backdate(&store, ids[2], 120).await;

    let cutoff = Utc::now() - chrono::Duration::seconds(60);
    assert_eq!(store.reclaim_stale(cutoff).await.unwrap(), 1);
    assert_eq!(store.reclaim_stale(cutoff).await.unwrap(), 0);

    assert_eq!(store.get(ids[0]).await.unwrap().unwrap().status, OutboxStatus::New);
    assert_eq!(
        store.get(ids[1]).await.unwrap().unwrap().status,
        OutboxStatus::Processing
    );
    let fresh: Vec<i64> = store
        .fetch_new(10)
        .await
        .unwrap()
        .iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(fresh, vec![ids[0], ids[2]]);
}

#[tokio::test]
#[serial]
async fn fetch_retryable_waits_for_due_time() {
    let store = get_test_store().await;
    let ids = store
        .insert(&[
            OutboxMessage::order_delay(&code()),
            OutboxMessage::order_delay(&code()),
        ])
        .await
        .unwrap();

    let now = Utc::now();
    fail_once(&store, ids[0], now - chrono::Duration::seconds(1)).await;
    fail_once(&store, ids[1], now + chrono::Duration::seconds(30)).await;

    let due = store.fetch_retryable(now, 10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, ids[0]);
    assert_eq!(due[0].retry_count, 1);
    assert_eq!(due[0].status, OutboxStatus::Failed);

    let later = store
        .fetch_retryable(now + chrono::Duration::seconds(30), 10)
        .await
        .unwrap();
    assert_eq!(later.len(), 2);
    assert_eq!(store.fetch_retryable(now, 0).await.unwrap().len(), 0);

    assert!(store.claim(ids[0], OutboxStatus::Failed).await.unwrap());
}

#[tokio::test]
#[serial]
async fn mark_sent_accepts_every_live_state() {
    let store = get_test_store().await;
    let ids = store
        .insert(&[
            OutboxMessage::order_delay(&code()),
            OutboxMessage::order_delay(&code()),
            OutboxMessage::order_delay(&code()),
            OutboxMessage::coupon_use(4, &code()),
        ])
        .await
        .unwrap();

    // NEW
    assert!(store.mark_sent(ids[0]).await.unwrap());

    // FAILED
    fail_once(&store, ids[1], Utc::now()).await;
    assert!(store.mark_sent(ids[1]).await.unwrap());

    // PROCESSING
    store.claim(ids[2], OutboxStatus::New).await.unwrap();
    assert!(store.mark_sent(ids[2]).await.unwrap());

    // DEAD stays dead, SENT stays sent.
    assert_eq!(store.kill_pending_coupon(&code()).await.unwrap(), 1);
    assert!(!store.mark_sent(ids[3]).await.unwrap());
    assert!(!store.mark_sent(ids[0]).await.unwrap());

    let statuses: Vec<OutboxStatus> = store
        .list_for_order(&code())
        .await
        .unwrap()
        .iter()
        .map(|m| m.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            OutboxStatus::Sent,
            OutboxStatus::Sent,
            OutboxStatus::Sent,
            OutboxStatus::Dead,
        ]
    );
}

#[tokio::test]
#[serial]
async fn insert_in_tx_rolls_back_with_its_transaction() {
    let store = get_test_store().await;

    let mut tx = store.pool().begin().await.unwrap();
    let ids = PostgresOutboxStore::insert_in_tx(&mut *tx, &[OutboxMessage::order_delay(&code())])
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);
    tx.rollback().await.unwrap();
    assert!(store.list_for_order(&code()).await.unwrap().is_empty());

    let mut tx = store.pool().begin().await.unwrap();
    PostgresOutboxStore::insert_in_tx(&mut *tx, &[OutboxMessage::order_cancelled(&code())])
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(store.list_for_order(&code()).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn failed_batch_insert_writes_nothing() {
    let store = get_test_store().await;
    let first = OutboxMessage::order_delay(&code());
    let mut duplicate = OutboxMessage::order_cancelled(&code());
    duplicate.message_id = first.message_id;

    assert!(store.insert(&[first, duplicate]).await.is_err());
    assert!(store.list_for_order(&code()).await.unwrap().is_empty());
}
