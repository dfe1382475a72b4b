use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderCode;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

use super::OutboxStore;
use crate::message::{FailureUpdate, MessageKind, OutboxMessage, OutboxStatus};
use crate::{OutboxError, Result};

const COLUMNS: &str = "id, message_id, kind, order_code, payload, exchange, routing_key, \
                       status, retry_count, max_retry, next_retry_at, created_at, updated_at";

/// PostgreSQL-backed outbox store.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Creates a new PostgreSQL outbox store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts rows on a caller-owned connection, typically `&mut *tx` of
    /// the transaction that performs the state change being announced.
    pub async fn insert_in_tx(
        conn: &mut PgConnection,
        messages: &[OutboxMessage],
    ) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO outbox_messages
                    (message_id, kind, order_code, payload, exchange, routing_key,
                     status, retry_count, max_retry, next_retry_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, NULL)
                RETURNING id
                "#,
            )
            .bind(message.message_id)
            .bind(message.kind.as_str())
            .bind(message.order_code.as_ref().map(|c| c.as_str()))
            .bind(&message.payload)
            .bind(&message.exchange)
            .bind(&message.routing_key)
            .bind(OutboxStatus::New.code())
            .bind(message.max_retry)
            .fetch_one(&mut *conn)
            .await?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Marks undelivered coupon-use rows `DEAD` on a caller-owned connection.
    pub async fn kill_pending_coupon_in_tx(
        conn: &mut PgConnection,
        order_code: &OrderCode,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = $3, updated_at = NOW()
            WHERE order_code = $1 AND kind = $2 AND status IN ($4, $5)
            "#,
        )
        .bind(order_code.as_str())
        .bind(MessageKind::CouponUse.as_str())
        .bind(OutboxStatus::Dead.code())
        .bind(OutboxStatus::New.code())
        .bind(OutboxStatus::Failed.code())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    fn row_to_message(row: PgRow) -> Result<OutboxMessage> {
        let kind: String = row.try_get("kind")?;
        let status: i16 = row.try_get("status")?;
        let order_code: Option<String> = row.try_get("order_code")?;

        Ok(OutboxMessage {
            id: row.try_get("id")?,
            message_id: row.try_get("message_id")?,
            kind: MessageKind::parse(&kind)
                .ok_or_else(|| OutboxError::InvalidRow(format!("unknown kind {kind}")))?,
            order_code: order_code.map(OrderCode::new),
            payload: row.try_get("payload")?,
            exchange: row.try_get("exchange")?,
            routing_key: row.try_get("routing_key")?,
            status: OutboxStatus::from_code(status)
                .ok_or_else(|| OutboxError::InvalidRow(format!("unknown status {status}")))?,
            retry_count: row.try_get("retry_count")?,
            max_retry: row.try_get("max_retry")?,
            next_retry_at: row.try_get("next_retry_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn insert(&self, messages: &[OutboxMessage]) -> Result<Vec<i64>> {
        let mut tx = self.pool.begin().await?;
        let ids = Self::insert_in_tx(&mut *tx, messages).await?;
        tx.commit().await?;
        Ok(ids)
    }

    async fn get(&self, id: i64) -> Result<Option<OutboxMessage>> {
        let sql = format!("SELECT {COLUMNS} FROM outbox_messages WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_message).transpose()
    }

    async fn list_for_order(&self, order_code: &OrderCode) -> Result<Vec<OutboxMessage>> {
        let sql =
            format!("SELECT {COLUMNS} FROM outbox_messages WHERE order_code = $1 ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(order_code.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn reclaim_stale(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = $1, updated_at = NOW()
            WHERE status = $2 AND updated_at < $3
            "#,
        )
        .bind(OutboxStatus::New.code())
        .bind(OutboxStatus::Processing.code())
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_new(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM outbox_messages WHERE status = $1 ORDER BY id ASC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(OutboxStatus::New.code())
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn fetch_retryable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM outbox_messages \
             WHERE status = $1 AND next_retry_at <= $2 ORDER BY id ASC LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(OutboxStatus::Failed.code())
            .bind(now)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn claim(&self, id: i64, expected: OutboxStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE outbox_messages SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(expected.code())
        .bind(OutboxStatus::Processing.code())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_sent(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ($3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(OutboxStatus::Sent.code())
        .bind(OutboxStatus::New.code())
        .bind(OutboxStatus::Failed.code())
        .bind(OutboxStatus::Processing.code())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(
        &self,
        id: i64,
        expected: OutboxStatus,
        update: FailureUpdate,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = $3, retry_count = $4, next_retry_at = $5, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected.code())
        .bind(update.status.code())
        .bind(update.retry_count)
        .bind(update.next_retry_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn kill_pending_coupon(&self, order_code: &OrderCode) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        Self::kill_pending_coupon_in_tx(&mut *conn, order_code).await
    }
}
