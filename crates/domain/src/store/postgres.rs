use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CampaignId, ItemId, Money, OrderCode, ProductId, UserId};
use outbox::{OutboxMessage, PostgresOutboxStore};
use sqlx::{PgPool, Row, postgres::PgRow};

use super::{OrderStore, assembly_messages};
use crate::order::{
    AssembledOrder, Order, OrderDraft, OrderLineItem, OrderShipment, OrderStatus, PaymentType,
    ShippingMethod, truncate_reason,
};
use crate::{DomainError, Result};

const ORDER_COLUMNS: &str = "id, order_code, user_id, total_amount, discount_amount, \
     shipping_fee, pay_amount, status, payment_type, shipping_method, user_coupon_id, note, \
     fail_reason, paid_at, created_at, updated_at";

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
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

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: i16 = row.try_get("status")?;
        let payment_type: i16 = row.try_get("payment_type")?;
        let shipping_method: i16 = row.try_get("shipping_method")?;

        Ok(Order {
            id: row.try_get("id")?,
            code: OrderCode::new(row.try_get::<String, _>("order_code")?),
            user: UserId::new(row.try_get("user_id")?),
            total_amount: Money::from_cents(row.try_get("total_amount")?),
            discount_amount: Money::from_cents(row.try_get("discount_amount")?),
            shipping_fee: Money::from_cents(row.try_get("shipping_fee")?),
            pay_amount: Money::from_cents(row.try_get("pay_amount")?),
            status: OrderStatus::from_code(status)
                .ok_or_else(|| DomainError::InvalidRow(format!("unknown status {status}")))?,
            payment_type: PaymentType::from_code(payment_type).ok_or_else(|| {
                DomainError::InvalidRow(format!("unknown payment type {payment_type}"))
            })?,
            shipping_method: ShippingMethod::from_code(shipping_method).ok_or_else(|| {
                DomainError::InvalidRow(format!("unknown shipping method {shipping_method}"))
            })?,
            user_coupon_id: row.try_get("user_coupon_id")?,
            note: row.try_get("note")?,
            fail_reason: row.try_get("fail_reason")?,
            paid_at: row.try_get("paid_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_line(row: PgRow) -> Result<OrderLineItem> {
        let quantity: i32 = row.try_get("quantity")?;
        let campaign: Option<i64> = row.try_get("campaign_id")?;
        Ok(OrderLineItem {
            product: ProductId::new(row.try_get("product_id")?),
            item: ItemId::new(row.try_get("item_id")?),
            product_name: row.try_get("product_name")?,
            original_price: Money::from_cents(row.try_get("original_price")?),
            final_price: Money::from_cents(row.try_get("final_price")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| DomainError::InvalidRow(format!("negative quantity {quantity}")))?,
            campaign: campaign.map(CampaignId::new),
        })
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[tracing::instrument(skip(self, draft), fields(order_code = %draft.code))]
    async fn create_skeleton(&self, draft: &OrderDraft) -> Result<Order> {
        let order = Order::skeleton(draft);
        let sql = format!(
            r#"
            INSERT INTO orders
                (order_code, user_id, total_amount, discount_amount, shipping_fee, pay_amount,
                 status, payment_type, shipping_method, user_coupon_id, note)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {ORDER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(order.code.as_str())
            .bind(order.user.get())
            .bind(order.total_amount.cents())
            .bind(order.discount_amount.cents())
            .bind(order.shipping_fee.cents())
            .bind(order.pay_amount.cents())
            .bind(order.status.code())
            .bind(order.payment_type.code())
            .bind(order.shipping_method.code())
            .bind(order.user_coupon_id)
            .bind(order.note.as_deref())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("uq_orders_code")
                {
                    return DomainError::DuplicateOrderCode(draft.code.clone());
                }
                DomainError::Database(e)
            })?;

        Self::row_to_order(row)
    }

    async fn find_by_code(&self, code: &OrderCode) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_code = $1");
        let row = sqlx::query(&sql)
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_order).transpose()
    }

    async fn find_recent_creating(
        &self,
        user: UserId,
        since: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE user_id = $1 AND status = $2 AND created_at >= $3 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(user.get())
            .bind(OrderStatus::Creating.code())
            .bind(since)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_order).transpose()
    }

    #[tracing::instrument(skip(self, code, assembled), fields(order_code = %code))]
    async fn complete_assembly(
        &self,
        code: &OrderCode,
        assembled: &AssembledOrder,
    ) -> Result<bool> {
        let amounts = &assembled.amounts;
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE orders
            SET status = $3, total_amount = $4, discount_amount = $5, shipping_fee = $6,
                pay_amount = $7, updated_at = NOW()
            WHERE order_code = $1 AND status = $2
            RETURNING {ORDER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(code.as_str())
            .bind(OrderStatus::Creating.code())
            .bind(OrderStatus::PendingPayment.code())
            .bind(amounts.total.cents())
            .bind(amounts.discount.cents())
            .bind(amounts.shipping_fee.cents())
            .bind(amounts.pay.cents())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(false);
        };
        let order = Self::row_to_order(row)?;

        for line in &assembled.lines {
            let quantity = i32::try_from(line.quantity)
                .map_err(|_| DomainError::InvalidRow(format!("quantity {}", line.quantity)))?;
            sqlx::query(
                r#"
                INSERT INTO order_line_items
                    (order_id, order_code, product_id, item_id, product_name,
                     original_price, final_price, quantity, campaign_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(order.id)
            .bind(code.as_str())
            .bind(line.product.get())
            .bind(line.item.get())
            .bind(&line.product_name)
            .bind(line.original_price.cents())
            .bind(line.final_price.cents())
            .bind(quantity)
            .bind(line.campaign.map(|c| c.get()))
            .execute(&mut *tx)
            .await?;
        }

        let shipment = &assembled.shipment;
        sqlx::query(
            r#"
            INSERT INTO order_shipments
                (order_id, order_code, shipping_method, receiver_name, receiver_phone,
                 receiver_address)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.id)
        .bind(code.as_str())
        .bind(shipment.shipping_method.code())
        .bind(&shipment.receiver_name)
        .bind(&shipment.receiver_phone)
        .bind(&shipment.receiver_address)
        .execute(&mut *tx)
        .await?;

        PostgresOutboxStore::insert_in_tx(&mut *tx, &assembly_messages(&order, assembled))
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn mark_failed(&self, code: &OrderCode, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, fail_reason = $4, updated_at = NOW()
            WHERE order_code = $1 AND status = $2
            "#,
        )
        .bind(code.as_str())
        .bind(OrderStatus::Creating.code())
        .bind(OrderStatus::CreateFailed.code())
        .bind(truncate_reason(reason))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_stale_creating(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status = $1 AND created_at < $2 ORDER BY created_at ASC, id ASC LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(OrderStatus::Creating.code())
            .bind(before)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_order).collect()
    }

    #[tracing::instrument(skip(self, code), fields(order_code = %code))]
    async fn cancel(&self, code: &OrderCode) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE orders SET status = $3, updated_at = NOW() WHERE order_code = $1 AND status = $2",
        )
        .bind(code.as_str())
        .bind(OrderStatus::PendingPayment.code())
        .bind(OrderStatus::Cancelled.code())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let killed = PostgresOutboxStore::kill_pending_coupon_in_tx(&mut *tx, code).await?;
        if killed > 0 {
            tracing::info!(killed, "undelivered coupon-use rows killed");
        }
        PostgresOutboxStore::insert_in_tx(&mut *tx, &[OutboxMessage::order_cancelled(code)])
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn mark_paid(&self, code: &OrderCode, paid_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, paid_at = $4, updated_at = NOW()
            WHERE order_code = $1 AND status = $2
            "#,
        )
        .bind(code.as_str())
        .bind(OrderStatus::PendingPayment.code())
        .bind(OrderStatus::Processing.code())
        .bind(paid_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn line_items(&self, code: &OrderCode) -> Result<Vec<OrderLineItem>> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, item_id, product_name, original_price, final_price, quantity,
                   campaign_id
            FROM order_line_items
            WHERE order_code = $1
            ORDER BY id
            "#,
        )
        .bind(code.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_line).collect()
    }

    async fn shipment(&self, code: &OrderCode) -> Result<Option<OrderShipment>> {
        let row = sqlx::query(
            r#"
            SELECT shipping_method, receiver_name, receiver_phone, receiver_address
            FROM order_shipments
            WHERE order_code = $1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let method: i16 = row.try_get("shipping_method")?;
        Ok(Some(OrderShipment {
            shipping_method: ShippingMethod::from_code(method).ok_or_else(|| {
                DomainError::InvalidRow(format!("unknown shipping method {method}"))
            })?,
            receiver_name: row.try_get("receiver_name")?,
            receiver_phone: row.try_get("receiver_phone")?,
            receiver_address: row.try_get("receiver_address")?,
        }))
    }
}
