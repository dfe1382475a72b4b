use async_trait::async_trait;
use common::{CampaignId, ItemId, OrderCode, ProductId, UserId};
use sqlx::{PgPool, Row, postgres::PgRow};

use super::StockStore;
use crate::model::{DeductionRequest, ReleaseScope, ReservationEntry, StockItem};
use crate::{InventoryError, Result};

const RESERVATION_COLUMNS: &str =
    "campaign_id, item_id, user_id, order_code, quantity, created_at";

/// PostgreSQL-backed stock store.
#[derive(Clone)]
pub struct PostgresStockStore {
    pool: PgPool,
}

impl PostgresStockStore {
    /// Creates a new PostgreSQL stock store.
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

    fn row_to_item(row: PgRow) -> Result<StockItem> {
        Ok(StockItem {
            campaign: CampaignId::new(row.try_get("campaign_id")?),
            item: ItemId::new(row.try_get("item_id")?),
            product: ProductId::new(row.try_get("product_id")?),
            stock: row.try_get("stock")?,
            sold: row.try_get("sold")?,
            per_user_limit: row.try_get("per_user_limit")?,
        })
    }

    fn row_to_reservation(row: PgRow) -> Result<ReservationEntry> {
        let quantity: i64 = row.try_get("quantity")?;
        Ok(ReservationEntry {
            campaign: CampaignId::new(row.try_get("campaign_id")?),
            item: ItemId::new(row.try_get("item_id")?),
            user: UserId::new(row.try_get("user_id")?),
            order_code: OrderCode::new(row.try_get::<String, _>("order_code")?),
            quantity: u32::try_from(quantity)
                .map_err(|e| InventoryError::Database(sqlx::Error::Decode(Box::new(e))))?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn scope_filter(scope: ReleaseScope) -> &'static str {
        match scope {
            ReleaseScope::All => "",
            ReleaseScope::Regular => " AND campaign_id = 0",
            ReleaseScope::Limited => " AND campaign_id <> 0",
        }
    }
}

#[async_trait]
impl StockStore for PostgresStockStore {
    async fn upsert_item(&self, item: StockItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_items (campaign_id, item_id, product_id, stock, sold, per_user_limit)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (campaign_id, item_id) DO UPDATE
            SET product_id = EXCLUDED.product_id,
                stock = EXCLUDED.stock,
                sold = EXCLUDED.sold,
                per_user_limit = EXCLUDED.per_user_limit,
                updated_at = NOW()
            "#,
        )
        .bind(item.campaign.get())
        .bind(item.item.get())
        .bind(item.product.get())
        .bind(item.stock)
        .bind(item.sold)
        .bind(item.per_user_limit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_item(&self, campaign: CampaignId, item: ItemId) -> Result<Option<StockItem>> {
        let row = sqlx::query(
            r#"
            SELECT campaign_id, item_id, product_id, stock, sold, per_user_limit
            FROM stock_items
            WHERE campaign_id = $1 AND item_id = $2
            "#,
        )
        .bind(campaign.get())
        .bind(item.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_item).transpose()
    }

    async fn list_items(&self) -> Result<Vec<StockItem>> {
        let rows = sqlx::query(
            r#"
            SELECT campaign_id, item_id, product_id, stock, sold, per_user_limit
            FROM stock_items
            ORDER BY campaign_id, item_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    async fn find_reservation(
        &self,
        order_code: &OrderCode,
        item: ItemId,
    ) -> Result<Option<ReservationEntry>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservation_log WHERE order_code = $1 AND item_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(order_code.as_str())
            .bind(item.get())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    async fn list_reservations(
        &self,
        order_code: &OrderCode,
        scope: ReleaseScope,
    ) -> Result<Vec<ReservationEntry>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservation_log WHERE order_code = $1{} ORDER BY item_id",
            Self::scope_filter(scope)
        );
        let rows = sqlx::query(&sql)
            .bind(order_code.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn commit_deduction(&self, request: &DeductionRequest) -> Result<ReservationEntry> {
        let campaign = request.campaign.get();
        let item = request.item.get();
        let user = request.user.get();
        let quantity = i64::from(request.quantity);

        let mut tx = self.pool.begin().await?;

        let limit: Option<Option<i64>> = sqlx::query_scalar(
            "SELECT per_user_limit FROM stock_items WHERE campaign_id = $1 AND item_id = $2",
        )
        .bind(campaign)
        .bind(item)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(limit) = limit else {
            return Err(InventoryError::ItemNotFound {
                campaign: request.campaign,
                item: request.item,
            });
        };

        if let Some(limit) = limit {
            // Make sure the counter row exists so FOR UPDATE has something to lock.
            sqlx::query(
                r#"
                INSERT INTO user_purchase_counters (campaign_id, item_id, user_id, purchased)
                VALUES ($1, $2, $3, 0)
                ON CONFLICT (campaign_id, item_id, user_id) DO NOTHING
                "#,
            )
            .bind(campaign)
            .bind(item)
            .bind(user)
            .execute(&mut *tx)
            .await?;

            let purchased: i64 = sqlx::query_scalar(
                r#"
                SELECT purchased FROM user_purchase_counters
                WHERE campaign_id = $1 AND item_id = $2 AND user_id = $3
                FOR UPDATE
                "#,
            )
            .bind(campaign)
            .bind(item)
            .bind(user)
            .fetch_one(&mut *tx)
            .await?;

            if purchased + quantity > limit {
                return Err(InventoryError::LimitExceeded {
                    user: request.user,
                    item: request.item,
                    purchased,
                    limit,
                });
            }
        }

        let updated = sqlx::query(
            r#"
            UPDATE stock_items
            SET stock = stock - $3, sold = sold + $3, updated_at = NOW()
            WHERE campaign_id = $1 AND item_id = $2 AND stock >= $3
            "#,
        )
        .bind(campaign)
        .bind(item)
        .bind(quantity)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(InventoryError::InsufficientStock {
                campaign: request.campaign,
                item: request.item,
                requested: request.quantity,
            });
        }

        let entry = ReservationEntry::from_request(request);
        sqlx::query(
            r#"
            INSERT INTO reservation_log (campaign_id, item_id, user_id, order_code, quantity, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(campaign)
        .bind(item)
        .bind(user)
        .bind(entry.order_code.as_str())
        .bind(quantity)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("uq_reservation_order_item")
            {
                return InventoryError::DuplicateReservation {
                    order_code: request.order_code.clone(),
                    item: request.item,
                };
            }
            InventoryError::Database(e)
        })?;

        // Capped regular items count too, otherwise their cap never binds.
        if !request.campaign.is_regular() || limit.is_some() {
            sqlx::query(
                r#"
                INSERT INTO user_purchase_counters (campaign_id, item_id, user_id, purchased)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (campaign_id, item_id, user_id) DO UPDATE
                SET purchased = user_purchase_counters.purchased + EXCLUDED.purchased,
                    updated_at = NOW()
                "#,
            )
            .bind(campaign)
            .bind(item)
            .bind(user)
            .bind(quantity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(entry)
    }

    async fn take_reservation(
        &self,
        order_code: &OrderCode,
        item: ItemId,
    ) -> Result<Option<ReservationEntry>> {
        let mut tx = self.pool.begin().await?;

        // Delete-then-act: only the caller whose DELETE returns the row restores stock.
        let sql = format!(
            "DELETE FROM reservation_log WHERE order_code = $1 AND item_id = $2 RETURNING {RESERVATION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(order_code.as_str())
            .bind(item.get())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let entry = Self::row_to_reservation(row)?;
        let quantity = i64::from(entry.quantity);

        sqlx::query(
            r#"
            UPDATE stock_items
            SET stock = stock + $3, sold = GREATEST(sold - $3, 0), updated_at = NOW()
            WHERE campaign_id = $1 AND item_id = $2
            "#,
        )
        .bind(entry.campaign.get())
        .bind(entry.item.get())
        .bind(quantity)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE user_purchase_counters
            SET purchased = GREATEST(purchased - $4, 0), updated_at = NOW()
            WHERE campaign_id = $1 AND item_id = $2 AND user_id = $3
            "#,
        )
        .bind(entry.campaign.get())
        .bind(entry.item.get())
        .bind(entry.user.get())
        .bind(quantity)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(entry))
    }

    async fn purchased(&self, campaign: CampaignId, item: ItemId, user: UserId) -> Result<i64> {
        let purchased: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT purchased FROM user_purchase_counters
            WHERE campaign_id = $1 AND item_id = $2 AND user_id = $3
            "#,
        )
        .bind(campaign.get())
        .bind(item.get())
        .bind(user.get())
        .fetch_optional(&self.pool)
        .await?;

        Ok(purchased.unwrap_or(0))
    }
}
