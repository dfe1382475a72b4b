//! Redis-backed fast ledger.
//!
//! `reserve` runs as one Lua script so the existence check, the
//! sufficiency check and the decrement happen in a single server-side step.

use async_trait::async_trait;
use common::{CampaignId, ItemId};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

use super::{FastStockLedger, ReserveOutcome, STOCK_KEY_PREFIX, stock_key};
use crate::Result;

/// Returns -2 when the key is absent, -1 when stock is short,
/// otherwise the remaining quantity after the decrement.
const RESERVE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return -2
end
local stock = tonumber(redis.call('GET', KEYS[1]))
local qty = tonumber(ARGV[1])
if stock < qty then
    return -1
end
return redis.call('DECRBY', KEYS[1], qty)
"#;

const SCAN_PAGE: usize = 100;

/// Fast ledger stored in Redis.
#[derive(Clone)]
pub struct RedisFastLedger {
    conn_manager: ConnectionManager,
    reserve_script: Script,
}

impl RedisFastLedger {
    /// Connects to Redis at `redis_url`.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;
        Ok(Self::from_manager(conn_manager))
    }

    /// Wraps an existing connection manager.
    pub fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            reserve_script: Script::new(RESERVE_SCRIPT),
        }
    }
}

fn interpret_reserve(raw: i64) -> ReserveOutcome {
    match raw {
        -2 => ReserveOutcome::Missing,
        -1 => ReserveOutcome::Insufficient,
        remaining => ReserveOutcome::Reserved { remaining },
    }
}

#[async_trait]
impl FastStockLedger for RedisFastLedger {
    async fn prepare(&self, campaign: CampaignId, item: ItemId, quantity: i64) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.set(stock_key(campaign, item), quantity).await?;
        Ok(())
    }

    async fn reserve(
        &self,
        campaign: CampaignId,
        item: ItemId,
        quantity: u32,
    ) -> Result<ReserveOutcome> {
        let mut conn = self.conn_manager.clone();
        let raw: i64 = self
            .reserve_script
            .key(stock_key(campaign, item))
            .arg(quantity)
            .invoke_async(&mut conn)
            .await?;
        Ok(interpret_reserve(raw))
    }

    async fn release(&self, campaign: CampaignId, item: ItemId, quantity: u32) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: i64 = conn.incr(stock_key(campaign, item), quantity).await?;
        Ok(())
    }

    async fn peek(&self, campaign: CampaignId, item: ItemId) -> Result<Option<i64>> {
        let mut conn = self.conn_manager.clone();
        let value: Option<i64> = conn.get(stock_key(campaign, item)).await?;
        Ok(value)
    }

    async fn has_any_keys(&self) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let pattern = format!("{STOCK_KEY_PREFIX}*");
        let mut cursor: u64 = 0;
        // SCAN instead of KEYS so a large keyspace never blocks the server.
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_PAGE)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                return Ok(true);
            }
            if next == 0 {
                return Ok(false);
            }
            cursor = next;
        }
    }
}
