//! Cart service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{CampaignId, ItemId, Money, ProductId, UserId};
use tokio::sync::Mutex;

use crate::error::SagaError;

/// A checked cart line with the prices the user saw when adding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub product: ProductId,
    pub item: ItemId,
    pub product_name: String,
    /// Price shown in the cart.
    pub price: Money,
    /// List price, when the cart price was discounted.
    pub original_price: Option<Money>,
    /// Flash-sale campaign the cart price came from.
    pub campaign: Option<CampaignId>,
    pub quantity: u32,
}

impl CartLine {
    /// Snapshot-priced estimate of this line.
    pub fn snapshot_total(&self) -> Money {
        self.price.multiply(self.quantity)
    }
}

/// Reads and clears a user's checked cart lines.
#[async_trait]
pub trait CartService: Send + Sync {
    async fn checked_lines(&self, user: UserId) -> Result<Vec<CartLine>, SagaError>;

    async fn remove_lines(&self, user: UserId, items: &[ItemId]) -> Result<(), SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryCartState {
    lines: HashMap<UserId, Vec<CartLine>>,
    fail_on_fetch: bool,
}

/// In-memory cart service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCartService {
    state: Arc<Mutex<InMemoryCartState>>,
    fail_on_remove: Arc<AtomicBool>,
}

impl InMemoryCartService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_line(&self, user: UserId, line: CartLine) {
        self.state
            .lock()
            .await
            .lines
            .entry(user)
            .or_default()
            .push(line);
    }

    pub async fn set_fail_on_fetch(&self, fail: bool) {
        self.state.lock().await.fail_on_fetch = fail;
    }

    pub fn set_fail_on_remove(&self, fail: bool) {
        self.fail_on_remove.store(fail, Ordering::SeqCst);
    }

    /// Number of lines still in the user's cart.
    pub async fn line_count(&self, user: UserId) -> usize {
        self.state
            .lock()
            .await
            .lines
            .get(&user)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl CartService for InMemoryCartService {
    async fn checked_lines(&self, user: UserId) -> Result<Vec<CartLine>, SagaError> {
        let state = self.state.lock().await;
        if state.fail_on_fetch {
            return Err(SagaError::CartService("cart backend unreachable".to_string()));
        }
        Ok(state.lines.get(&user).cloned().unwrap_or_default())
    }

    async fn remove_lines(&self, user: UserId, items: &[ItemId]) -> Result<(), SagaError> {
        if self.fail_on_remove.load(Ordering::SeqCst) {
            return Err(SagaError::CartService("cart backend unreachable".to_string()));
        }
        if let Some(lines) = self.state.lock().await.lines.get_mut(&user) {
            lines.retain(|l| !items.contains(&l.item));
        }
        Ok(())
    }
}
