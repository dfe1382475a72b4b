//! Pricing service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{CampaignId, ItemId, Money, ProductId};
use tokio::sync::Mutex;

use crate::error::SagaError;

/// An item to price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceCheck {
    pub product: ProductId,
    pub item: ItemId,
    pub original_price: Money,
}

/// The best current price of an item.
///
/// Any field may be missing when the pricing backend returns partial data;
/// the pipeline fills gaps from the cart snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuote {
    pub item: ItemId,
    pub original_price: Option<Money>,
    pub final_price: Option<Money>,
    /// Set when the price comes from a flash-sale campaign.
    pub campaign: Option<CampaignId>,
}

/// Computes the best available price per item.
#[async_trait]
pub trait PricingService: Send + Sync {
    async fn best_prices(&self, checks: &[PriceCheck]) -> Result<Vec<PriceQuote>, SagaError>;
}

/// In-memory pricing service for testing.
///
/// Items without a configured quote are left out of the response.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPricingService {
    quotes: Arc<Mutex<HashMap<ItemId, PriceQuote>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryPricingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_quote(&self, quote: PriceQuote) {
        self.quotes.lock().await.insert(quote.item, quote);
    }

    /// Configures the service to fail every call.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PricingService for InMemoryPricingService {
    async fn best_prices(&self, checks: &[PriceCheck]) -> Result<Vec<PriceQuote>, SagaError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SagaError::PricingService(
                "promotion backend timed out".to_string(),
            ));
        }
        let quotes = self.quotes.lock().await;
        Ok(checks
            .iter()
            .filter_map(|c| quotes.get(&c.item).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_returns_only_known_items() {
        let service = InMemoryPricingService::new();
        service
            .set_quote(PriceQuote {
                item: ItemId::new(1),
                original_price: Some(Money::from_cents(1_000)),
                final_price: Some(Money::from_cents(800)),
                campaign: Some(CampaignId::new(4)),
            })
            .await;

        let checks = [1, 2].map(|i| PriceCheck {
            product: ProductId::new(i),
            item: ItemId::new(i),
            original_price: Money::from_cents(1_000),
        });
        let quotes = service.best_prices(&checks).await.unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].campaign, Some(CampaignId::new(4)));

        service.set_fail(true);
        assert!(service.best_prices(&checks).await.is_err());
    }
}
