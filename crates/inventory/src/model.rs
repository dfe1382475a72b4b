//! Stock ledger records.

use chrono::{DateTime, Utc};
use common::{CampaignId, ItemId, OrderCode, ProductId, UserId};
use serde::{Deserialize, Serialize};

/// One row of the durable stock ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    pub campaign: CampaignId,
    pub item: ItemId,
    pub product: ProductId,
    /// Units still available.
    pub stock: i64,
    /// Units sold so far.
    pub sold: i64,
    /// Maximum cumulative quantity a single user may buy, if capped.
    pub per_user_limit: Option<i64>,
}

impl StockItem {
    /// Creates an uncapped item with the given available stock.
    pub fn new(campaign: CampaignId, item: ItemId, stock: i64) -> Self {
        Self {
            campaign,
            item,
            product: ProductId::new(0),
            stock,
            sold: 0,
            per_user_limit: None,
        }
    }

    /// Sets the owning product.
    pub fn with_product(mut self, product: ProductId) -> Self {
        self.product = product;
        self
    }

    /// Caps how much a single user may buy.
    pub fn with_per_user_limit(mut self, limit: i64) -> Self {
        self.per_user_limit = Some(limit);
        self
    }
}

/// A single deduction to apply: `quantity` of `item` under `campaign`
/// for `user`, on behalf of `order_code`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeductionRequest {
    pub order_code: OrderCode,
    pub campaign: CampaignId,
    pub item: ItemId,
    pub user: UserId,
    pub quantity: u32,
}

impl DeductionRequest {
    pub fn new(
        order_code: OrderCode,
        campaign: CampaignId,
        item: ItemId,
        user: UserId,
        quantity: u32,
    ) -> Self {
        Self {
            order_code,
            campaign,
            item,
            user,
            quantity,
        }
    }

    /// Lock-ordering key for batch processing.
    pub(crate) fn sort_key(&self) -> (ItemId, CampaignId) {
        (self.item, self.campaign)
    }
}

/// Reservation log entry: proof that a deduction was applied.
///
/// At most one exists per `(order_code, item)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationEntry {
    pub campaign: CampaignId,
    pub item: ItemId,
    pub user: UserId,
    pub order_code: OrderCode,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
}

impl ReservationEntry {
    pub(crate) fn from_request(request: &DeductionRequest) -> Self {
        Self {
            campaign: request.campaign,
            item: request.item,
            user: request.user,
            order_code: request.order_code.clone(),
            quantity: request.quantity,
            created_at: Utc::now(),
        }
    }
}

/// Which reservations of an order a release applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseScope {
    /// Every reservation of the order.
    All,
    /// Only regular-stock reservations.
    Regular,
    /// Only limited (campaign) reservations.
    Limited,
}

impl ReleaseScope {
    /// Returns true if a reservation under `campaign` falls in this scope.
    pub fn includes(&self, campaign: CampaignId) -> bool {
        match self {
            ReleaseScope::All => true,
            ReleaseScope::Regular => campaign.is_regular(),
            ReleaseScope::Limited => !campaign.is_regular(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseScope::All => "all",
            ReleaseScope::Regular => "regular",
            ReleaseScope::Limited => "limited",
        }
    }
}

/// What a single deduction call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeductOutcome {
    /// Stock was taken by this call.
    Deducted,
    /// A reservation already existed; nothing changed.
    AlreadyApplied,
}
