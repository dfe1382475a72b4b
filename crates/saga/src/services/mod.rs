//! Collaborator traits and in-memory implementations.
//!
//! The pipeline only talks to pricing, coupons, carts, stock, payments,
//! tokens and purchase statuses through these traits.

pub mod cart;
pub mod coupon;
pub mod payment;
pub mod pricing;
pub mod status;
pub mod stock;
pub mod token;

pub use cart::{CartLine, CartService, InMemoryCartService};
pub use coupon::{CouponService, InMemoryCouponService};
pub use payment::{InMemoryPaymentService, PaymentService};
pub use pricing::{InMemoryPricingService, PriceCheck, PriceQuote, PricingService};
pub use status::{
    InMemoryPurchaseStatusStore, PurchaseStatus, PurchaseStatusStore, RedisPurchaseStatusStore,
};
pub use stock::{
    LimitedStockService, ManagedStock, QueuedStockService, RegularStockService, StockLine,
};
pub use token::{InMemoryTokenStore, RedisTokenStore, TokenStore};
