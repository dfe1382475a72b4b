//! Order assembly saga and the services around it.
//!
//! A checkout inserts a `CREATING` order and hands an [`AssemblyJob`] to the
//! [`PipelineExecutor`]. The [`OrderAssemblyPipeline`] then:
//! 1. Reprices the cart, falling back to the cart snapshot
//! 2. Runs coupon evaluation, limited and regular stock deduction concurrently
//! 3. Completes the order and its outbox rows in one transaction
//!
//! If any step fails, stock is released and the order is marked
//! `CREATE_FAILED`. The [`StaleOrderSweeper`] fails orders a crashed
//! pipeline left behind.
//!
//! Flash-sale items can also be bought through a queue: the
//! [`FlashSaleService`] holds stock and publishes a purchase, the
//! [`FlashSaleOrderHandler`] turns it into an order, and the
//! [`DeadLetterStockRestorer`] gives the hold back when that fails.

pub mod cancellation;
pub mod checkout;
pub mod consumers;
pub mod error;
pub mod flash_sale;
pub mod pipeline;
pub mod services;
pub mod sweeper;

pub use cancellation::CancellationService;
pub use checkout::{CheckoutRequest, CheckoutService, ORDER_TOKEN_TTL, order_token_key};
pub use consumers::{
    DeadLetterStockRestorer, DeadLetteredDeduction, DelayedCancelHandler, StockReleaseHandler,
};
pub use error::{Result, SagaError};
pub use flash_sale::{
    FLASH_SALE_STATUS_TTL, FlashSaleMessage, FlashSaleOrderHandler, FlashSaleRequest,
    FlashSaleService, flash_sale_status_key,
};
pub use pipeline::{
    AssemblyJob, AssemblyOutcome, OrderAssemblyPipeline, PipelineConfig, PipelineExecutor,
    PipelineServices,
};
pub use services::{
    CartLine, CartService, CouponService, InMemoryCartService, InMemoryCouponService,
    InMemoryPaymentService, InMemoryPricingService, InMemoryPurchaseStatusStore,
    InMemoryTokenStore, LimitedStockService, ManagedStock, PaymentService, PriceCheck, PriceQuote,
    PricingService, PurchaseStatus, PurchaseStatusStore, QueuedStockService,
    RedisPurchaseStatusStore, RedisTokenStore, RegularStockService, StockLine, TokenStore,
};
pub use sweeper::{STALE_ORDER_REASON, StaleOrderSweeper, SweeperConfig};
