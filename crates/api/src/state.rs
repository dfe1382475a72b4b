//! Backend selection and the shared application state.

use std::sync::Arc;
use std::time::Duration;

use domain::{DomainError, InMemoryOrderStore, OrderStore, PostgresOrderStore};
use inventory::{
    FastStockLedger, InMemoryFastLedger, InMemoryStockStore, PostgresStockStore, RedisFastLedger,
    StockDeductionManager, StockStore,
};
use outbox::{
    AmqpPublisher, InMemoryOutboxStore, InMemoryPublisher, InProcessBroker, MessageKind,
    MessagePublisher, OutboxStore, PostgresOutboxStore,
};
use saga::{
    CancellationService, CartService, CheckoutService, CouponService, DeadLetterStockRestorer,
    FlashSaleOrderHandler, FlashSaleService, InMemoryCartService, InMemoryCouponService,
    InMemoryPaymentService, InMemoryPricingService, InMemoryPurchaseStatusStore,
    InMemoryTokenStore, LimitedStockService, ManagedStock, OrderAssemblyPipeline, PaymentService,
    PipelineExecutor, PipelineServices, PricingService, PurchaseStatusStore, QueuedStockService,
    RedisPurchaseStatusStore, RedisTokenStore, RegularStockService, TokenStore,
};
use sqlx::postgres::PgPoolOptions;

use crate::config::Config;
use crate::error::ApiError;

/// Stock manager over whichever ledgers were configured.
pub type StockManager = StockDeductionManager<Arc<dyn FastStockLedger>, Arc<dyn StockStore>>;

/// Storage and broker backends, chosen at startup.
#[derive(Clone)]
pub struct Backends {
    pub fast: Arc<dyn FastStockLedger>,
    pub stock_store: Arc<dyn StockStore>,
    pub orders: Arc<dyn OrderStore>,
    pub outbox: Arc<dyn OutboxStore>,
    pub publisher: Arc<dyn MessagePublisher>,
    pub tokens: Arc<dyn TokenStore>,
    pub statuses: Arc<dyn PurchaseStatusStore>,
    /// Where queued flash-sale purchases go.
    pub flash_sale_publisher: Arc<dyn MessagePublisher>,
    /// Present only when a broker is configured; queue consumers need it.
    pub broker: Option<AmqpPublisher>,
    /// Carries flash-sale purchases when no broker is configured.
    pub local_bus: Option<InProcessBroker>,
}

impl Backends {
    /// Everything in process. The order store writes its outbox rows into
    /// the same outbox the relay drains.
    pub fn in_memory() -> Self {
        let outbox = InMemoryOutboxStore::new();
        let orders = InMemoryOrderStore::with_outbox(outbox.clone());
        let local_bus = InProcessBroker::new();
        Self {
            fast: Arc::new(InMemoryFastLedger::new()),
            stock_store: Arc::new(InMemoryStockStore::new()),
            orders: Arc::new(orders),
            outbox: Arc::new(outbox),
            publisher: Arc::new(InMemoryPublisher::new()),
            tokens: Arc::new(InMemoryTokenStore::new()),
            statuses: Arc::new(InMemoryPurchaseStatusStore::new()),
            flash_sale_publisher: Arc::new(local_bus.clone()),
            broker: None,
            local_bus: Some(local_bus),
        }
    }

    /// Connects the configured backends, keeping in-memory ones for the rest.
    pub async fn connect(config: &Config) -> Result<Self, ApiError> {
        let mut backends = Self::in_memory();

        if let Some(url) = &config.database_url {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await
                .map_err(DomainError::from)?;
            let orders = PostgresOrderStore::new(pool.clone());
            orders.run_migrations().await?;
            backends.orders = Arc::new(orders);
            backends.stock_store = Arc::new(PostgresStockStore::new(pool.clone()));
            backends.outbox = Arc::new(PostgresOutboxStore::new(pool));
            tracing::info!("using PostgreSQL stores");
        }

        if let Some(url) = &config.redis_url {
            backends.fast = Arc::new(RedisFastLedger::new(url).await?);
            backends.tokens = Arc::new(RedisTokenStore::new(url).await?);
            backends.statuses = Arc::new(RedisPurchaseStatusStore::new(url).await?);
            tracing::info!("using Redis fast ledger, token and purchase status stores");
        }

        if let Some(url) = &config.amqp_url {
            let broker =
                AmqpPublisher::connect(url, Duration::from_secs(config.payment_timeout_secs))
                    .await?;
            backends.publisher = Arc::new(broker.clone());
            backends.flash_sale_publisher = Arc::new(broker.clone());
            backends.broker = Some(broker);
            backends.local_bus = None;
            tracing::info!("using AMQP broker");
        }

        Ok(backends)
    }
}

/// Clients of the services this one calls but does not own.
#[derive(Clone)]
pub struct Collaborators {
    pub pricing: Arc<dyn PricingService>,
    pub coupons: Arc<dyn CouponService>,
    pub cart: Arc<dyn CartService>,
    pub payments: Arc<dyn PaymentService>,
}

impl Collaborators {
    /// Process-local stand-ins.
    pub fn in_memory() -> Self {
        Self {
            pricing: Arc::new(InMemoryPricingService::new()),
            coupons: Arc::new(InMemoryCouponService::new()),
            cart: Arc::new(InMemoryCartService::new()),
            payments: Arc::new(InMemoryPaymentService::new()),
        }
    }
}

/// Shared state for request handlers and background workers.
#[derive(Clone)]
pub struct AppState {
    pub checkout: CheckoutService,
    pub cancellation: CancellationService,
    pub orders: Arc<dyn OrderStore>,
    pub stock: Arc<StockManager>,
    pub limited: Arc<dyn LimitedStockService>,
    pub regular: Arc<dyn RegularStockService>,
    pub flash_sales: FlashSaleService,
    pub flash_sale_orders: FlashSaleOrderHandler,
    pub flash_sale_restorer: DeadLetterStockRestorer<Arc<dyn FastStockLedger>>,
}

impl AppState {
    pub fn build(backends: &Backends, collaborators: &Collaborators, config: &Config) -> Self {
        let stock = Arc::new(StockDeductionManager::new(
            backends.fast.clone(),
            backends.stock_store.clone(),
        ));
        let managed = ManagedStock::new(stock.clone());
        let limited: Arc<dyn LimitedStockService> = Arc::new(managed.clone());
        let regular: Arc<dyn RegularStockService> = Arc::new(managed.clone());
        let queued: Arc<dyn QueuedStockService> = Arc::new(managed);

        let pipeline = OrderAssemblyPipeline::new(
            PipelineServices {
                pricing: collaborators.pricing.clone(),
                coupons: collaborators.coupons.clone(),
                limited: limited.clone(),
                regular: regular.clone(),
                cart: collaborators.cart.clone(),
                orders: backends.orders.clone(),
            },
            config.shipping.clone(),
            config.pipeline.rpc_max_concurrency,
        );
        let executor = PipelineExecutor::new(pipeline, &config.pipeline);

        let checkout = CheckoutService::new(
            backends.tokens.clone(),
            collaborators.cart.clone(),
            backends.orders.clone(),
            executor,
        );
        let cancellation = CancellationService::new(
            backends.orders.clone(),
            limited.clone(),
            regular.clone(),
            collaborators.payments.clone(),
            collaborators.coupons.clone(),
        );

        let flash_sales = FlashSaleService::new(
            queued.clone(),
            backends.statuses.clone(),
            backends.flash_sale_publisher.clone(),
        );
        let flash_sale_orders = FlashSaleOrderHandler::new(
            queued,
            collaborators.pricing.clone(),
            backends.orders.clone(),
            backends.statuses.clone(),
        );
        let flash_sale_restorer =
            DeadLetterStockRestorer::new(backends.fast.clone(), backends.statuses.clone());

        Self {
            checkout,
            cancellation,
            orders: backends.orders.clone(),
            stock,
            limited,
            regular,
            flash_sales,
            flash_sale_orders,
            flash_sale_restorer,
        }
    }

    /// Binds the flash-sale consumers to an in-process bus.
    pub async fn bind_in_process(&self, bus: &InProcessBroker) {
        let routing_key = MessageKind::FlashSaleOrder.routing_key();
        bus.bind(routing_key, Arc::new(self.flash_sale_orders.clone()))
            .await;
        bus.bind_dead_letters(routing_key, Arc::new(self.flash_sale_restorer.clone()))
            .await;
    }
}
