//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use api::state::{AppState, Backends, Collaborators};
use outbox::{AmqpPublisher, MessageKind, MessageRelay, QueueBinding};
use saga::{DelayedCancelHandler, StaleOrderSweeper, StockReleaseHandler};
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const DELAY_QUEUE: &str = "order.delay";
const CANCELLED_QUEUE: &str = "order.cancelled";
const CANCELLED_ROUTING_KEY: &str = "order.cancelled";
const FLASH_SALE_QUEUE: &str = "order.flash";
const FLASH_SALE_DEAD_LETTER_QUEUE: &str = "order.flash.dlq";

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Starts the queue consumers; each stops when the shutdown flag flips.
fn spawn_consumers(
    broker: &AmqpPublisher,
    state: &AppState,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let consumer = broker.consumer();
    let mut tasks = Vec::new();

    let (c, rx) = (consumer.clone(), shutdown.clone());
    let handler = DelayedCancelHandler::new(state.cancellation.clone());
    tasks.push(tokio::spawn(async move {
        let binding = QueueBinding::order(DELAY_QUEUE, outbox::amqp::DELAY_EXPIRED_ROUTING_KEY);
        if let Err(e) = c.run(binding, handler, rx).await {
            tracing::error!(error = %e, "delayed-cancel consumer stopped");
        }
    }));

    let (c, rx) = (consumer.clone(), shutdown.clone());
    let handler = StockReleaseHandler::new(state.limited.clone(), state.regular.clone());
    tasks.push(tokio::spawn(async move {
        let binding = QueueBinding::order(CANCELLED_QUEUE, CANCELLED_ROUTING_KEY);
        if let Err(e) = c.run(binding, handler, rx).await {
            tracing::error!(error = %e, "stock-release consumer stopped");
        }
    }));

    let flash_sale_key = MessageKind::FlashSaleOrder.routing_key();

    let (c, rx) = (consumer.clone(), shutdown.clone());
    let handler = state.flash_sale_orders.clone();
    tasks.push(tokio::spawn(async move {
        let binding = QueueBinding::order(FLASH_SALE_QUEUE, flash_sale_key);
        if let Err(e) = c.run(binding, handler, rx).await {
            tracing::error!(error = %e, "flash-sale order consumer stopped");
        }
    }));

    let rx = shutdown.clone();
    let handler = state.flash_sale_restorer.clone();
    tasks.push(tokio::spawn(async move {
        let binding = QueueBinding::dead_letters(FLASH_SALE_DEAD_LETTER_QUEUE, flash_sale_key);
        if let Err(e) = consumer.run(binding, handler, rx).await {
            tracing::error!(error = %e, "dead-letter consumer stopped");
        }
    }));

    tasks
}

#[tokio::main]
async fn main() {
    // 1. Configuration and tracing
    let config = Config::from_env();
    api::telemetry::init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Backends and application state
    let backends = match Backends::connect(&config).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect backends");
            std::process::exit(1);
        }
    };
    let collaborators = Collaborators::in_memory();
    let state = Arc::new(AppState::build(&backends, &collaborators, &config));

    if let Err(e) = state.stock.rewarm_if_empty().await {
        tracing::warn!(error = %e, "initial fast-ledger warm-up failed");
    }

    // 4. Background workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let relay = MessageRelay::new(
        backends.outbox.clone(),
        backends.publisher.clone(),
        config.relay.clone(),
    );
    let rx = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move { relay.run(rx).await }));

    let sweeper = StaleOrderSweeper::new(backends.orders.clone(), config.sweeper.clone());
    let rx = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move { sweeper.run(rx).await }));

    let stock = state.stock.clone();
    let rewarm = config.rewarm.clone();
    let rx = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move { stock.run_rewarm(rewarm, rx).await }));

    if let Some(broker) = &backends.broker {
        tasks.extend(spawn_consumers(broker, &state, &shutdown_rx));
    }
    if let Some(bus) = &backends.local_bus {
        state.bind_in_process(bus).await;
    }

    // 5. Serve
    let app = api::create_app(state.clone(), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
    }

    // 6. Let accepted orders finish, then stop the workers
    state.checkout.executor().drain().await;
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }

    tracing::info!("server shut down gracefully");
}
