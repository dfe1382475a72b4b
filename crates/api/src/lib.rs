//! HTTP API and process wiring for the purchase pipeline.
//!
//! Exposes checkout, order polling, cancellation, the payment callback,
//! queued flash-sale purchases and the admin stock resync, plus health and
//! Prometheus metrics. Backends are
//! picked from [`config::Config`] at startup.

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;
pub mod state;
pub mod telemetry;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::submit))
        .route("/orders/token", post(routes::orders::issue_token))
        .route("/orders/{code}", get(routes::orders::get))
        .route("/orders/{code}/cancel", post(routes::orders::cancel))
        .route(
            "/orders/{code}/payment-callback",
            post(routes::orders::payment_succeeded),
        )
        .route(
            "/flash-sales/{item}/submit",
            post(routes::flash_sales::submit),
        )
        .route(
            "/flash-sales/{item}/result",
            get(routes::flash_sales::result),
        )
        .route("/admin/stock/resync", post(routes::admin::resync_stock))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
