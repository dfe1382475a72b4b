//! Buyer-facing order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::OrderCode;
use domain::{Order, OrderLineItem, OrderShipment};
use saga::CheckoutRequest;
use serde::Serialize;

use crate::error::ApiError;
use crate::extract::CurrentUser;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// An order with whatever assembly has attached to it so far.
#[derive(Debug, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderLineItem>,
    pub shipment: Option<OrderShipment>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub applied: bool,
}

/// POST /orders/token
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = state.checkout.issue_token(user).await?;
    Ok(Json(TokenResponse { token }))
}

/// POST /orders: accepts the order and assembles it in the background.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state.checkout.submit(user, request).await?;
    Ok((StatusCode::ACCEPTED, Json(order)))
}

/// GET /orders/{code}
pub async fn get(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(code): Path<String>,
) -> Result<Json<OrderView>, ApiError> {
    let code = OrderCode::new(code);
    let order = state.checkout.status(user, &code).await?;
    let items = state.orders.line_items(&code).await?;
    let shipment = state.orders.shipment(&code).await?;
    Ok(Json(OrderView {
        order,
        items,
        shipment,
    }))
}

/// POST /orders/{code}/cancel
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(code): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let cancelled = state
        .cancellation
        .cancel(user, &OrderCode::new(code))
        .await?;
    Ok(Json(CancelResponse { cancelled }))
}

/// POST /orders/{code}/payment-callback: called by the payment service.
pub async fn payment_succeeded(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let applied = state
        .cancellation
        .on_payment_succeeded(&OrderCode::new(code))
        .await?;
    Ok(Json(PaymentResponse { applied }))
}
