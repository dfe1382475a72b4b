//! Queued flash-sale purchases.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{ItemId, OrderCode};
use saga::{FlashSaleRequest, PurchaseStatus};
use serde::Serialize;

use crate::error::ApiError;
use crate::extract::CurrentUser;
use crate::state::AppState;

/// Where a queued purchase stands.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseView {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_code: Option<OrderCode>,
}

impl From<PurchaseStatus> for PurchaseView {
    fn from(status: PurchaseStatus) -> Self {
        let label = status.label();
        let order_code = match status {
            PurchaseStatus::Created(code) => Some(code),
            PurchaseStatus::Pending | PurchaseStatus::Failed => None,
        };
        Self {
            status: label,
            order_code,
        }
    }
}

/// POST /flash-sales/{item}/submit
pub async fn submit(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(item): Path<i64>,
    Json(request): Json<FlashSaleRequest>,
) -> Result<(StatusCode, Json<PurchaseView>), ApiError> {
    if request.quantity == 0 {
        return Err(ApiError::BadRequest("quantity must be positive".to_string()));
    }
    let status = state
        .flash_sales
        .submit(user, ItemId::new(item), request)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(status.into())))
}

/// GET /flash-sales/{item}/result
pub async fn result(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(item): Path<i64>,
) -> Result<Json<PurchaseView>, ApiError> {
    let status = state.flash_sales.result(user, ItemId::new(item)).await?;
    Ok(Json(status.into()))
}
