//! Operator endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ResyncResponse {
    pub items: usize,
}

/// POST /admin/stock/resync: reload the fast ledger from the durable one.
pub async fn resync_stock(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResyncResponse>, ApiError> {
    let items = state.stock.resync_fast_ledger().await?;
    tracing::info!(items, "fast ledger resynced");
    Ok(Json(ResyncResponse { items }))
}
