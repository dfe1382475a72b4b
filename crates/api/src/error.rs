//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::ErrorKind;
use domain::DomainError;
use inventory::InventoryError;
use outbox::OutboxError;
use saga::SagaError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Saga(#[from] SagaError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Outbox(#[from] OutboxError),

    /// The caller did not identify itself.
    #[error("{0}")]
    Unauthorized(String),

    /// A path or body value could not be understood.
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    /// Taxonomy kind; request-shape errors have none.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ApiError::Saga(e) => Some(e.kind()),
            ApiError::Inventory(e) => Some(e.kind()),
            ApiError::Domain(e) => Some(e.kind()),
            ApiError::Outbox(e) => Some(e.kind()),
            ApiError::Unauthorized(_) | ApiError::BadRequest(_) => None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => self.kind().map_or(StatusCode::INTERNAL_SERVER_ERROR, status_for_kind),
        }
    }

    fn kind_label(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            _ => self.kind().unwrap_or(ErrorKind::Internal).as_str(),
        }
    }
}

/// HTTP status for each error kind.
pub fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InsufficientStock | ErrorKind::LimitExceeded | ErrorKind::Conflict => {
            StatusCode::CONFLICT
        }
        ErrorKind::DownstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind_label(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status() {
        let err = ApiError::from(SagaError::Conflict("dup".to_string()));
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.kind(), Some(ErrorKind::Conflict));

        let err = ApiError::from(SagaError::Unavailable("saturated".to_string()));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);

        let err = ApiError::from(SagaError::NotFound("gone".to_string()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn request_shape_errors_have_no_kind() {
        let err = ApiError::Unauthorized("missing X-User-Id".to_string());
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert!(err.kind().is_none());
        assert_eq!(err.kind_label(), "UNAUTHORIZED");
    }
}
