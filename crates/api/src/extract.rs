//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::UserId;

use crate::error::ApiError;

/// Header the upstream gateway sets after authenticating the buyer.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated buyer.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub UserId);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|id| CurrentUser(UserId::new(id)))
            .ok_or_else(|| ApiError::Unauthorized(format!("missing or invalid {USER_ID_HEADER}")))
    }
}
