//! HTTP API routes
//!
//! Thin handlers over the db and service layers. Callers identify
//! themselves with an `X-User-Id` header; authentication proper lives in
//! front of this service.

pub mod digest;
pub mod exposure;
pub mod feed;
pub mod health;
pub mod settings;

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

pub use digest::digest_routes;
pub use exposure::exposure_routes;
pub use feed::feed_routes;
pub use health::health_routes;
pub use settings::settings_routes;

/// Resolve the calling user from the `X-User-Id` header
pub(crate) fn user_id_from_headers(headers: &HeaderMap) -> ApiResult<Uuid> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Identity("missing X-User-Id header".to_string()))?;

    Uuid::parse_str(raw)
        .map_err(|_| ApiError::Identity(format!("'{raw}' is not a user id")))
}
