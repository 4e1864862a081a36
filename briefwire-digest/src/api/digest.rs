//! Digest trigger endpoint

use std::future::Future;
use std::pin::Pin;

use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};

use crate::api::user_id_from_headers;
use crate::error::ApiResult;
use crate::services::RunSummary;
use crate::AppState;

pub fn digest_routes() -> Router<AppState> {
    Router::new().route("/api/digest/run", post(run_digest))
}

/// Run the full digest pipeline for the calling user
fn run_digest(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Pin<Box<dyn Future<Output = ApiResult<Json<RunSummary>>> + Send>> {
    Box::pin(async move {
        let user_id = user_id_from_headers(&headers)?;

        tracing::info!(user_id = %user_id, "Digest run requested via API");

        let summary = state.orchestrator.run_digest_for_user(user_id).await;

        Ok(Json(summary))
    })
}
