//! Exposure ledger endpoints

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, put},
    Json, Router,
};
use briefwire_common::db::models::{ExposureState, UserCveExposure};
use chrono::Utc;
use serde::Deserialize;

use crate::api::user_id_from_headers;
use crate::db::exposures;
use crate::error::{ApiError, ApiResult};
use crate::services::exposure_engine::{self, RemediationMetrics};
use crate::AppState;

pub fn exposure_routes() -> Router<AppState> {
    Router::new()
        .route("/api/exposure", get(list_exposures))
        .route("/api/exposure/metrics", get(get_metrics))
        .route("/api/exposure/:cve_id", put(override_state))
}

async fn list_exposures(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<UserCveExposure>>> {
    let user_id = user_id_from_headers(&headers)?;
    let rows = exposures::load_exposures(&state.db, user_id).await?;
    Ok(Json(rows))
}

async fn get_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<RemediationMetrics>> {
    let user_id = user_id_from_headers(&headers)?;
    let metrics = exposure_engine::remediation_metrics(&state.db, user_id, Utc::now()).await?;
    Ok(Json(metrics))
}

#[derive(Debug, Deserialize)]
struct OverrideRequest {
    state: String,
    notes: Option<String>,
}

/// Manual state override. The row becomes `auto_classified = false` and
/// is thereafter invisible to the auto-classifier.
async fn override_state(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(cve_id): Path<String>,
    Json(body): Json<OverrideRequest>,
) -> ApiResult<Json<UserCveExposure>> {
    let user_id = user_id_from_headers(&headers)?;
    let cve_id = cve_id.to_uppercase();

    let new_state = ExposureState::parse(&body.state)
        .ok_or(ApiError::UnknownExposureState(body.state))?;

    // Moving to FIXED records the patch time
    let patched_at = (new_state == ExposureState::Fixed).then(Utc::now);

    let updated =
        exposures::set_manual_state(&state.db, user_id, &cve_id, new_state, patched_at, body.notes)
            .await?;
    if !updated {
        return Err(ApiError::MissingResource(format!("exposure for {cve_id}")));
    }

    let row = exposures::load_exposure(&state.db, user_id, &cve_id)
        .await?
        .ok_or_else(|| ApiError::MissingResource(format!("exposure for {cve_id}")))?;

    Ok(Json(row))
}
