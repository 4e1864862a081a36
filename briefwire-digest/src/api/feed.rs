//! Feed read endpoints: story briefs and period reports

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use briefwire_common::db::models::{NewsGroup, Period, PeriodReport};

use crate::api::user_id_from_headers;
use crate::db::{news_groups, reports};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub fn feed_routes() -> Router<AppState> {
    Router::new()
        .route("/api/feed/briefs", get(list_briefs))
        .route("/api/feed/reports/:period", get(get_report))
}

/// Stories ordered most-severe first
async fn list_briefs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<NewsGroup>>> {
    let user_id = user_id_from_headers(&headers)?;
    let briefs = news_groups::list_briefs(&state.db, user_id).await?;
    Ok(Json(briefs))
}

/// Latest report for one period (`1d`, `7d`, `30d`)
async fn get_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(period): Path<String>,
) -> ApiResult<Json<PeriodReport>> {
    let user_id = user_id_from_headers(&headers)?;

    let period = Period::parse(&period).ok_or(ApiError::UnknownPeriod(period))?;

    let report = reports::load_report(&state.db, user_id, period)
        .await?
        .ok_or_else(|| ApiError::MissingResource(format!("{} report", period.as_str())))?;

    Ok(Json(report))
}
