//! Subscription settings: sources, keywords, tech stack, admin resets

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{delete, get, post},
    Json, Router,
};
use briefwire_common::db::models::{Keyword, Source, SourceType, TechStackItem};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::user_id_from_headers;
use crate::db::{articles, keywords, sources, tech_stack};
use crate::error::{ApiError, ApiResult};
use crate::services::exposure_engine;
use crate::AppState;

pub fn settings_routes() -> Router<AppState> {
    Router::new()
        .route("/api/sources", get(list_sources).post(create_source))
        .route("/api/keywords", get(list_keywords).post(create_keyword))
        .route("/api/techstack", get(list_stack).post(create_stack_item))
        .route("/api/techstack/:id", delete(delete_stack_item))
        .route("/api/articles/:id/reset-enrichment", post(reset_enrichment))
}

async fn list_sources(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Source>>> {
    let user_id = user_id_from_headers(&headers)?;
    Ok(Json(sources::list_sources(&state.db, user_id).await?))
}

#[derive(Debug, Deserialize)]
struct CreateSource {
    url: String,
    name: String,
    #[serde(default)]
    source_type: Option<String>,
}

async fn create_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateSource>,
) -> ApiResult<Json<Source>> {
    let user_id = user_id_from_headers(&headers)?;

    let source_type = match body.source_type.as_deref() {
        None => SourceType::Rss,
        Some(raw) => SourceType::parse(raw).ok_or_else(|| ApiError::Validation {
            field: "source_type",
            reason: format!("'{raw}' is not RSS or WEBSITE"),
        })?,
    };

    let source = Source {
        id: Uuid::new_v4(),
        user_id,
        url: body.url,
        name: body.name,
        source_type,
        active: true,
    };
    sources::save_source(&state.db, &source).await?;

    Ok(Json(source))
}

async fn list_keywords(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Keyword>>> {
    let user_id = user_id_from_headers(&headers)?;
    Ok(Json(keywords::load_keywords(&state.db, user_id).await?))
}

#[derive(Debug, Deserialize)]
struct CreateKeyword {
    word: String,
}

async fn create_keyword(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateKeyword>,
) -> ApiResult<Json<Keyword>> {
    let user_id = user_id_from_headers(&headers)?;

    if body.word.trim().is_empty() {
        return Err(ApiError::Validation {
            field: "word",
            reason: "must not be empty".to_string(),
        });
    }

    let keyword = Keyword::new(user_id, &body.word);
    keywords::save_keyword(&state.db, &keyword).await?;

    Ok(Json(keyword))
}

async fn list_stack(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<TechStackItem>>> {
    let user_id = user_id_from_headers(&headers)?;
    Ok(Json(tech_stack::load_active_items(&state.db, user_id).await?))
}

#[derive(Debug, Deserialize)]
struct CreateStackItem {
    vendor: String,
    product: String,
    version: Option<String>,
    #[serde(default)]
    category: String,
}

/// Create a stack item and retroactively match it against the user's
/// known CVEs
async fn create_stack_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateStackItem>,
) -> ApiResult<Json<TechStackItem>> {
    let user_id = user_id_from_headers(&headers)?;

    if body.vendor.trim().is_empty() || body.product.trim().is_empty() {
        return Err(ApiError::Validation {
            field: "vendor/product",
            reason: "both are required".to_string(),
        });
    }

    let item = TechStackItem::new(user_id, &body.vendor, &body.product, body.version, &body.category);
    tech_stack::save_item(&state.db, &item).await?;

    let matches = exposure_engine::retroactive_match(&state.db, user_id, &item, Utc::now()).await?;
    tracing::info!(user_id = %user_id, item_id = %item.id, matches, "Stack item created");

    Ok(Json(item))
}

async fn delete_stack_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(item_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = user_id_from_headers(&headers)?;

    let deleted = tech_stack::delete_item(&state.db, user_id, item_id).await?;
    if !deleted {
        return Err(ApiError::MissingResource(format!("stack item {item_id}")));
    }

    Ok(Json(serde_json::json!({"deleted": item_id})))
}

/// Administrative reset of an article's enrichment flags; the next run
/// re-extracts entities and CVEs for it
async fn reset_enrichment(
    State(state): State<AppState>,
    Path(article_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    articles::reset_enrichment(&state.db, article_id).await?;
    Ok(Json(serde_json::json!({"reset": article_id})))
}
