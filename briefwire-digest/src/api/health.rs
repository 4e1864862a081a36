//! Health check endpoint

use axum::{routing::get, Json, Router};
use serde_json::json;

use crate::AppState;

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "service": "briefwire-digest",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    }))
}
