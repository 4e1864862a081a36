//! briefwire-digest library interface
//!
//! Exposes the service internals for integration testing and hosts the
//! shared application state and router.

pub mod api;
pub mod db;
pub mod error;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::services::DigestOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Digest pipeline, shared with the scheduler
    pub orchestrator: Arc<DigestOrchestrator>,
}

impl AppState {
    pub fn new(db: SqlitePool, orchestrator: Arc<DigestOrchestrator>) -> Self {
        Self { db, orchestrator }
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::digest_routes())
        .merge(api::feed_routes())
        .merge(api::exposure_routes())
        .merge(api::settings_routes())
        .with_state(state)
}
