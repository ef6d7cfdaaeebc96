//! fitscan-bodyscan library interface
//!
//! Body-scan reconstruction pipeline: estimate → semantic → match → refine →
//! commit. Exposes the pipeline, its stage traits, and the HTTP service
//! pieces for the binary and for integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod fusion;
pub mod stages;
pub mod types;
pub mod utils;
pub mod validators;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult, ScanError, StageError};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::db::SqliteScanStore;
use crate::events::BroadcastSink;
use crate::workflow::ScanPipeline;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub pipeline: Arc<ScanPipeline>,
    /// Local scan store, set only when scans commit locally
    pub store: Option<SqliteScanStore>,
    /// Live scan events (`GET /events`)
    pub events: BroadcastSink,
    pub startup_time: DateTime<Utc>,
    /// Last scan failure for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, pipeline: Arc<ScanPipeline>, events: BroadcastSink) -> Self {
        Self {
            store: None,
            db,
            pipeline,
            events,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Serve `GET /scans/:id` from the local scan store
    pub fn with_local_store(mut self) -> Self {
        self.store = Some(SqliteScanStore::new(self.db.clone()));
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::scan_routes())
        .merge(api::event_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
