//! Shared application state for the web surface.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::ConfigCache;
use crate::orchestration::{CycleOrchestrator, RunProfileDriver};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub orchestrator: Arc<CycleOrchestrator>,
    pub config_cache: Arc<ConfigCache>,
    pub run_profiles: RunProfileDriver,
}
