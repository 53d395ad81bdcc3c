//! # Web Surface
//!
//! Request surface over the cycle engine; every handler is a thin mapping
//! onto orchestrator or model calls.

pub mod handlers;
pub mod state;

use axum::routing::{get, post};
use axum::Router;

pub use state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/cycles/trigger", post(handlers::trigger_cycle))
        .route("/cycles/recent", get(handlers::recent_cycles))
        .route("/metrics", get(handlers::metrics))
        .route("/run-profiles/trigger", post(handlers::trigger_run_profiles))
        .route("/config/reload", post(handlers::reload_config))
        .route(
            "/governance/namespaces/:namespace/halt",
            post(handlers::halt_namespace),
        )
        .with_state(state)
}
