//! # HTTP Handlers
//!
//! Thin mappings onto orchestrator and model calls. A manual trigger is
//! accepted with 202 and the cycle id; 500 is reserved for synchronous
//! setup failures. Stage-level failures inside an accepted cycle are
//! visible only via status polling or the journal.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use crate::config::OrbitConfig;
use crate::models::{CycleRun, CycleTrigger, DeadLetterDispatch, DispatchJob, HaltFlag};
use crate::web::state::AppState;

/// Liveness probe: GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Readiness probe: GET /ready checks the store is reachable.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM cycle_runs")
        .fetch_one(&state.pool)
        .await
    {
        Ok(_) => (StatusCode::OK, Json(json!({ "ready": true }))),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "ready": false,
                "error": "Service not ready",
                "details": err.to_string(),
            })),
        ),
    }
}

/// POST /cycles/trigger: synchronous manual trigger.
pub async fn trigger_cycle(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.orchestrator.run_cycle(CycleTrigger::Manual, None).await {
        Ok(cycle_run_id) => (
            StatusCode::ACCEPTED,
            Json(json!({ "accepted": true, "cycle_run_id": cycle_run_id })),
        ),
        Err(err) => {
            error!(error = %err, "Failed to trigger cycle");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to trigger cycle", "details": err.to_string() })),
            )
        }
    }
}

/// GET /cycles/recent: latest 20 cycles.
pub async fn recent_cycles(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match CycleRun::list_recent(&state.pool, 20).await {
        Ok(cycles) => (StatusCode::OK, Json(json!(cycles))),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to list cycles", "details": err.to_string() })),
        ),
    }
}

/// GET /metrics: JSON counts for operational introspection.
pub async fn metrics(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let result: crate::error::Result<Value> = async {
        let cycle_counts = CycleRun::counts_by_status(&state.pool).await?;
        let dispatch_counts = DispatchJob::counts_by_status(&state.pool).await?;
        let dead_letter_count = DeadLetterDispatch::count(&state.pool).await?;

        let cycles_by_status: serde_json::Map<String, Value> = cycle_counts
            .iter()
            .map(|(status, count)| (status.clone(), json!(count)))
            .collect();
        let dispatch_by_status: serde_json::Map<String, Value> = dispatch_counts
            .iter()
            .map(|(status, count)| (status.clone(), json!(count)))
            .collect();

        Ok(json!({
            "cycles": {
                "total": cycle_counts.iter().map(|(_, c)| c).sum::<i64>(),
                "by_status": cycles_by_status,
            },
            "dispatch": {
                "total": dispatch_counts.iter().map(|(_, c)| c).sum::<i64>(),
                "by_status": dispatch_by_status,
                "dead_letter_count": dead_letter_count,
            },
        }))
    }
    .await;

    match result {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to compute metrics", "details": err.to_string() })),
        ),
    }
}

/// POST /run-profiles/trigger: run all enabled run-profiles once.
pub async fn trigger_run_profiles(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    state.run_profiles.run_all_enabled_once().await;
    (StatusCode::ACCEPTED, Json(json!({ "accepted": true })))
}

/// POST /config/reload: versioned snapshot reload, refused while cycles
/// are in flight.
pub async fn reload_config(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let config = match OrbitConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to load configuration", "details": err.to_string() })),
            )
        }
    };

    match state.config_cache.reload(config) {
        Ok(version) => (
            StatusCode::OK,
            Json(json!({ "reloaded": true, "version": version })),
        ),
        Err(err) => (
            StatusCode::CONFLICT,
            Json(json!({ "reloaded": false, "details": err.to_string() })),
        ),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct HaltRequest {
    pub actor: Option<String>,
}

/// POST /governance/namespaces/{namespace}/halt
pub async fn halt_namespace(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    body: Option<Json<HaltRequest>>,
) -> (StatusCode, Json<Value>) {
    let actor = body
        .and_then(|Json(req)| req.actor)
        .unwrap_or_else(|| "api".to_string());

    match HaltFlag::set(&state.pool, &namespace, &actor).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "namespace": namespace, "halted": true })),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to halt namespace", "details": err.to_string() })),
        ),
    }
}
