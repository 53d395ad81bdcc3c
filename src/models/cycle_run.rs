//! # CycleRun Model
//!
//! One row per execution cycle. A cycle is created `running` and moved to
//! exactly one terminal status by the orchestrator; rows are never deleted.
//!
//! ## Namespace Exclusivity
//!
//! At most one `running` row should exist per namespace. This is enforced
//! optimistically: the orchestrator looks up a running row for the
//! namespace and resumes it instead of creating a second one. Under
//! adversarial timing two running rows can appear; that gap is accepted
//! and documented on `CycleOrchestrator::run_cycle`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::error::Result;

/// How a cycle was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleTrigger {
    Cron,
    Manual,
}

impl std::fmt::Display for CycleTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cron => write!(f, "cron"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Execution context persisted with the cycle.
///
/// The stable subset (everything except `trigger`) feeds the initiation
/// dedupe hash; `trigger` is deliberately excluded so repeated logical
/// work dedupes regardless of how it was started.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleContext {
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub run_profile_id: Option<String>,
    #[serde(default)]
    pub instruction_id: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Persisted context envelope: trigger plus the stable context fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCycleContext {
    pub trigger: CycleTrigger,
    #[serde(flatten)]
    pub context: CycleContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CycleStatus {
    Running,
    Success,
    PartialSuccess,
    Failed,
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::PartialSuccess => write!(f, "partial_success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CycleRun {
    pub id: String,
    pub status: CycleStatus,
    pub context_json: Json<StoredCycleContext>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CycleRun {
    pub fn context(&self) -> &CycleContext {
        &self.context_json.context
    }

    pub fn trigger(&self) -> CycleTrigger {
        self.context_json.trigger
    }

    /// Create a new `running` cycle for the given trigger and context.
    pub async fn create(
        pool: &SqlitePool,
        trigger: CycleTrigger,
        context: CycleContext,
    ) -> Result<CycleRun> {
        let stored = StoredCycleContext { trigger, context };
        let cycle = sqlx::query_as::<_, CycleRun>(
            "INSERT INTO cycle_runs (id, status, context_json, started_at)
             VALUES (?, ?, ?, ?)
             RETURNING id, status, context_json, started_at, finished_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(CycleStatus::Running)
        .bind(Json(stored))
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(cycle)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<CycleRun>> {
        let cycle = sqlx::query_as::<_, CycleRun>(
            "SELECT id, status, context_json, started_at, finished_at
             FROM cycle_runs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(cycle)
    }

    /// Look up a `running` cycle for the namespace (NULL-safe comparison:
    /// an absent namespace matches rows whose context has no namespace).
    pub async fn find_running_by_namespace(
        pool: &SqlitePool,
        namespace: Option<&str>,
    ) -> Result<Option<CycleRun>> {
        let cycle = sqlx::query_as::<_, CycleRun>(
            "SELECT id, status, context_json, started_at, finished_at
             FROM cycle_runs
             WHERE status = 'running'
               AND json_extract(context_json, '$.namespace') IS ?
             ORDER BY started_at ASC
             LIMIT 1",
        )
        .bind(namespace)
        .fetch_optional(pool)
        .await?;

        Ok(cycle)
    }

    /// Move the cycle to a terminal status and stamp its finish time.
    pub async fn mark_finished(
        pool: &SqlitePool,
        id: &str,
        status: CycleStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE cycle_runs SET status = ?, finished_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn list_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<CycleRun>> {
        let cycles = sqlx::query_as::<_, CycleRun>(
            "SELECT id, status, context_json, started_at, finished_at
             FROM cycle_runs
             ORDER BY started_at DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(cycles)
    }

    /// Row counts grouped by status, for the metrics surface.
    pub async fn counts_by_status(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM cycle_runs GROUP BY status",
        )
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}
