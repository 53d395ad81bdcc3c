//! # ExecutionRecord Model
//!
//! Append-only journal row. Persistence failures are the caller's problem
//! only to the extent of logging them; see the recorder, which swallows
//! them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::error::Result;

/// Pipeline area a journal row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RecordScope {
    Cycle,
    Initiation,
    Transformation,
    Normalization,
    Dispatch,
    Governance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RecordLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub scope: RecordScope,
    pub level: RecordLevel,
    pub message: String,
    pub ref_id: Option<String>,
    pub cycle_run_id: Option<String>,
    pub details_json: Option<Json<Value>>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub async fn create(
        pool: &SqlitePool,
        scope: RecordScope,
        level: RecordLevel,
        message: &str,
        ref_id: Option<&str>,
        cycle_run_id: Option<&str>,
        details: Option<Value>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO execution_records
                 (id, scope, level, message, ref_id, cycle_run_id, details_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(scope)
        .bind(level)
        .bind(message)
        .bind(ref_id)
        .bind(cycle_run_id)
        .bind(details.map(Json))
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn find_for_cycle(
        pool: &SqlitePool,
        cycle_run_id: &str,
    ) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query_as::<_, ExecutionRecord>(
            "SELECT id, scope, level, message, ref_id, cycle_run_id, details_json, created_at
             FROM execution_records
             WHERE cycle_run_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(cycle_run_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}
