//! # Initiation Model
//!
//! The deduplicated logical work-root for a cycle. Rows are keyed by a
//! content hash over the stable cycle context and are immutable after
//! creation; a repeat cycle with identical stable context reuses the
//! existing row.
//!
//! The `dedupe_hash` unique index is the authority: a concurrent creator
//! that loses the insert race recovers by re-reading the winner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Initiation {
    pub id: String,
    pub label: String,
    pub weight: f64,
    pub metadata_json: Json<Value>,
    pub dedupe_hash: String,
    pub cycle_run_id: String,
    pub run_profile_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewInitiation {
    pub label: String,
    pub weight: f64,
    pub metadata: Value,
    pub dedupe_hash: String,
    pub cycle_run_id: String,
    pub run_profile_id: Option<String>,
}

impl Initiation {
    /// Insert a new initiation. Fails with a unique violation when another
    /// creator already owns the hash; callers recover via
    /// [`Initiation::find_by_dedupe_hash`].
    pub async fn create(pool: &SqlitePool, new: NewInitiation) -> Result<Initiation> {
        let initiation = sqlx::query_as::<_, Initiation>(
            "INSERT INTO initiations
                 (id, label, weight, metadata_json, dedupe_hash, cycle_run_id, run_profile_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id, label, weight, metadata_json, dedupe_hash, cycle_run_id,
                       run_profile_id, created_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(new.label)
        .bind(new.weight)
        .bind(Json(new.metadata))
        .bind(new.dedupe_hash)
        .bind(new.cycle_run_id)
        .bind(new.run_profile_id)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(initiation)
    }

    pub async fn find_by_dedupe_hash(
        pool: &SqlitePool,
        dedupe_hash: &str,
    ) -> Result<Option<Initiation>> {
        let initiation = sqlx::query_as::<_, Initiation>(
            "SELECT id, label, weight, metadata_json, dedupe_hash, cycle_run_id,
                    run_profile_id, created_at
             FROM initiations WHERE dedupe_hash = ?",
        )
        .bind(dedupe_hash)
        .fetch_optional(pool)
        .await?;

        Ok(initiation)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Initiation>> {
        let initiation = sqlx::query_as::<_, Initiation>(
            "SELECT id, label, weight, metadata_json, dedupe_hash, cycle_run_id,
                    run_profile_id, created_at
             FROM initiations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(initiation)
    }
}
