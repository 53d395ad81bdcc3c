//! # Transformation Model
//!
//! One row per tier attempt. History is retained in full: a pending row is
//! inserted before every attempt, then marked success or failed. Resume
//! and normalization query the successful rows rather than trusting
//! anything held in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TransformationStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Transformation {
    pub id: String,
    pub tier: i64,
    pub attempt: i64,
    pub status: TransformationStatus,
    pub error_message: Option<String>,
    pub initiation_id: String,
    pub created_at: DateTime<Utc>,
}

impl Transformation {
    /// Insert the pending row recorded before an attempt runs.
    pub async fn create_pending(
        pool: &SqlitePool,
        initiation_id: &str,
        tier: u8,
        attempt: u32,
    ) -> Result<Transformation> {
        let transformation = sqlx::query_as::<_, Transformation>(
            "INSERT INTO transformations (id, tier, attempt, status, initiation_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id, tier, attempt, status, error_message, initiation_id, created_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(i64::from(tier))
        .bind(i64::from(attempt))
        .bind(TransformationStatus::Pending)
        .bind(initiation_id)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(transformation)
    }

    pub async fn mark_success(pool: &SqlitePool, id: &str) -> Result<()> {
        sqlx::query("UPDATE transformations SET status = ? WHERE id = ?")
            .bind(TransformationStatus::Success)
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn mark_failed(pool: &SqlitePool, id: &str, error_message: &str) -> Result<()> {
        sqlx::query("UPDATE transformations SET status = ?, error_message = ? WHERE id = ?")
            .bind(TransformationStatus::Failed)
            .bind(error_message)
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Successful rows for the initiation, tier-ordered. Feeds resume and
    /// the normalization stage.
    pub async fn find_successful_for_initiation(
        pool: &SqlitePool,
        initiation_id: &str,
    ) -> Result<Vec<Transformation>> {
        let rows = sqlx::query_as::<_, Transformation>(
            "SELECT id, tier, attempt, status, error_message, initiation_id, created_at
             FROM transformations
             WHERE initiation_id = ? AND status = 'success'
             ORDER BY tier ASC, attempt ASC",
        )
        .bind(initiation_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Full attempt history for the initiation, for diagnostics and tests.
    pub async fn find_all_for_initiation(
        pool: &SqlitePool,
        initiation_id: &str,
    ) -> Result<Vec<Transformation>> {
        let rows = sqlx::query_as::<_, Transformation>(
            "SELECT id, tier, attempt, status, error_message, initiation_id, created_at
             FROM transformations
             WHERE initiation_id = ?
             ORDER BY tier ASC, attempt ASC",
        )
        .bind(initiation_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}
