//! # Normalization Models
//!
//! A batch envelope plus one item per normalized unit. Items link back to
//! the transformation they wrap, which is how dispatch processing scopes
//! jobs to a cycle (item → transformation → initiation → cycle run).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NormalizationBatch {
    pub id: String,
    pub status: String,
    pub processor_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NormalizationItem {
    pub id: String,
    pub batch_id: String,
    pub status: String,
    pub transformation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NormalizationBatch {
    pub async fn create_pending(pool: &SqlitePool) -> Result<NormalizationBatch> {
        let batch = sqlx::query_as::<_, NormalizationBatch>(
            "INSERT INTO normalization_batches (id, status, created_at)
             VALUES (?, 'pending', ?)
             RETURNING id, status, processor_ref, created_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(batch)
    }

    pub async fn mark_completed(pool: &SqlitePool, id: &str) -> Result<()> {
        sqlx::query("UPDATE normalization_batches SET status = 'completed' WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }
}

impl NormalizationItem {
    pub async fn create(
        pool: &SqlitePool,
        batch_id: &str,
        transformation_id: Option<&str>,
    ) -> Result<NormalizationItem> {
        let item = sqlx::query_as::<_, NormalizationItem>(
            "INSERT INTO normalization_items (id, batch_id, status, transformation_id, created_at)
             VALUES (?, ?, 'success', ?, ?)
             RETURNING id, batch_id, status, transformation_id, created_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(batch_id)
        .bind(transformation_id)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(item)
    }

    /// Item ids reachable from a cycle via transformation → initiation.
    pub async fn ids_for_cycle(pool: &SqlitePool, cycle_run_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT ni.id
             FROM normalization_items ni
             JOIN transformations t ON t.id = ni.transformation_id
             JOIN initiations i ON i.id = t.initiation_id
             WHERE i.cycle_run_id = ?",
        )
        .bind(cycle_run_id)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
