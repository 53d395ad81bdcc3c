//! # DeadLetterDispatch Model
//!
//! Terminal record for a dispatch job that exhausted its retry budget.
//! Captures the error and minimal metadata, never the payload. Rows are
//! never auto-requeued.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeadLetterDispatch {
    pub id: String,
    pub dispatch_job_id: String,
    pub normalization_item_id: String,
    pub endpoint_key: String,
    pub last_error: String,
    pub payload_meta_json: Option<Json<Value>>,
    pub created_at: DateTime<Utc>,
}

impl DeadLetterDispatch {
    pub async fn create(
        pool: &SqlitePool,
        dispatch_job_id: &str,
        normalization_item_id: &str,
        endpoint_key: &str,
        last_error: &str,
        payload_meta: Value,
    ) -> Result<DeadLetterDispatch> {
        let row = sqlx::query_as::<_, DeadLetterDispatch>(
            "INSERT INTO dead_letter_dispatches
                 (id, dispatch_job_id, normalization_item_id, endpoint_key, last_error,
                  payload_meta_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id, dispatch_job_id, normalization_item_id, endpoint_key, last_error,
                       payload_meta_json, created_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(dispatch_job_id)
        .bind(normalization_item_id)
        .bind(endpoint_key)
        .bind(last_error)
        .bind(Json(payload_meta))
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(row)
    }

    pub async fn find_for_job(
        pool: &SqlitePool,
        dispatch_job_id: &str,
    ) -> Result<Vec<DeadLetterDispatch>> {
        let rows = sqlx::query_as::<_, DeadLetterDispatch>(
            "SELECT id, dispatch_job_id, normalization_item_id, endpoint_key, last_error,
                    payload_meta_json, created_at
             FROM dead_letter_dispatches
             WHERE dispatch_job_id = ?",
        )
        .bind(dispatch_job_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM dead_letter_dispatches")
                .fetch_one(pool)
                .await?;

        Ok(count)
    }
}
