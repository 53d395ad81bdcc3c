//! # DispatchJob Model
//!
//! Outbound delivery unit. The endpoint URL, method and token are
//! snapshotted at enqueue time so an in-flight job is unaffected by a
//! concurrent configuration change. The store enforces at most one job
//! per (normalization item, endpoint key).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::config::DispatchMethod;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DispatchJobStatus {
    Pending,
    Delivering,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DispatchJob {
    pub id: String,
    pub endpoint_key: String,
    pub status: DispatchJobStatus,
    pub normalization_item_id: String,
    pub endpoint_url: Option<String>,
    pub endpoint_method: String,
    pub token_snapshot: Option<String>,
    pub attempt: i64,
    pub last_error: Option<String>,
    pub receipt_json: Option<Json<Value>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDispatchJob {
    pub endpoint_key: String,
    pub normalization_item_id: String,
    pub endpoint_url: Option<String>,
    pub endpoint_method: DispatchMethod,
    pub token_snapshot: Option<String>,
}

impl DispatchJob {
    pub async fn create(pool: &SqlitePool, new: NewDispatchJob) -> Result<DispatchJob> {
        let job = sqlx::query_as::<_, DispatchJob>(
            "INSERT INTO dispatch_jobs
                 (id, endpoint_key, status, normalization_item_id, endpoint_url,
                  endpoint_method, token_snapshot, attempt, created_at)
             VALUES (?, ?, 'pending', ?, ?, ?, ?, 0, ?)
             RETURNING id, endpoint_key, status, normalization_item_id, endpoint_url,
                       endpoint_method, token_snapshot, attempt, last_error, receipt_json,
                       created_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(new.endpoint_key)
        .bind(new.normalization_item_id)
        .bind(new.endpoint_url)
        .bind(new.endpoint_method.to_string())
        .bind(new.token_snapshot)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(job)
    }

    pub async fn find_by_item_and_key(
        pool: &SqlitePool,
        normalization_item_id: &str,
        endpoint_key: &str,
    ) -> Result<Option<DispatchJob>> {
        let job = sqlx::query_as::<_, DispatchJob>(
            "SELECT id, endpoint_key, status, normalization_item_id, endpoint_url,
                    endpoint_method, token_snapshot, attempt, last_error, receipt_json,
                    created_at
             FROM dispatch_jobs
             WHERE normalization_item_id = ? AND endpoint_key = ?",
        )
        .bind(normalization_item_id)
        .bind(endpoint_key)
        .fetch_optional(pool)
        .await?;

        Ok(job)
    }

    /// Pending jobs for the given normalization items, FIFO by creation.
    pub async fn pending_for_items(
        pool: &SqlitePool,
        normalization_item_ids: &[String],
    ) -> Result<Vec<DispatchJob>> {
        if normalization_item_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Runtime query API has no array bind for SQLite; expand the list.
        let placeholders = vec!["?"; normalization_item_ids.len()].join(", ");
        let sql = format!(
            "SELECT id, endpoint_key, status, normalization_item_id, endpoint_url,
                    endpoint_method, token_snapshot, attempt, last_error, receipt_json,
                    created_at
             FROM dispatch_jobs
             WHERE status = 'pending' AND normalization_item_id IN ({placeholders})
             ORDER BY created_at ASC, rowid ASC"
        );

        let mut query = sqlx::query_as::<_, DispatchJob>(&sql);
        for id in normalization_item_ids {
            query = query.bind(id);
        }

        Ok(query.fetch_all(pool).await?)
    }

    pub async fn mark_delivering(pool: &SqlitePool, id: &str) -> Result<()> {
        sqlx::query("UPDATE dispatch_jobs SET status = 'delivering' WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Record the outcome of a delivery attempt that produced a terminal
    /// classification, along with the endpoint's receipt.
    pub async fn record_response(
        pool: &SqlitePool,
        id: &str,
        status: DispatchJobStatus,
        receipt: Value,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE dispatch_jobs SET status = ?, receipt_json = ?, last_error = ? WHERE id = ?",
        )
        .bind(status)
        .bind(Json(receipt))
        .bind(last_error)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Terminal failure without a receipt (missing configuration or an
    /// exhausted retry budget).
    pub async fn mark_failed(
        pool: &SqlitePool,
        id: &str,
        attempt: i64,
        last_error: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE dispatch_jobs SET status = 'failed', attempt = ?, last_error = ? WHERE id = ?",
        )
        .bind(attempt)
        .bind(last_error)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Bump the attempt counter after a transport failure and return the
    /// job to `pending` for a future pass.
    pub async fn record_transport_failure(
        pool: &SqlitePool,
        id: &str,
        attempt: i64,
        last_error: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE dispatch_jobs SET status = 'pending', attempt = ?, last_error = ? WHERE id = ?",
        )
        .bind(attempt)
        .bind(last_error)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<DispatchJob>> {
        let job = sqlx::query_as::<_, DispatchJob>(
            "SELECT id, endpoint_key, status, normalization_item_id, endpoint_url,
                    endpoint_method, token_snapshot, attempt, last_error, receipt_json,
                    created_at
             FROM dispatch_jobs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(job)
    }

    pub async fn counts_by_status(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM dispatch_jobs GROUP BY status",
        )
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}
