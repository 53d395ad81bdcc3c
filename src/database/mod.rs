//! # Database Layer
//!
//! Pool construction and the embedded schema for the cycle engine's
//! durable entities.
//!
//! Idempotency in this system leans on store-level constraint enforcement,
//! not application logic alone: `initiations.dedupe_hash` and
//! `(dispatch_jobs.normalization_item_id, endpoint_key)` carry unique
//! indexes so a racing creator loses at the store and recovers by
//! re-reading the winner.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

use crate::error::Result;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS cycle_runs (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        context_json TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS cycle_checkpoints (
        id TEXT PRIMARY KEY,
        cycle_run_id TEXT NOT NULL REFERENCES cycle_runs(id),
        stage TEXT NOT NULL,
        details_json TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_checkpoints_cycle
        ON cycle_checkpoints(cycle_run_id, created_at)",
    "CREATE TABLE IF NOT EXISTS initiations (
        id TEXT PRIMARY KEY,
        label TEXT NOT NULL,
        weight REAL NOT NULL,
        metadata_json TEXT NOT NULL,
        dedupe_hash TEXT NOT NULL UNIQUE,
        cycle_run_id TEXT NOT NULL REFERENCES cycle_runs(id),
        run_profile_id TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS transformations (
        id TEXT PRIMARY KEY,
        tier INTEGER NOT NULL,
        attempt INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        initiation_id TEXT NOT NULL REFERENCES initiations(id),
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_transformations_initiation
        ON transformations(initiation_id, tier)",
    "CREATE TABLE IF NOT EXISTS normalization_batches (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        processor_ref TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS normalization_items (
        id TEXT PRIMARY KEY,
        batch_id TEXT NOT NULL REFERENCES normalization_batches(id),
        status TEXT NOT NULL,
        transformation_id TEXT REFERENCES transformations(id),
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS dispatch_jobs (
        id TEXT PRIMARY KEY,
        endpoint_key TEXT NOT NULL,
        status TEXT NOT NULL,
        normalization_item_id TEXT NOT NULL REFERENCES normalization_items(id),
        endpoint_url TEXT,
        endpoint_method TEXT NOT NULL,
        token_snapshot TEXT,
        attempt INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        receipt_json TEXT,
        created_at TEXT NOT NULL,
        UNIQUE (normalization_item_id, endpoint_key)
    )",
    "CREATE TABLE IF NOT EXISTS dead_letter_dispatches (
        id TEXT PRIMARY KEY,
        dispatch_job_id TEXT NOT NULL REFERENCES dispatch_jobs(id),
        normalization_item_id TEXT NOT NULL,
        endpoint_key TEXT NOT NULL,
        last_error TEXT NOT NULL,
        payload_meta_json TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS execution_records (
        id TEXT PRIMARY KEY,
        scope TEXT NOT NULL,
        level TEXT NOT NULL,
        message TEXT NOT NULL,
        ref_id TEXT,
        cycle_run_id TEXT,
        details_json TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS namespace_halt_flags (
        namespace TEXT PRIMARY KEY,
        halted INTEGER NOT NULL DEFAULT 1,
        actor TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
];

/// Connect to the store and apply the embedded schema.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(sqlx::Error::from)?
        .create_if_missing(true)
        .foreign_keys(true);

    // An in-memory database is per-connection; the pool must not open a
    // second connection or it would see an empty schema.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    info!(database_url, "Database pool initialized");
    Ok(pool)
}

/// Apply the schema. Statements are idempotent, so this is safe to run on
/// every boot.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_applies_twice_without_error() {
        let pool = connect("sqlite::memory:").await.expect("connect");
        migrate(&pool).await.expect("second migrate is a no-op");
    }

    #[tokio::test]
    async fn creates_database_file_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("orbit.db");
        let url = format!("sqlite://{}", path.display());

        let pool = connect(&url).await.expect("connect");
        sqlx::query("SELECT COUNT(*) FROM cycle_runs")
            .fetch_one(&pool)
            .await
            .expect("schema applied");

        assert!(path.exists());
    }
}
