//! # Execution Recorder
//!
//! Best-effort, append-only journal of stage events. The recorder must
//! never cause the operation it observes to fail: a persistence error is
//! logged through tracing and swallowed.

use serde_json::Value;
use sqlx::SqlitePool;
use tracing::error;

use crate::models::{ExecutionRecord, RecordLevel, RecordScope};

#[derive(Debug, Clone)]
pub struct Recorder {
    pool: SqlitePool,
}

impl Recorder {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        scope: RecordScope,
        level: RecordLevel,
        message: &str,
        ref_id: Option<&str>,
        cycle_run_id: Option<&str>,
        details: Option<Value>,
    ) {
        if let Err(err) = ExecutionRecord::create(
            &self.pool,
            scope,
            level,
            message,
            ref_id,
            cycle_run_id,
            details,
        )
        .await
        {
            error!(error = %err, message, "Failed to persist execution record");
        }
    }

    pub async fn info(
        &self,
        scope: RecordScope,
        message: &str,
        ref_id: Option<&str>,
        cycle_run_id: Option<&str>,
        details: Option<Value>,
    ) {
        self.record(scope, RecordLevel::Info, message, ref_id, cycle_run_id, details)
            .await;
    }

    pub async fn warn(
        &self,
        scope: RecordScope,
        message: &str,
        ref_id: Option<&str>,
        cycle_run_id: Option<&str>,
        details: Option<Value>,
    ) {
        self.record(scope, RecordLevel::Warning, message, ref_id, cycle_run_id, details)
            .await;
    }

    pub async fn error(
        &self,
        scope: RecordScope,
        message: &str,
        ref_id: Option<&str>,
        cycle_run_id: Option<&str>,
        details: Option<Value>,
    ) {
        self.record(scope, RecordLevel::Error, message, ref_id, cycle_run_id, details)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database;

    #[tokio::test]
    async fn records_survive_round_trip() {
        let pool = database::connect("sqlite::memory:").await.expect("connect");
        let recorder = Recorder::new(pool.clone());

        recorder
            .info(
                RecordScope::Cycle,
                "Cycle started",
                Some("cycle-1"),
                Some("cycle-1"),
                None,
            )
            .await;

        let records = ExecutionRecord::find_for_cycle(&pool, "cycle-1")
            .await
            .expect("query");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "Cycle started");
        assert_eq!(records[0].level, RecordLevel::Info);
    }

    #[tokio::test]
    async fn persistence_failure_is_swallowed() {
        let pool = database::connect("sqlite::memory:").await.expect("connect");
        sqlx::query("DROP TABLE execution_records")
            .execute(&pool)
            .await
            .expect("drop");

        let recorder = Recorder::new(pool);
        // Must not panic or surface the error.
        recorder
            .error(RecordScope::Dispatch, "unreachable table", None, None, None)
            .await;
    }
}
