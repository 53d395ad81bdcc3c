//! # Namespace Halt Flag Model
//!
//! Governance switch consulted by the run-profile driver before starting a
//! cycle for a namespace. Setting a flag is idempotent (upsert).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::error::Result;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct HaltFlag {
    pub namespace: String,
    pub halted: bool,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

impl HaltFlag {
    pub async fn set(pool: &SqlitePool, namespace: &str, actor: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO namespace_halt_flags (namespace, halted, actor, created_at)
             VALUES (?, 1, ?, ?)
             ON CONFLICT (namespace) DO UPDATE SET halted = 1, actor = excluded.actor",
        )
        .bind(namespace)
        .bind(actor)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn clear(pool: &SqlitePool, namespace: &str) -> Result<()> {
        sqlx::query("DELETE FROM namespace_halt_flags WHERE namespace = ?")
            .bind(namespace)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn is_halted(pool: &SqlitePool, namespace: &str) -> Result<bool> {
        let row: Option<(bool,)> =
            sqlx::query_as("SELECT halted FROM namespace_halt_flags WHERE namespace = ?")
                .bind(namespace)
                .fetch_optional(pool)
                .await?;

        Ok(row.map(|(halted,)| halted).unwrap_or(false))
    }
}
