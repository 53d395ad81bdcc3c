//! # Checkpoint Model
//!
//! Append-only stage markers driving crash-safe resume. Historical rows
//! are never mutated; only the latest row per cycle is consulted when the
//! orchestrator picks a resume point. Duplicate checkpoints for the same
//! stage are harmless.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::error::Result;

/// Durable stage markers, in cycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CycleStage {
    CycleStarted,
    Tier1Complete,
    Tier2Complete,
    Tier3Complete,
    DispatchComplete,
    CycleFinished,
}

impl CycleStage {
    /// Stage marker for a completed transformation tier.
    pub fn for_tier(tier: u8) -> Option<CycleStage> {
        match tier {
            1 => Some(Self::Tier1Complete),
            2 => Some(Self::Tier2Complete),
            3 => Some(Self::Tier3Complete),
            _ => None,
        }
    }

    /// The transformation tier to resume from, given this latest stage.
    ///
    /// `None` means all tiers are already complete and persisted rows
    /// should be reused instead of re-running transformation.
    pub fn resume_tier(&self) -> Option<u8> {
        match self {
            Self::CycleStarted => Some(1),
            Self::Tier1Complete => Some(2),
            Self::Tier2Complete => Some(3),
            Self::Tier3Complete | Self::DispatchComplete | Self::CycleFinished => None,
        }
    }
}

impl std::fmt::Display for CycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CycleStarted => write!(f, "cycle_started"),
            Self::Tier1Complete => write!(f, "tier1_complete"),
            Self::Tier2Complete => write!(f, "tier2_complete"),
            Self::Tier3Complete => write!(f, "tier3_complete"),
            Self::DispatchComplete => write!(f, "dispatch_complete"),
            Self::CycleFinished => write!(f, "cycle_finished"),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub cycle_run_id: String,
    pub stage: CycleStage,
    pub details_json: Option<Json<Value>>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Append a checkpoint for the cycle.
    pub async fn append(
        pool: &SqlitePool,
        cycle_run_id: &str,
        stage: CycleStage,
        details: Option<Value>,
    ) -> Result<Checkpoint> {
        let checkpoint = sqlx::query_as::<_, Checkpoint>(
            "INSERT INTO cycle_checkpoints (id, cycle_run_id, stage, details_json, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id, cycle_run_id, stage, details_json, created_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(cycle_run_id)
        .bind(stage)
        .bind(details.map(Json))
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(checkpoint)
    }

    /// Latest checkpoint for the cycle, if any.
    pub async fn latest_for_cycle(
        pool: &SqlitePool,
        cycle_run_id: &str,
    ) -> Result<Option<Checkpoint>> {
        let checkpoint = sqlx::query_as::<_, Checkpoint>(
            "SELECT id, cycle_run_id, stage, details_json, created_at
             FROM cycle_checkpoints
             WHERE cycle_run_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
        )
        .bind(cycle_run_id)
        .fetch_optional(pool)
        .await?;

        Ok(checkpoint)
    }
}
