//! # Initiation Selector
//!
//! Produces the deduplicated initiation record for a cycle.
//!
//! The dedupe key hashes only the fields of the cycle context that are
//! stable across logically-identical triggers (profile, run-profile,
//! instruction, namespace). Trigger type and wall-clock time are excluded
//! on purpose: the same logical work dedupes no matter when or how it was
//! started. The hash input is a canonical key-ordered encoding, so it is
//! order-independent by construction.

use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{OrbitError, Result};
use crate::models::{CycleContext, CycleRun, Initiation, NewInitiation, RecordScope};
use crate::orchestration::recorder::Recorder;

/// Stable content hash over the dedupe-relevant context subset.
pub fn dedupe_hash(context: &CycleContext) -> String {
    // Fixed field order; absent fields hash as explicit nulls.
    let stable = json!({
        "instruction_id": context.instruction_id,
        "namespace": context.namespace,
        "profile_id": context.profile_id,
        "run_profile_id": context.run_profile_id,
    });

    let mut hasher = Sha256::new();
    hasher.update(stable.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct InitiationSelector {
    pool: SqlitePool,
    recorder: Recorder,
}

impl InitiationSelector {
    pub fn new(pool: SqlitePool, recorder: Recorder) -> Self {
        Self { pool, recorder }
    }

    /// Return the initiation for the cycle's stable context, creating it
    /// only if no row exists for the hash.
    ///
    /// Creation is idempotent under concurrency: losing a unique-constraint
    /// race is recovered by re-reading the winning row.
    pub async fn generate_initiation(&self, cycle_run_id: &str) -> Result<Initiation> {
        let cycle = CycleRun::find_by_id(&self.pool, cycle_run_id)
            .await?
            .ok_or_else(|| {
                OrbitError::Orchestration(format!("CycleRun {cycle_run_id} not found"))
            })?;

        let context = cycle.context().clone();
        let hash = dedupe_hash(&context);

        if let Some(existing) = Initiation::find_by_dedupe_hash(&self.pool, &hash).await? {
            self.recorder
                .info(
                    RecordScope::Initiation,
                    "Reusing existing initiation for stable context",
                    Some(&existing.id),
                    Some(cycle_run_id),
                    Some(json!({ "dedupe_hash": hash })),
                )
                .await;
            return Ok(existing);
        }

        let new = NewInitiation {
            label: format!("auto-initiation-{}", &hash[..8]),
            weight: 1.0,
            metadata: serde_json::to_value(&context)?,
            dedupe_hash: hash.clone(),
            cycle_run_id: cycle_run_id.to_string(),
            run_profile_id: context.run_profile_id.clone(),
        };

        match Initiation::create(&self.pool, new).await {
            Ok(created) => {
                self.recorder
                    .info(
                        RecordScope::Initiation,
                        "Created initiation for stable context",
                        Some(&created.id),
                        Some(cycle_run_id),
                        Some(json!({ "dedupe_hash": hash })),
                    )
                    .await;
                Ok(created)
            }
            Err(err) if err.is_unique_violation() => {
                // A concurrent creator won; take its row instead of
                // surfacing the violation.
                debug!(dedupe_hash = %hash, "Lost initiation creation race; re-reading winner");
                Initiation::find_by_dedupe_hash(&self.pool, &hash)
                    .await?
                    .ok_or(err)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_ignores_trigger_and_time() {
        let context = CycleContext {
            profile_id: Some("p-1".to_string()),
            namespace: Some("ns-1".to_string()),
            ..CycleContext::default()
        };

        // Same stable fields, same hash, regardless of anything else.
        assert_eq!(dedupe_hash(&context), dedupe_hash(&context.clone()));
    }

    #[test]
    fn hash_distinguishes_stable_fields() {
        let a = CycleContext {
            namespace: Some("ns-1".to_string()),
            ..CycleContext::default()
        };
        let b = CycleContext {
            namespace: Some("ns-2".to_string()),
            ..CycleContext::default()
        };

        assert_ne!(dedupe_hash(&a), dedupe_hash(&b));
    }
}
