//! # Normalization Engine
//!
//! Wraps successful transformation outputs into normalized units inside a
//! batch envelope. The external processor is modeled as a no-op that marks
//! items normalized without interpreting payload content.

use sqlx::SqlitePool;

use crate::error::Result;
use crate::models::{NormalizationBatch, NormalizationItem, RecordScope};
use crate::orchestration::recorder::Recorder;

/// One payload to normalize, linked to the transformation that produced it.
#[derive(Debug, Clone)]
pub struct NormalizationInput {
    pub transformation_id: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct NormalizedItem {
    pub normalization_item_id: String,
}

#[derive(Debug, Clone)]
pub struct NormalizationEngine {
    pool: SqlitePool,
    recorder: Recorder,
}

impl NormalizationEngine {
    pub fn new(pool: SqlitePool, recorder: Recorder) -> Self {
        Self { pool, recorder }
    }

    /// Create a batch, one item per input, then complete the batch.
    pub async fn normalize_payloads(
        &self,
        cycle_run_id: &str,
        inputs: &[NormalizationInput],
    ) -> Result<Vec<NormalizedItem>> {
        let batch = NormalizationBatch::create_pending(&self.pool).await?;

        self.recorder
            .info(
                RecordScope::Normalization,
                "Created normalization batch",
                Some(&batch.id),
                Some(cycle_run_id),
                None,
            )
            .await;

        let mut results = Vec::with_capacity(inputs.len());
        for input in inputs {
            let item =
                NormalizationItem::create(&self.pool, &batch.id, Some(&input.transformation_id))
                    .await?;

            self.recorder
                .info(
                    RecordScope::Normalization,
                    "Normalized payload item",
                    Some(&item.id),
                    Some(cycle_run_id),
                    None,
                )
                .await;

            results.push(NormalizedItem {
                normalization_item_id: item.id,
            });
        }

        NormalizationBatch::mark_completed(&self.pool, &batch.id).await?;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database;
    use crate::models::{CycleContext, CycleRun, CycleTrigger, Initiation, NewInitiation, Transformation};

    #[tokio::test]
    async fn batch_completes_with_one_item_per_input() {
        let pool = database::connect("sqlite::memory:").await.expect("connect");
        let recorder = Recorder::new(pool.clone());
        let engine = NormalizationEngine::new(pool.clone(), recorder);

        let cycle = CycleRun::create(&pool, CycleTrigger::Manual, CycleContext::default())
            .await
            .expect("cycle");
        let initiation = Initiation::create(
            &pool,
            NewInitiation {
                label: "test".to_string(),
                weight: 1.0,
                metadata: serde_json::json!({}),
                dedupe_hash: "hash-1".to_string(),
                cycle_run_id: cycle.id.clone(),
                run_profile_id: None,
            },
        )
        .await
        .expect("initiation");
        let transformation = Transformation::create_pending(&pool, &initiation.id, 1, 1)
            .await
            .expect("transformation");

        let inputs = vec![NormalizationInput {
            transformation_id: transformation.id.clone(),
            payload: b"payload".to_vec(),
        }];

        let items = engine
            .normalize_payloads(&cycle.id, &inputs)
            .await
            .expect("normalize");

        assert_eq!(items.len(), 1);

        let (status,): (String,) =
            sqlx::query_as("SELECT status FROM normalization_batches LIMIT 1")
                .fetch_one(&pool)
                .await
                .expect("batch row");
        assert_eq!(status, "completed");
    }
}
