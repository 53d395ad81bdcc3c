//! # Cycle Orchestrator
//!
//! Drives the four-stage state machine: initiation → tiered transformation
//! → normalization → dispatch. Owns namespace exclusivity, checkpointing,
//! final status aggregation and the active-cycle counter used for drain.
//!
//! ## Exclusivity
//!
//! At most one running cycle per namespace, enforced optimistically: an
//! existing `running` row for the namespace is resumed instead of starting
//! a second cycle. The read-then-create window means two running rows can
//! appear under adversarial timing; this is a documented best-effort
//! guarantee, not a lock.
//!
//! ## Failure containment
//!
//! Each stage is guarded individually: a stage failure is journaled and
//! the cycle carries on to status aggregation rather than aborting. Only
//! setup failures (the cycle row cannot be found or created) surface to
//! the caller; everything after that is reflected in the cycle's terminal
//! status.

use std::sync::Arc;

use serde_json::json;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::config::ConfigCache;
use crate::error::Result;
use crate::events::TelemetryPublisher;
use crate::models::{
    Checkpoint, CycleContext, CycleRun, CycleStage, CycleStatus, CycleTrigger, RecordScope,
    Transformation,
};
use crate::orchestration::active_cycles::ActiveCycleCounter;
use crate::orchestration::dispatch_queue::DispatchQueue;
use crate::orchestration::initiation_selector::InitiationSelector;
use crate::orchestration::normalization_engine::{NormalizationEngine, NormalizationInput};
use crate::orchestration::recorder::Recorder;
use crate::orchestration::transformation_engine::{
    normalization_payload, TransformationEngine, FIRST_TIER,
};

/// Endpoint key used for cycle dispatch; the concrete endpoint is supplied
/// via configuration.
pub const DEFAULT_ENDPOINT_KEY: &str = "default-endpoint";

/// Sentinel used for logging when a cycle has no namespace.
const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, Copy, Default)]
struct StageFlags {
    initiation: bool,
    transformation: bool,
    normalization: bool,
    dispatch: bool,
}

/// Final status per the aggregation rule: success iff all four stages
/// succeeded, failed iff none did, partial success otherwise.
fn aggregate_status(flags: StageFlags) -> CycleStatus {
    let succeeded = [
        flags.initiation,
        flags.transformation,
        flags.normalization,
        flags.dispatch,
    ]
    .iter()
    .filter(|s| **s)
    .count();

    match succeeded {
        4 => CycleStatus::Success,
        0 => CycleStatus::Failed,
        _ => CycleStatus::PartialSuccess,
    }
}

#[derive(Clone)]
pub struct CycleOrchestrator {
    pool: SqlitePool,
    recorder: Recorder,
    selector: InitiationSelector,
    transformations: TransformationEngine,
    normalization: NormalizationEngine,
    dispatch: DispatchQueue,
    telemetry: TelemetryPublisher,
    config_cache: Arc<ConfigCache>,
    active_cycles: ActiveCycleCounter,
}

impl CycleOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        recorder: Recorder,
        selector: InitiationSelector,
        transformations: TransformationEngine,
        normalization: NormalizationEngine,
        dispatch: DispatchQueue,
        telemetry: TelemetryPublisher,
        config_cache: Arc<ConfigCache>,
        active_cycles: ActiveCycleCounter,
    ) -> Self {
        Self {
            pool,
            recorder,
            selector,
            transformations,
            normalization,
            dispatch,
            telemetry,
            config_cache,
            active_cycles,
        }
    }

    pub fn active_cycle_count(&self) -> u64 {
        self.active_cycles.count()
    }

    /// Run (or resume) one execution cycle.
    ///
    /// Returns the cycle id, or an empty string when the global pause flag
    /// is active. Errs only on setup failure, before a cycle row exists;
    /// stage-level failures are absorbed into the cycle's terminal status.
    pub async fn run_cycle(
        &self,
        trigger: CycleTrigger,
        context: Option<CycleContext>,
    ) -> Result<String> {
        let snapshot = self.config_cache.current();
        if snapshot.config.global_pause {
            warn!("Global pause is enabled; skipping cycle");
            return Ok(String::new());
        }

        let context = context.unwrap_or_default();
        let namespace_key = context
            .namespace
            .clone()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let existing = CycleRun::find_running_by_namespace(
            &self.pool,
            context.namespace.as_deref(),
        )
        .await?;
        let resumed = existing.is_some();

        let cycle = match existing {
            Some(cycle) => {
                warn!(namespace = %namespace_key, cycle_id = %cycle.id, "Resuming existing running cycle for namespace");
                self.recorder
                    .info(
                        RecordScope::Cycle,
                        "Resuming existing running cycle for namespace",
                        Some(&cycle.id),
                        Some(&cycle.id),
                        Some(json!({ "namespace": context.namespace, "trigger": trigger.to_string() })),
                    )
                    .await;
                cycle
            }
            None => {
                let cycle = CycleRun::create(&self.pool, trigger, context.clone()).await?;
                Checkpoint::append(
                    &self.pool,
                    &cycle.id,
                    CycleStage::CycleStarted,
                    Some(json!({ "trigger": trigger.to_string(), "context": context })),
                )
                .await?;
                cycle
            }
        };

        let cycle_id = cycle.id.clone();
        let _guard = self.active_cycles.enter();

        if let Err(err) = self.execute_stages(&cycle, resumed, &snapshot.config).await {
            error!(cycle_id = %cycle_id, error = %err, "Cycle failed with unexpected error");
            if let Err(update_err) =
                CycleRun::mark_finished(&self.pool, &cycle_id, CycleStatus::Failed).await
            {
                error!(cycle_id = %cycle_id, error = %update_err, "Failed to mark cycle failed");
            }
            self.recorder
                .error(
                    RecordScope::Cycle,
                    "Cycle failed with unexpected error",
                    Some(&cycle_id),
                    Some(&cycle_id),
                    Some(json!({ "error": err.to_string() })),
                )
                .await;
        }

        Ok(cycle_id)
    }

    async fn execute_stages(
        &self,
        cycle: &CycleRun,
        resumed: bool,
        config: &crate::config::OrbitConfig,
    ) -> Result<()> {
        let cycle_id = cycle.id.as_str();
        let context = cycle.context().clone();

        if !resumed {
            self.recorder
                .info(
                    RecordScope::Cycle,
                    "Cycle started",
                    Some(cycle_id),
                    Some(cycle_id),
                    Some(json!({ "trigger": cycle.trigger().to_string(), "context": context })),
                )
                .await;
        }

        self.telemetry.publish(
            "execution_started",
            json!({
                "profile_id": context.profile_id,
                "run_id": context.run_profile_id,
                "namespace": context.namespace,
                "cycle_run_id": cycle_id,
            }),
        );

        let last_stage = Checkpoint::latest_for_cycle(&self.pool, cycle_id)
            .await?
            .map(|c| c.stage);

        let mut flags = StageFlags::default();

        // --- Initiation stage ---
        self.recorder
            .info(RecordScope::Initiation, "Initiation stage started", None, Some(cycle_id), None)
            .await;
        let initiation_id = match self.selector.generate_initiation(cycle_id).await {
            Ok(initiation) => {
                flags.initiation = true;
                self.recorder
                    .info(
                        RecordScope::Initiation,
                        "Initiation stage completed",
                        Some(&initiation.id),
                        Some(cycle_id),
                        None,
                    )
                    .await;
                Some(initiation.id)
            }
            Err(err) => {
                self.recorder
                    .error(
                        RecordScope::Initiation,
                        "Initiation stage failed",
                        None,
                        Some(cycle_id),
                        Some(json!({ "error": err.to_string() })),
                    )
                    .await;
                None
            }
        };

        // --- Transformation stage ---
        if let Some(initiation_id) = initiation_id.as_deref() {
            flags.transformation = self
                .run_transformation_stage(cycle_id, initiation_id, last_stage)
                .await;
        }

        // --- Normalization stage ---
        let mut normalization_item_ids: Vec<String> = Vec::new();
        if flags.transformation {
            if let Some(initiation_id) = initiation_id.as_deref() {
                match self.run_normalization_stage(cycle_id, initiation_id).await {
                    Ok(item_ids) => {
                        flags.normalization = !item_ids.is_empty();
                        normalization_item_ids = item_ids;
                    }
                    Err(err) => {
                        self.recorder
                            .error(
                                RecordScope::Normalization,
                                "Normalization stage failed",
                                None,
                                Some(cycle_id),
                                Some(json!({ "error": err.to_string() })),
                            )
                            .await;
                    }
                }
            }
        }

        // --- Dispatch stage ---
        if flags.normalization && !normalization_item_ids.is_empty() {
            flags.dispatch = self
                .run_dispatch_stage(cycle_id, &context, config, &normalization_item_ids)
                .await;
        }

        let final_status = aggregate_status(flags);
        CycleRun::mark_finished(&self.pool, cycle_id, final_status).await?;

        info!(cycle_id, status = %final_status, "Cycle completed");
        let stage_summary = json!({
            "initiation": flags.initiation,
            "transformations": flags.transformation,
            "normalization": flags.normalization,
            "dispatch": flags.dispatch,
        });
        self.recorder
            .info(
                RecordScope::Cycle,
                "Cycle completed",
                Some(cycle_id),
                Some(cycle_id),
                Some(json!({ "final_status": final_status, "stages": stage_summary })),
            )
            .await;

        Checkpoint::append(
            &self.pool,
            cycle_id,
            CycleStage::CycleFinished,
            Some(json!({ "final_status": final_status, "stages": stage_summary })),
        )
        .await?;

        Ok(())
    }

    /// Transformation stage: honors checkpoints, appends per-tier markers,
    /// and treats any successful tier as stage success.
    async fn run_transformation_stage(
        &self,
        cycle_id: &str,
        initiation_id: &str,
        last_stage: Option<CycleStage>,
    ) -> bool {
        self.recorder
            .info(
                RecordScope::Transformation,
                "Transformation stage started",
                Some(initiation_id),
                Some(cycle_id),
                None,
            )
            .await;

        // All tiers already complete per checkpoints: reuse persisted rows.
        let resume_tier = match last_stage {
            Some(stage) => match stage.resume_tier() {
                Some(tier) => tier,
                None => {
                    self.recorder
                        .info(
                            RecordScope::Transformation,
                            "Transformation stage skipped due to completed checkpoint",
                            Some(initiation_id),
                            Some(cycle_id),
                            None,
                        )
                        .await;
                    return true;
                }
            },
            None => FIRST_TIER,
        };

        let outcomes = match self
            .transformations
            .run_tiered_transformations(cycle_id, initiation_id, resume_tier)
            .await
        {
            Ok(outcomes) => outcomes,
            Err(err) => {
                self.recorder
                    .error(
                        RecordScope::Transformation,
                        "Transformation stage failed",
                        Some(initiation_id),
                        Some(cycle_id),
                        Some(json!({ "error": err.to_string() })),
                    )
                    .await;
                return false;
            }
        };

        // Append per-tier checkpoints for successful tiers. Append-only;
        // duplicates for the same stage are harmless since only the latest
        // row drives resume decisions.
        for outcome in &outcomes {
            if outcome.success {
                if let Some(stage) = CycleStage::for_tier(outcome.tier) {
                    if let Err(err) = Checkpoint::append(
                        &self.pool,
                        cycle_id,
                        stage,
                        Some(json!({ "transformation_id": outcome.transformation_id })),
                    )
                    .await
                    {
                        error!(cycle_id, tier = outcome.tier, error = %err, "Failed to append tier checkpoint");
                    }
                }
            }
        }

        let tier_summary: Vec<_> = outcomes
            .iter()
            .map(|o| {
                json!({
                    "tier": o.tier,
                    "success": o.success,
                    "transformation_id": o.transformation_id,
                })
            })
            .collect();
        self.recorder
            .info(
                RecordScope::Transformation,
                "Transformation stage completed",
                Some(initiation_id),
                Some(cycle_id),
                Some(json!({ "tiers": tier_summary })),
            )
            .await;

        outcomes.iter().any(|o| o.success)
    }

    /// Normalization stage: rehydrates successful transformations from the
    /// store and derives inputs with the canonical payload rule, so re-runs
    /// after a crash produce identical content without duplicating work.
    async fn run_normalization_stage(
        &self,
        cycle_id: &str,
        initiation_id: &str,
    ) -> Result<Vec<String>> {
        self.recorder
            .info(
                RecordScope::Normalization,
                "Normalization stage started",
                None,
                Some(cycle_id),
                None,
            )
            .await;

        let transformations =
            Transformation::find_successful_for_initiation(&self.pool, initiation_id).await?;

        let inputs: Vec<NormalizationInput> = transformations
            .iter()
            .map(|t| NormalizationInput {
                transformation_id: t.id.clone(),
                payload: normalization_payload(initiation_id, t.tier),
            })
            .collect();

        let results = self.normalization.normalize_payloads(cycle_id, &inputs).await?;
        let item_ids: Vec<String> = results
            .into_iter()
            .map(|r| r.normalization_item_id)
            .collect();

        self.recorder
            .info(
                RecordScope::Normalization,
                "Normalization stage completed",
                None,
                Some(cycle_id),
                Some(json!({ "normalization_item_count": item_ids.len() })),
            )
            .await;

        Ok(item_ids)
    }

    async fn run_dispatch_stage(
        &self,
        cycle_id: &str,
        context: &CycleContext,
        config: &crate::config::OrbitConfig,
        normalization_item_ids: &[String],
    ) -> bool {
        self.recorder
            .info(
                RecordScope::Dispatch,
                "Dispatch stage started",
                None,
                Some(cycle_id),
                Some(json!({ "normalization_item_count": normalization_item_ids.len() })),
            )
            .await;

        let result: Result<()> = async {
            self.dispatch
                .enqueue_dispatch_jobs(
                    cycle_id,
                    normalization_item_ids,
                    DEFAULT_ENDPOINT_KEY,
                    config,
                )
                .await?;
            self.dispatch
                .process_dispatch_queue(cycle_id, context, config)
                .await?;
            Checkpoint::append(
                &self.pool,
                cycle_id,
                CycleStage::DispatchComplete,
                Some(json!({ "normalization_item_count": normalization_item_ids.len() })),
            )
            .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.recorder
                    .info(
                        RecordScope::Dispatch,
                        "Dispatch stage completed",
                        None,
                        Some(cycle_id),
                        None,
                    )
                    .await;
                true
            }
            Err(err) => {
                // Dispatch failure must not fail the whole cycle; record
                // and fall through to status aggregation.
                self.recorder
                    .error(
                        RecordScope::Dispatch,
                        "Dispatch stage failed",
                        None,
                        Some(cycle_id),
                        Some(json!({ "error": err.to_string() })),
                    )
                    .await;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_aggregation_rule() {
        let all = StageFlags {
            initiation: true,
            transformation: true,
            normalization: true,
            dispatch: true,
        };
        assert_eq!(aggregate_status(all), CycleStatus::Success);

        let none = StageFlags::default();
        assert_eq!(aggregate_status(none), CycleStatus::Failed);

        let two = StageFlags {
            initiation: true,
            transformation: true,
            ..StageFlags::default()
        };
        assert_eq!(aggregate_status(two), CycleStatus::PartialSuccess);
    }
}
