//! Engine wiring.
//!
//! One place that assembles the orchestrator and its components from a
//! pool, a config cache and a delivery transport. The server binary and
//! the test suite both go through here; only the transport differs.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::ConfigCache;
use crate::events::TelemetryPublisher;
use crate::orchestration::active_cycles::ActiveCycleCounter;
use crate::orchestration::dispatch_queue::DispatchQueue;
use crate::orchestration::initiation_selector::InitiationSelector;
use crate::orchestration::normalization_engine::NormalizationEngine;
use crate::orchestration::orchestrator::CycleOrchestrator;
use crate::orchestration::recorder::Recorder;
use crate::orchestration::transformation_engine::TransformationEngine;
use crate::orchestration::transport::DeliveryTransport;
use crate::resilience::RetryPolicy;

pub struct EngineHandles {
    pub orchestrator: Arc<CycleOrchestrator>,
    pub telemetry: TelemetryPublisher,
    pub recorder: Recorder,
    pub active_cycles: ActiveCycleCounter,
}

pub fn build_engine(
    pool: SqlitePool,
    config_cache: Arc<ConfigCache>,
    active_cycles: ActiveCycleCounter,
    transport: Arc<dyn DeliveryTransport>,
) -> EngineHandles {
    build_engine_with_policy(
        pool,
        config_cache,
        active_cycles,
        transport,
        RetryPolicy::default(),
    )
}

/// Variant taking an explicit transformation retry policy; tests use a
/// near-zero base delay here.
pub fn build_engine_with_policy(
    pool: SqlitePool,
    config_cache: Arc<ConfigCache>,
    active_cycles: ActiveCycleCounter,
    transport: Arc<dyn DeliveryTransport>,
    retry_policy: RetryPolicy,
) -> EngineHandles {
    let recorder = Recorder::new(pool.clone());
    let telemetry = TelemetryPublisher::default();

    let selector = InitiationSelector::new(pool.clone(), recorder.clone());
    let transformations =
        TransformationEngine::with_policy(pool.clone(), recorder.clone(), retry_policy);
    let normalization = NormalizationEngine::new(pool.clone(), recorder.clone());
    let dispatch = DispatchQueue::new(
        pool.clone(),
        recorder.clone(),
        telemetry.clone(),
        transport,
    );

    let orchestrator = Arc::new(CycleOrchestrator::new(
        pool,
        recorder.clone(),
        selector,
        transformations,
        normalization,
        dispatch,
        telemetry.clone(),
        config_cache,
        active_cycles.clone(),
    ));

    EngineHandles {
        orchestrator,
        telemetry,
        recorder,
        active_cycles,
    }
}
