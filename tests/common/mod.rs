//! Shared fixtures for the integration suite: an in-memory engine wired
//! to a scripted delivery transport, plus helpers for seeding the entity
//! chain a dispatch job hangs off (cycle → initiation → transformation →
//! normalization item).

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::SqlitePool;

use orbit_core::config::{ConfigCache, DispatchEndpoint, DispatchMethod, OrbitConfig};
use orbit_core::database;
use orbit_core::models::{
    CycleContext, CycleRun, CycleTrigger, Initiation, NewInitiation, NormalizationBatch,
    NormalizationItem, Transformation,
};
use orbit_core::orchestration::{
    build_engine_with_policy, ActiveCycleCounter, CycleOrchestrator, DeliveryRequest,
    DeliveryResponse, DeliveryTransport, Recorder, TransportError,
};
use orbit_core::resilience::RetryPolicy;
use orbit_core::DEFAULT_ENDPOINT_KEY;

/// One scripted delivery outcome.
#[derive(Debug, Clone)]
pub enum Delivery {
    Status(u16),
    Error(&'static str),
}

/// Transport double that replays a script and records every request.
///
/// Once the script is exhausted every further delivery succeeds with 200,
/// which keeps the happy-path tests free of per-job scripting.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Delivery>>,
    requests: Mutex<Vec<DeliveryRequest>>,
}

impl MockTransport {
    pub fn always_ok() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_script(script: Vec<Delivery>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<DeliveryRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl DeliveryTransport for MockTransport {
    async fn deliver(
        &self,
        request: DeliveryRequest,
    ) -> Result<DeliveryResponse, TransportError> {
        self.requests.lock().push(request);
        match self.script.lock().pop_front() {
            Some(Delivery::Status(status)) => Ok(DeliveryResponse { status }),
            Some(Delivery::Error(message)) => Err(TransportError(message.to_string())),
            None => Ok(DeliveryResponse { status: 200 }),
        }
    }
}

/// Retry policy with near-zero backoff so exhausted budgets do not slow
/// the suite down.
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        multiplier: 1.0,
    }
}

/// Config with the default dispatch endpoint wired in.
pub fn endpoint_config() -> OrbitConfig {
    OrbitConfig {
        endpoints: vec![DispatchEndpoint {
            key: DEFAULT_ENDPOINT_KEY.to_string(),
            url: "http://127.0.0.1:9/receive".to_string(),
            method: DispatchMethod::Post,
            token: Some("test-token".to_string()),
        }],
        ..OrbitConfig::default()
    }
}

pub struct TestEngine {
    pub pool: SqlitePool,
    pub orchestrator: Arc<CycleOrchestrator>,
    pub config_cache: Arc<ConfigCache>,
    pub recorder: Recorder,
    pub transport: Arc<MockTransport>,
}

pub async fn engine_with(config: OrbitConfig, transport: Arc<MockTransport>) -> TestEngine {
    let pool = database::connect("sqlite::memory:").await.expect("connect");
    let active_cycles = ActiveCycleCounter::new();
    let config_cache = Arc::new(ConfigCache::new(config, active_cycles.clone()));

    let handles = build_engine_with_policy(
        pool.clone(),
        Arc::clone(&config_cache),
        active_cycles,
        transport.clone(),
        fast_retry_policy(),
    );

    TestEngine {
        pool,
        orchestrator: handles.orchestrator,
        config_cache,
        recorder: handles.recorder,
        transport,
    }
}

pub struct SeededChain {
    pub cycle_id: String,
    pub initiation_id: String,
    pub transformation_id: String,
    pub item_id: String,
}

/// Seed one deliverable normalization item with its full ancestry.
pub async fn seed_delivery_chain(pool: &SqlitePool, dedupe_hash: &str) -> SeededChain {
    let cycle = CycleRun::create(pool, CycleTrigger::Manual, CycleContext::default())
        .await
        .expect("cycle");
    let initiation = Initiation::create(
        pool,
        NewInitiation {
            label: "seeded".to_string(),
            weight: 1.0,
            metadata: serde_json::json!({}),
            dedupe_hash: dedupe_hash.to_string(),
            cycle_run_id: cycle.id.clone(),
            run_profile_id: None,
        },
    )
    .await
    .expect("initiation");
    let transformation = Transformation::create_pending(pool, &initiation.id, 1, 1)
        .await
        .expect("transformation");
    Transformation::mark_success(pool, &transformation.id)
        .await
        .expect("mark success");
    let batch = NormalizationBatch::create_pending(pool).await.expect("batch");
    let item = NormalizationItem::create(pool, &batch.id, Some(&transformation.id))
        .await
        .expect("item");

    SeededChain {
        cycle_id: cycle.id,
        initiation_id: initiation.id,
        transformation_id: transformation.id,
        item_id: item.id,
    }
}
