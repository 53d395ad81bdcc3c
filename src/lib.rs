#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Orbit Core
//!
//! Execution cycle orchestration engine. A unit of work moves through four
//! fixed stages (initiation, tiered transformation, normalization,
//! dispatch) with durable progress tracking so work survives process
//! restarts.
//!
//! ## Key Guarantees
//!
//! - **Checkpoint-based resume**: an append-only checkpoint log marks
//!   completed stages; after a restart the cycle picks up where it left off.
//! - **Namespace exclusivity**: at most one running cycle per namespace,
//!   enforced optimistically against the shared store.
//! - **Idempotent initiation**: one deduplicated initiation record per
//!   stable cycle context, backed by a store-level unique constraint.
//! - **Bounded retries**: transformation tiers retry with exponential
//!   backoff; dispatch deliveries that exhaust their budget are
//!   dead-lettered, never silently dropped.
//! - **Failure containment**: a poisoned unit is isolated at the smallest
//!   scope (attempt → tier → stage → cycle); nothing escapes `run_cycle`.
//!
//! ## Module Organization
//!
//! - [`models`] - Persisted entities and their queries
//! - [`database`] - Pool construction and embedded schema
//! - [`orchestration`] - The cycle state machine and its components
//! - [`resilience`] - Bounded retry with backoff
//! - [`events`] - Telemetry event publishing
//! - [`config`] - Environment config and the versioned snapshot cache
//! - [`web`] - Thin HTTP surface
//! - [`shutdown`] - Active-cycle drain on termination

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod resilience;
pub mod shutdown;
pub mod web;

pub use config::{ConfigCache, ConfigSnapshot, DispatchEndpoint, DispatchMethod, OrbitConfig, RunProfile};
pub use error::{OrbitError, Result};
pub use models::{CycleContext, CycleStage, CycleStatus, CycleTrigger};
pub use orchestration::{
    ActiveCycleCounter, CycleOrchestrator, DeliveryTransport, DispatchQueue, HttpTransport,
    InitiationSelector, NormalizationEngine, Recorder, RunProfileDriver, StoreHaltFlags,
    TransformationEngine, DEFAULT_ENDPOINT_KEY,
};
pub use shutdown::DrainController;
