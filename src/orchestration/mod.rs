//! # Orchestration
//!
//! The cycle engine: the orchestrator's four-stage state machine and the
//! components it drives, plus the time-based triggers that invoke it.

pub mod active_cycles;
pub mod bootstrap;
pub mod dispatch_queue;
pub mod initiation_selector;
pub mod normalization_engine;
pub mod orchestrator;
pub mod recorder;
pub mod run_profiles;
pub mod scheduler;
pub mod transformation_engine;
pub mod transport;

pub use active_cycles::{ActiveCycleCounter, ActiveCycleGuard};
pub use bootstrap::{build_engine, build_engine_with_policy, EngineHandles};
pub use dispatch_queue::DispatchQueue;
pub use initiation_selector::InitiationSelector;
pub use normalization_engine::{NormalizationEngine, NormalizationInput, NormalizedItem};
pub use orchestrator::{CycleOrchestrator, DEFAULT_ENDPOINT_KEY};
pub use recorder::Recorder;
pub use run_profiles::{HaltFlagStore, RunProfileDriver, StoreHaltFlags};
pub use transformation_engine::{TierOutcome, TransformationEngine};
pub use transport::{DeliveryRequest, DeliveryResponse, DeliveryTransport, HttpTransport, TransportError};
