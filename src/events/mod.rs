//! Telemetry event system.
//!
//! One-way sink: the engine publishes lifecycle events and never blocks on
//! or observes whether anyone is listening.

pub mod publisher;

pub use publisher::{TelemetryEvent, TelemetryPublisher};
