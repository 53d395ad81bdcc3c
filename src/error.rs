//! # Structured Error Handling
//!
//! Crate-wide error taxonomy for the cycle orchestration engine.
//!
//! Variants map onto the failure classes the engine distinguishes:
//! configuration errors are terminal for the unit that hit them, transient
//! errors are retried by the caller, store races are recovered locally, and
//! anything unclassified is caught at the orchestrator boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrbitError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transformation error: {0}")]
    Transformation(String),

    #[error("Orchestration error: {0}")]
    Orchestration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrbitError {
    /// True when the error came from a store-level unique constraint.
    ///
    /// Used by idempotent creators to recover from losing a creation race:
    /// the winner's row is re-read instead of surfacing the violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            OrbitError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrbitError>;
