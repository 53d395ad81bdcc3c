//! # Run-Profile Driver
//!
//! Iterates enabled run-profiles and starts one cycle per profile,
//! consulting the namespace halt flag before each. Halt-flag storage is an
//! external collaborator behind the [`HaltFlagStore`] trait; a store-backed
//! implementation is provided.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::config::ConfigCache;
use crate::error::Result;
use crate::models::{CycleContext, CycleTrigger, HaltFlag, RecordScope};
use crate::orchestration::orchestrator::CycleOrchestrator;
use crate::orchestration::recorder::Recorder;

#[async_trait]
pub trait HaltFlagStore: Send + Sync {
    async fn is_halted(&self, namespace: &str) -> Result<bool>;
}

/// Halt flags backed by the shared persistent store.
#[derive(Debug, Clone)]
pub struct StoreHaltFlags {
    pool: SqlitePool,
}

impl StoreHaltFlags {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HaltFlagStore for StoreHaltFlags {
    async fn is_halted(&self, namespace: &str) -> Result<bool> {
        HaltFlag::is_halted(&self.pool, namespace).await
    }
}

#[derive(Clone)]
pub struct RunProfileDriver {
    orchestrator: Arc<CycleOrchestrator>,
    config_cache: Arc<ConfigCache>,
    halt_flags: Arc<dyn HaltFlagStore>,
    recorder: Recorder,
}

impl RunProfileDriver {
    pub fn new(
        orchestrator: Arc<CycleOrchestrator>,
        config_cache: Arc<ConfigCache>,
        halt_flags: Arc<dyn HaltFlagStore>,
        recorder: Recorder,
    ) -> Self {
        Self {
            orchestrator,
            config_cache,
            halt_flags,
            recorder,
        }
    }

    /// Run every enabled run-profile once. Per-profile failures are logged
    /// and the iteration continues.
    pub async fn run_all_enabled_once(&self) {
        let snapshot = self.config_cache.current();

        for profile in snapshot.config.enabled_run_profiles() {
            if let Some(namespace) = profile.namespace.as_deref() {
                match self.halt_flags.is_halted(namespace).await {
                    Ok(true) => {
                        info!(namespace, run_profile_id = %profile.run_profile_id, "Namespace halted; skipping run profile");
                        self.recorder
                            .warn(
                                RecordScope::Governance,
                                "Namespace halted; skipping run profile",
                                Some(&profile.run_profile_id),
                                None,
                                Some(json!({ "namespace": namespace })),
                            )
                            .await;
                        continue;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        error!(namespace, error = %err, "Halt flag lookup failed; skipping run profile");
                        continue;
                    }
                }
            }

            let context = CycleContext {
                profile_id: profile.profile_id.clone(),
                run_profile_id: Some(profile.run_profile_id.clone()),
                instruction_id: profile.instruction_id.clone(),
                namespace: profile.namespace.clone(),
            };

            if let Err(err) = self
                .orchestrator
                .run_cycle(CycleTrigger::Cron, Some(context))
                .await
            {
                error!(run_profile_id = %profile.run_profile_id, error = %err, "Run profile execution failed");
            }
        }
    }
}
