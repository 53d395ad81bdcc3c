//! # Schedulers
//!
//! Time-based triggers. Each scheduler is a fire-and-forget tokio task on
//! a fixed interval; a disabled interval means the scheduler never starts.
//! Cycle errors are logged, never propagated.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::models::CycleTrigger;
use crate::orchestration::orchestrator::CycleOrchestrator;
use crate::orchestration::run_profiles::RunProfileDriver;

/// Start the plain cycle scheduler, if an interval is configured.
pub fn start_cycle_scheduler(
    orchestrator: Arc<CycleOrchestrator>,
    interval_secs: Option<u64>,
) -> Option<JoinHandle<()>> {
    let Some(secs) = interval_secs else {
        warn!("No cycle interval configured; scheduler not started");
        return None;
    };

    info!(interval_secs = secs, "Starting cycle scheduler");
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(secs));
        // The first tick fires immediately; skip it so boot is quiet.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(err) = orchestrator.run_cycle(CycleTrigger::Cron, None).await {
                error!(error = %err, "Scheduled cycle failed");
            }
        }
    }))
}

/// Start the run-profile scheduler, if an interval is configured.
pub fn start_run_profile_scheduler(
    driver: RunProfileDriver,
    interval_secs: Option<u64>,
) -> Option<JoinHandle<()>> {
    let Some(secs) = interval_secs else {
        return None;
    };

    info!(interval_secs = secs, "Starting run profile scheduler");
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(secs));
        interval.tick().await;
        loop {
            interval.tick().await;
            driver.run_all_enabled_once().await;
        }
    }))
}
