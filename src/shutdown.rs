//! # Shutdown Drain Controller
//!
//! Best-effort drain on termination: poll the active-cycle counter on a
//! fixed interval and return once it reaches zero or the timeout elapses,
//! whichever comes first. Cycles are never cancelled mid-stage.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::orchestration::ActiveCycleCounter;

#[derive(Debug, Clone)]
pub struct DrainController {
    active_cycles: ActiveCycleCounter,
    poll_interval: Duration,
    timeout: Duration,
}

impl DrainController {
    pub fn new(active_cycles: ActiveCycleCounter) -> Self {
        Self {
            active_cycles,
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timing(
        active_cycles: ActiveCycleCounter,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            active_cycles,
            poll_interval,
            timeout,
        }
    }

    /// Wait for in-flight cycles to finish. Returns `true` when the drain
    /// completed, `false` when the timeout cut it short.
    pub async fn drain(&self) -> bool {
        let deadline = Instant::now() + self.timeout;

        loop {
            let in_flight = self.active_cycles.count();
            if in_flight == 0 {
                info!("Drain complete; no cycles in flight");
                return true;
            }
            if Instant::now() >= deadline {
                warn!(in_flight, "Drain timed out with cycles still in flight");
                return false;
            }
            sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_returns_immediately_when_idle() {
        let counter = ActiveCycleCounter::new();
        let controller = DrainController::new(counter);
        assert!(controller.drain().await);
    }

    #[tokio::test]
    async fn drain_times_out_with_cycle_in_flight() {
        let counter = ActiveCycleCounter::new();
        let _guard = counter.enter();

        let controller = DrainController::with_timing(
            counter.clone(),
            Duration::from_millis(5),
            Duration::from_millis(30),
        );
        assert!(!controller.drain().await);
    }

    #[tokio::test]
    async fn drain_completes_once_cycles_finish() {
        let counter = ActiveCycleCounter::new();
        let guard = counter.enter();

        let controller = DrainController::with_timing(
            counter.clone(),
            Duration::from_millis(5),
            Duration::from_secs(5),
        );

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });

        assert!(controller.drain().await);
    }
}
