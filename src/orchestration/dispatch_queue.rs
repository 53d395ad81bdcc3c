//! # Dispatch Queue
//!
//! Idempotent enqueue of normalized units plus delivery processing with
//! bounded retry and dead-lettering.
//!
//! Enqueue snapshots the endpoint's URL, method and token into the job
//! row, deliberately decoupling in-flight jobs from live configuration.
//! Processing scopes jobs to one cycle (item → transformation → initiation
//! → cycle run) and walks them FIFO; one job's failure never halts the
//! rest of the pass.

use std::sync::Arc;

use serde_json::json;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::{DispatchMethod, OrbitConfig};
use crate::error::Result;
use crate::events::TelemetryPublisher;
use crate::models::{
    CycleContext, DeadLetterDispatch, DispatchJob, DispatchJobStatus, NewDispatchJob,
    NormalizationItem, RecordScope,
};
use crate::orchestration::recorder::Recorder;
use crate::orchestration::transport::{DeliveryRequest, DeliveryTransport};

#[derive(Clone)]
pub struct DispatchQueue {
    pool: SqlitePool,
    recorder: Recorder,
    telemetry: TelemetryPublisher,
    transport: Arc<dyn DeliveryTransport>,
}

impl DispatchQueue {
    pub fn new(
        pool: SqlitePool,
        recorder: Recorder,
        telemetry: TelemetryPublisher,
        transport: Arc<dyn DeliveryTransport>,
    ) -> Self {
        Self {
            pool,
            recorder,
            telemetry,
            transport,
        }
    }

    /// Enqueue one job per normalization item for the endpoint key.
    ///
    /// Idempotent: an existing job for (item, key) is skipped and
    /// journaled, never duplicated.
    pub async fn enqueue_dispatch_jobs(
        &self,
        cycle_run_id: &str,
        normalization_item_ids: &[String],
        endpoint_key: &str,
        config: &OrbitConfig,
    ) -> Result<()> {
        for item_id in normalization_item_ids {
            if let Some(existing) =
                DispatchJob::find_by_item_and_key(&self.pool, item_id, endpoint_key).await?
            {
                self.recorder
                    .info(
                        RecordScope::Dispatch,
                        "Skipped enqueue of duplicate dispatch job",
                        Some(&existing.id),
                        Some(cycle_run_id),
                        Some(json!({
                            "normalization_item_id": item_id,
                            "endpoint_key": endpoint_key,
                        })),
                    )
                    .await;
                continue;
            }

            let endpoint = config.endpoint(endpoint_key);
            let job = DispatchJob::create(
                &self.pool,
                NewDispatchJob {
                    endpoint_key: endpoint_key.to_string(),
                    normalization_item_id: item_id.clone(),
                    endpoint_url: endpoint.map(|e| e.url.clone()),
                    endpoint_method: endpoint.map(|e| e.method).unwrap_or_default(),
                    token_snapshot: endpoint.and_then(|e| e.token.clone()),
                },
            )
            .await?;

            self.recorder
                .info(
                    RecordScope::Dispatch,
                    "Enqueued dispatch job",
                    Some(&job.id),
                    Some(cycle_run_id),
                    None,
                )
                .await;
        }

        Ok(())
    }

    /// Deliver this cycle's pending jobs, FIFO by creation time.
    pub async fn process_dispatch_queue(
        &self,
        cycle_run_id: &str,
        context: &CycleContext,
        config: &OrbitConfig,
    ) -> Result<()> {
        let max_attempts = i64::from(config.max_dispatch_retries);

        let item_ids = NormalizationItem::ids_for_cycle(&self.pool, cycle_run_id).await?;
        if item_ids.is_empty() {
            self.recorder
                .warn(
                    RecordScope::Dispatch,
                    "No normalization items found for cycle; skipping dispatch processing",
                    None,
                    Some(cycle_run_id),
                    None,
                )
                .await;
            return Ok(());
        }

        let pending = DispatchJob::pending_for_items(&self.pool, &item_ids).await?;

        for job in pending {
            // A store error while handling one job must not take the rest
            // of the pass down with it.
            if let Err(error) = self
                .process_job(cycle_run_id, context, config, &job, max_attempts)
                .await
            {
                warn!(job_id = %job.id, %error, "Dispatch job processing failed; continuing");
                self.recorder
                    .error(
                        RecordScope::Dispatch,
                        "Dispatch job processing failed",
                        Some(&job.id),
                        Some(cycle_run_id),
                        Some(json!({ "error": error.to_string() })),
                    )
                    .await;
            }
        }

        Ok(())
    }

    async fn process_job(
        &self,
        cycle_run_id: &str,
        context: &CycleContext,
        config: &OrbitConfig,
        job: &DispatchJob,
        max_attempts: i64,
    ) -> Result<()> {
        // Snapshot first, live config as fallback; in-flight jobs keep the
        // endpoint they were enqueued with.
        let live = config.endpoint(&job.endpoint_key);
        let url = job
            .endpoint_url
            .clone()
            .or_else(|| live.map(|e| e.url.clone()));
        let method = job
            .endpoint_method
            .parse::<DispatchMethod>()
            .ok()
            .or(live.map(|e| e.method))
            .unwrap_or_default();
        let token = job
            .token_snapshot
            .clone()
            .or_else(|| live.and_then(|e| e.token.clone()));

        let Some(url) = url else {
            DispatchJob::mark_failed(
                &self.pool,
                &job.id,
                job.attempt,
                "No endpoint configuration found",
            )
            .await?;
            self.recorder
                .error(
                    RecordScope::Dispatch,
                    "Dispatch endpoint configuration missing",
                    Some(&job.id),
                    Some(cycle_run_id),
                    Some(json!({ "endpoint_key": job.endpoint_key })),
                )
                .await;
            return Ok(());
        };

        DispatchJob::mark_delivering(&self.pool, &job.id).await?;

        let request = DeliveryRequest {
            url,
            method,
            bearer_token: token,
            body: format!("opaque-payload-for-{}", job.id).into_bytes(),
        };

        // Delivery failure taxonomy: a 2xx response is delivered; a 5xx or
        // a transport-level error is a failed attempt eligible for retry
        // and, at the ceiling, dead-lettering; any other response (3xx,
        // 4xx) is terminal without retry, like missing configuration.
        match self.transport.deliver(request).await {
            Ok(response) if response.is_success() => {
                let receipt = json!({ "status": response.status, "ok": true });
                DispatchJob::record_response(
                    &self.pool,
                    &job.id,
                    DispatchJobStatus::Delivered,
                    receipt.clone(),
                    None,
                )
                .await?;

                info!(job_id = %job.id, status = response.status, "Dispatch delivered");
                self.recorder
                    .info(
                        RecordScope::Dispatch,
                        "Dispatch job processed",
                        Some(&job.id),
                        Some(cycle_run_id),
                        Some(receipt),
                    )
                    .await;

                self.telemetry.publish(
                    "delivery_confirmed",
                    json!({
                        "profile_id": context.profile_id,
                        "run_id": context.run_profile_id,
                        "namespace": context.namespace,
                        "cycle_run_id": cycle_run_id,
                        "dispatch_job_id": job.id,
                        "status": response.status,
                    }),
                );
            }
            Ok(response) if response.status < 500 => {
                let receipt = json!({ "status": response.status, "ok": false });
                let last_error = format!("HTTP {}", response.status);
                DispatchJob::record_response(
                    &self.pool,
                    &job.id,
                    DispatchJobStatus::Failed,
                    receipt.clone(),
                    Some(&last_error),
                )
                .await?;

                self.recorder
                    .error(
                        RecordScope::Dispatch,
                        "Dispatch job rejected by endpoint",
                        Some(&job.id),
                        Some(cycle_run_id),
                        Some(receipt),
                    )
                    .await;
            }
            outcome => {
                let last_error = match outcome {
                    Ok(response) => format!("HTTP {}", response.status),
                    Err(error) => error.0,
                };
                self.record_failed_attempt(cycle_run_id, job, max_attempts, &last_error)
                    .await?;
            }
        }

        Ok(())
    }

    /// Bump the attempt counter; dead-letter exactly once when the counter
    /// reaches the ceiling, otherwise leave the job pending for a future
    /// pass.
    async fn record_failed_attempt(
        &self,
        cycle_run_id: &str,
        job: &DispatchJob,
        max_attempts: i64,
        last_error: &str,
    ) -> Result<()> {
        let next_attempt = job.attempt + 1;
        let exhausted = next_attempt >= max_attempts;

        if exhausted {
            DispatchJob::mark_failed(&self.pool, &job.id, next_attempt, last_error).await?;
            DeadLetterDispatch::create(
                &self.pool,
                &job.id,
                &job.normalization_item_id,
                &job.endpoint_key,
                last_error,
                json!({ "cycle_run_id": cycle_run_id }),
            )
            .await?;
        } else {
            DispatchJob::record_transport_failure(&self.pool, &job.id, next_attempt, last_error)
                .await?;
        }

        warn!(job_id = %job.id, attempt = next_attempt, exhausted, "Dispatch delivery failed");
        self.recorder
            .error(
                RecordScope::Dispatch,
                if exhausted {
                    "Dispatch job moved to dead-letter queue"
                } else {
                    "Dispatch job failed"
                },
                Some(&job.id),
                Some(cycle_run_id),
                Some(json!({
                    "error": last_error,
                    "attempt": next_attempt,
                    "max_attempts": max_attempts,
                    "dead_lettered": exhausted,
                })),
            )
            .await;

        Ok(())
    }
}
