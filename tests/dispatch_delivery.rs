//! Delivery semantics at the queue level: retry accounting across passes,
//! the dead-letter ceiling, terminal rejections and enqueue idempotency.

mod common;

use common::{endpoint_config, seed_delivery_chain, Delivery, MockTransport};

use std::sync::Arc;

use orbit_core::database;
use orbit_core::events::TelemetryPublisher;
use orbit_core::models::{
    CycleContext, DeadLetterDispatch, DispatchJob, DispatchJobStatus, NewDispatchJob,
    NormalizationBatch, NormalizationItem, Transformation,
};
use orbit_core::orchestration::{DispatchQueue, Recorder};
use orbit_core::{OrbitConfig, DEFAULT_ENDPOINT_KEY};

struct QueueFixture {
    pool: sqlx::SqlitePool,
    queue: DispatchQueue,
    transport: Arc<MockTransport>,
    cycle_id: String,
    initiation_id: String,
    item_id: String,
}

async fn queue_fixture(script: Vec<Delivery>) -> QueueFixture {
    let pool = database::connect("sqlite::memory:").await.expect("connect");
    let transport = MockTransport::with_script(script);
    let queue = DispatchQueue::new(
        pool.clone(),
        Recorder::new(pool.clone()),
        TelemetryPublisher::default(),
        transport.clone(),
    );
    let chain = seed_delivery_chain(&pool, "dispatch-hash").await;

    QueueFixture {
        pool,
        queue,
        transport,
        cycle_id: chain.cycle_id,
        initiation_id: chain.initiation_id,
        item_id: chain.item_id,
    }
}

async fn job_for_item(fixture: &QueueFixture) -> DispatchJob {
    DispatchJob::find_by_item_and_key(&fixture.pool, &fixture.item_id, DEFAULT_ENDPOINT_KEY)
        .await
        .expect("job lookup")
        .expect("job exists")
}

async fn run_pass(fixture: &QueueFixture, config: &OrbitConfig) {
    fixture
        .queue
        .process_dispatch_queue(&fixture.cycle_id, &CycleContext::default(), config)
        .await
        .expect("process pass");
}

#[tokio::test]
async fn transport_errors_dead_letter_after_exhausting_budget() {
    let fixture = queue_fixture(vec![
        Delivery::Error("connection refused"),
        Delivery::Error("connection refused"),
        Delivery::Error("connection refused"),
    ])
    .await;
    let config = endpoint_config();

    fixture
        .queue
        .enqueue_dispatch_jobs(&fixture.cycle_id, &[fixture.item_id.clone()], DEFAULT_ENDPOINT_KEY, &config)
        .await
        .expect("enqueue");

    // Two failed passes leave the job pending with a bumped counter.
    run_pass(&fixture, &config).await;
    let job = job_for_item(&fixture).await;
    assert_eq!(job.status, DispatchJobStatus::Pending);
    assert_eq!(job.attempt, 1);

    run_pass(&fixture, &config).await;
    let job = job_for_item(&fixture).await;
    assert_eq!(job.status, DispatchJobStatus::Pending);
    assert_eq!(job.attempt, 2);

    // The third failure hits the ceiling: terminal plus one dead letter.
    run_pass(&fixture, &config).await;
    let job = job_for_item(&fixture).await;
    assert_eq!(job.status, DispatchJobStatus::Failed);
    assert_eq!(job.attempt, 3);
    assert_eq!(job.last_error.as_deref(), Some("connection refused"));

    assert_eq!(DeadLetterDispatch::count(&fixture.pool).await.expect("count"), 1);
    let letters = DeadLetterDispatch::find_for_job(&fixture.pool, &job.id)
        .await
        .expect("letters");
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].endpoint_key, DEFAULT_ENDPOINT_KEY);

    // A failed job is out of the queue: no further delivery, no second
    // dead letter.
    run_pass(&fixture, &config).await;
    assert_eq!(fixture.transport.request_count(), 3);
    assert_eq!(DeadLetterDispatch::count(&fixture.pool).await.expect("count"), 1);
}

#[tokio::test]
async fn transient_failure_then_success_delivers_without_dead_letter() {
    let fixture = queue_fixture(vec![
        Delivery::Error("timed out"),
        Delivery::Status(200),
    ])
    .await;
    let config = endpoint_config();

    fixture
        .queue
        .enqueue_dispatch_jobs(&fixture.cycle_id, &[fixture.item_id.clone()], DEFAULT_ENDPOINT_KEY, &config)
        .await
        .expect("enqueue");

    run_pass(&fixture, &config).await;
    run_pass(&fixture, &config).await;

    let job = job_for_item(&fixture).await;
    assert_eq!(job.status, DispatchJobStatus::Delivered);
    assert_eq!(job.attempt, 1);
    let receipt = job.receipt_json.expect("receipt recorded");
    assert_eq!(receipt.0["ok"], serde_json::json!(true));
    assert_eq!(receipt.0["status"], serde_json::json!(200));

    assert_eq!(DeadLetterDispatch::count(&fixture.pool).await.expect("count"), 0);
}

#[tokio::test]
async fn repeated_server_errors_dead_letter_like_transport_failures() {
    let fixture = queue_fixture(vec![
        Delivery::Status(500),
        Delivery::Status(500),
        Delivery::Status(500),
    ])
    .await;
    let config = endpoint_config();

    fixture
        .queue
        .enqueue_dispatch_jobs(&fixture.cycle_id, &[fixture.item_id.clone()], DEFAULT_ENDPOINT_KEY, &config)
        .await
        .expect("enqueue");

    run_pass(&fixture, &config).await;
    run_pass(&fixture, &config).await;
    run_pass(&fixture, &config).await;

    let job = job_for_item(&fixture).await;
    assert_eq!(job.status, DispatchJobStatus::Failed);
    assert_eq!(job.attempt, 3);
    assert_eq!(job.last_error.as_deref(), Some("HTTP 500"));
    assert_eq!(DeadLetterDispatch::count(&fixture.pool).await.expect("count"), 1);
}

#[tokio::test]
async fn client_rejection_is_terminal_without_retry() {
    let fixture = queue_fixture(vec![Delivery::Status(404)]).await;
    let config = endpoint_config();

    fixture
        .queue
        .enqueue_dispatch_jobs(&fixture.cycle_id, &[fixture.item_id.clone()], DEFAULT_ENDPOINT_KEY, &config)
        .await
        .expect("enqueue");

    run_pass(&fixture, &config).await;

    let job = job_for_item(&fixture).await;
    assert_eq!(job.status, DispatchJobStatus::Failed);
    assert_eq!(job.attempt, 0);
    assert_eq!(job.last_error.as_deref(), Some("HTTP 404"));
    let receipt = job.receipt_json.expect("receipt recorded");
    assert_eq!(receipt.0["status"], serde_json::json!(404));

    // No retry, no dead letter.
    run_pass(&fixture, &config).await;
    assert_eq!(fixture.transport.request_count(), 1);
    assert_eq!(DeadLetterDispatch::count(&fixture.pool).await.expect("count"), 0);
}

#[tokio::test]
async fn missing_endpoint_configuration_fails_without_delivery() {
    let fixture = queue_fixture(Vec::new()).await;
    let config = OrbitConfig::default(); // no endpoints configured

    fixture
        .queue
        .enqueue_dispatch_jobs(&fixture.cycle_id, &[fixture.item_id.clone()], DEFAULT_ENDPOINT_KEY, &config)
        .await
        .expect("enqueue");

    run_pass(&fixture, &config).await;

    let job = job_for_item(&fixture).await;
    assert_eq!(job.status, DispatchJobStatus::Failed);
    assert_eq!(job.last_error.as_deref(), Some("No endpoint configuration found"));
    assert_eq!(fixture.transport.request_count(), 0);
}

#[tokio::test]
async fn store_fault_on_one_job_does_not_halt_the_pass() {
    let fixture = queue_fixture(Vec::new()).await;
    let config = endpoint_config();

    // A second deliverable item in the same cycle, queued behind the first.
    let transformation =
        Transformation::create_pending(&fixture.pool, &fixture.initiation_id, 2, 1)
            .await
            .expect("transformation");
    Transformation::mark_success(&fixture.pool, &transformation.id)
        .await
        .expect("mark success");
    let batch = NormalizationBatch::create_pending(&fixture.pool)
        .await
        .expect("batch");
    let second_item = NormalizationItem::create(&fixture.pool, &batch.id, Some(&transformation.id))
        .await
        .expect("item");

    fixture
        .queue
        .enqueue_dispatch_jobs(
            &fixture.cycle_id,
            &[fixture.item_id.clone(), second_item.id.clone()],
            DEFAULT_ENDPOINT_KEY,
            &config,
        )
        .await
        .expect("enqueue");

    // Fault the store for the first job only: its delivering transition
    // aborts at the database.
    let poisoned = job_for_item(&fixture).await;
    sqlx::query(&format!(
        "CREATE TRIGGER fail_first_job_update BEFORE UPDATE ON dispatch_jobs
         WHEN NEW.id = '{}' AND NEW.status = 'delivering'
         BEGIN SELECT RAISE(ABORT, 'store unavailable'); END",
        poisoned.id
    ))
    .execute(&fixture.pool)
    .await
    .expect("trigger");

    // The pass absorbs the first job's store error and still delivers the
    // second job. run_pass asserts the pass itself returns Ok.
    run_pass(&fixture, &config).await;

    let poisoned = job_for_item(&fixture).await;
    assert_eq!(poisoned.status, DispatchJobStatus::Pending);

    let second_job =
        DispatchJob::find_by_item_and_key(&fixture.pool, &second_item.id, DEFAULT_ENDPOINT_KEY)
            .await
            .expect("job lookup")
            .expect("job exists");
    assert_eq!(second_job.status, DispatchJobStatus::Delivered);
    assert_eq!(fixture.transport.request_count(), 1);

    let (journaled,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM execution_records WHERE message = 'Dispatch job processing failed'",
    )
    .fetch_one(&fixture.pool)
    .await
    .expect("journal count");
    assert_eq!(journaled, 1);
}

#[tokio::test]
async fn enqueue_is_idempotent_per_item_and_endpoint() {
    let fixture = queue_fixture(Vec::new()).await;
    let config = endpoint_config();
    let items = [fixture.item_id.clone()];

    for _ in 0..2 {
        fixture
            .queue
            .enqueue_dispatch_jobs(&fixture.cycle_id, &items, DEFAULT_ENDPOINT_KEY, &config)
            .await
            .expect("enqueue");
    }

    let (jobs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dispatch_jobs")
        .fetch_one(&fixture.pool)
        .await
        .expect("job count");
    assert_eq!(jobs, 1);
}

#[tokio::test]
async fn store_rejects_duplicate_job_for_item_and_endpoint() {
    let fixture = queue_fixture(Vec::new()).await;

    let new_job = |item: String| NewDispatchJob {
        endpoint_key: DEFAULT_ENDPOINT_KEY.to_string(),
        normalization_item_id: item,
        endpoint_url: Some("http://127.0.0.1:9/receive".to_string()),
        endpoint_method: orbit_core::DispatchMethod::Post,
        token_snapshot: None,
    };

    DispatchJob::create(&fixture.pool, new_job(fixture.item_id.clone()))
        .await
        .expect("first insert");
    let err = DispatchJob::create(&fixture.pool, new_job(fixture.item_id.clone()))
        .await
        .expect_err("duplicate insert must fail");

    assert!(err.is_unique_violation());
}

#[tokio::test]
async fn endpoint_snapshot_survives_configuration_change() {
    let fixture = queue_fixture(Vec::new()).await;
    let config = endpoint_config();

    fixture
        .queue
        .enqueue_dispatch_jobs(&fixture.cycle_id, &[fixture.item_id.clone()], DEFAULT_ENDPOINT_KEY, &config)
        .await
        .expect("enqueue");

    // Process with a config that no longer knows the endpoint; the job's
    // snapshot still carries the original URL and token.
    run_pass(&fixture, &OrbitConfig::default()).await;

    let job = job_for_item(&fixture).await;
    assert_eq!(job.status, DispatchJobStatus::Delivered);

    let requests = fixture.transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "http://127.0.0.1:9/receive");
    assert_eq!(requests[0].bearer_token.as_deref(), Some("test-token"));
}
