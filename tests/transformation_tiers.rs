//! Tier engine behavior that needs a real store: failure isolation across
//! tiers and input replay when resuming mid-chain.

mod common;

use common::fast_retry_policy;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;

use orbit_core::database;
use orbit_core::models::{
    CycleContext, CycleRun, CycleTrigger, Transformation, TransformationStatus,
};
use orbit_core::orchestration::transformation_engine::seed_payload;
use orbit_core::orchestration::{Recorder, TransformationEngine};

#[tokio::test]
async fn failed_tier_does_not_block_later_tiers() {
    let pool = database::connect("sqlite::memory:").await.expect("connect");
    let engine =
        TransformationEngine::with_policy(pool.clone(), Recorder::new(pool.clone()), fast_retry_policy());

    let cycle = CycleRun::create(&pool, CycleTrigger::Manual, CycleContext::default())
        .await
        .expect("cycle");

    // An initiation id large enough that the expanding tiers (base64, hex)
    // blow the size ceiling while the identity tier still fits.
    let big_id = "x".repeat(900 * 1024);
    sqlx::query(
        "INSERT INTO initiations
             (id, label, weight, metadata_json, dedupe_hash, cycle_run_id, created_at)
         VALUES (?, 'oversized', 1.0, '{}', 'oversized-hash', ?, ?)",
    )
    .bind(&big_id)
    .bind(&cycle.id)
    .bind(Utc::now())
    .execute(&pool)
    .await
    .expect("initiation row");

    let outcomes = engine
        .run_tiered_transformations(&cycle.id, &big_id, 1)
        .await
        .expect("tier run");

    // Every tier reports independently; the later tiers still ran.
    assert_eq!(outcomes.len(), 3);
    assert!(!outcomes[0].success);
    assert!(!outcomes[1].success);
    assert!(outcomes[2].success);

    let history = Transformation::find_all_for_initiation(&pool, &big_id)
        .await
        .expect("history");
    let failed_tier1 = history
        .iter()
        .filter(|t| t.tier == 1 && t.status == TransformationStatus::Failed)
        .count();
    assert_eq!(failed_tier1, 3, "tier 1 exhausted its full retry budget");

    let successes = Transformation::find_successful_for_initiation(&pool, &big_id)
        .await
        .expect("successes");
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].tier, 3);
}

#[tokio::test]
async fn resume_replays_chain_to_derive_tier_input() {
    let pool = database::connect("sqlite::memory:").await.expect("connect");
    let engine =
        TransformationEngine::with_policy(pool.clone(), Recorder::new(pool.clone()), fast_retry_policy());

    let cycle = CycleRun::create(&pool, CycleTrigger::Manual, CycleContext::default())
        .await
        .expect("cycle");
    sqlx::query(
        "INSERT INTO initiations
             (id, label, weight, metadata_json, dedupe_hash, cycle_run_id, created_at)
         VALUES ('init-replay', 'replay', 1.0, '{}', 'replay-hash', ?, ?)",
    )
    .bind(&cycle.id)
    .bind(Utc::now())
    .execute(&pool)
    .await
    .expect("initiation row");

    let outcomes = engine
        .run_tiered_transformations(&cycle.id, "init-replay", 2)
        .await
        .expect("resumed run");

    // Tier 1 is skipped entirely; tier 2 sees exactly the input it would
    // have seen on a fresh run.
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].tier, 2);
    assert_eq!(outcomes[1].tier, 3);
    assert!(outcomes.iter().all(|o| o.success));

    let tier1_output = BASE64.encode(seed_payload("init-replay"));
    let expected_tier2 = hex::encode(tier1_output.as_bytes()).into_bytes();
    assert_eq!(outcomes[0].payload.as_deref(), Some(expected_tier2.as_slice()));

    let history = Transformation::find_all_for_initiation(&pool, "init-replay")
        .await
        .expect("history");
    assert!(history.iter().all(|t| t.tier != 1));
}
