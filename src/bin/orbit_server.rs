//! Orbit server: HTTP surface, schedulers, and drain-on-shutdown around
//! the cycle engine.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use orbit_core::config::{ConfigCache, OrbitConfig};
use orbit_core::orchestration::{
    build_engine_with_policy, ActiveCycleCounter, HttpTransport, RunProfileDriver, StoreHaltFlags,
};
use orbit_core::orchestration::scheduler::{start_cycle_scheduler, start_run_profile_scheduler};
use orbit_core::shutdown::DrainController;
use orbit_core::web::{create_router, AppState};
use orbit_core::{database, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_structured_logging();

    let config = OrbitConfig::from_env().context("loading configuration")?;
    let http_port = config.http_port;
    let cycle_interval = config.cycle_interval_secs;
    let run_profile_interval = config.run_profile_interval_secs;
    let retry_policy = config.transformation_retry_policy();

    let pool = database::connect(&config.database_url)
        .await
        .context("connecting to database")?;

    let active_cycles = ActiveCycleCounter::new();
    let config_cache = Arc::new(ConfigCache::new(config, active_cycles.clone()));

    let engine = build_engine_with_policy(
        pool.clone(),
        Arc::clone(&config_cache),
        active_cycles.clone(),
        Arc::new(HttpTransport::new()),
        retry_policy,
    );

    let run_profiles = RunProfileDriver::new(
        Arc::clone(&engine.orchestrator),
        Arc::clone(&config_cache),
        Arc::new(StoreHaltFlags::new(pool.clone())),
        engine.recorder.clone(),
    );

    let _cycle_scheduler =
        start_cycle_scheduler(Arc::clone(&engine.orchestrator), cycle_interval);
    let _run_profile_scheduler =
        start_run_profile_scheduler(run_profiles.clone(), run_profile_interval);

    let state = AppState {
        pool,
        orchestrator: Arc::clone(&engine.orchestrator),
        config_cache,
        run_profiles,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", http_port))
        .await
        .context("binding HTTP listener")?;
    info!(port = http_port, "Orbit HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    // Listener is closed; wait for in-flight cycles before exiting.
    let drained = DrainController::new(active_cycles).drain().await;
    info!(drained, "Orbit server shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Termination signal received; draining");
}
