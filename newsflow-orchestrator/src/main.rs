//! ABOUTME: Orchestrator binary: wires config, bus, store, HTTP surface, and janitor together

use newsflow_bus::LapinBus;
use newsflow_config::NewsflowConfig;
use newsflow_orchestrator::{router, AppState, Engine, Janitor};
use newsflow_store::SledWorkflowStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = NewsflowConfig::load()?;
    info!(bind = %config.http_bind_addr, "starting newsflow orchestrator");

    let bus = Arc::new(LapinBus::connect(&config.bus_url, &config.bus_exchange).await?);
    let store = Arc::new(SledWorkflowStore::open(&config.workflow_store_url)?);
    let engine = Arc::new(Engine::new(store.clone(), bus.clone(), config.max_attempts));

    let shutdown = CancellationToken::new();

    let completion_task = tokio::spawn({
        let bus = bus.clone();
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        async move { newsflow_orchestrator::run_completion_consumer(bus, engine, shutdown).await }
    });

    let janitor = Janitor::new(
        store.clone(),
        bus.clone(),
        Duration::from_secs(config.stage_timeout_seconds * 2),
        Duration::from_secs(30),
    );
    let janitor_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { janitor.run(shutdown).await }
    });

    let state = AppState {
        engine,
        store,
        bus,
    };
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.http_bind_addr).await?;

    let shutdown_signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_signal.cancel();
        })
        .await?;

    let _ = tokio::join!(completion_task, janitor_task);
    Ok(())
}
