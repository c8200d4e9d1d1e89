//! ABOUTME: Extraction worker binary: consumes tasks.extraction, wraps a direct-invocation HTTP route
//! ABOUTME: Production collaborators call the source service and the doc store over HTTP

use newsflow_bus::{topology, LapinBus};
use newsflow_config::NewsflowConfig;
use newsflow_worker::{direct_invocation_router, WorkerLoop};
use newsflow_workers::{ExtractionHandler, HttpDocStore, HttpScraper};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = NewsflowConfig::load()?;
    info!(concurrency = config.concurrency, "starting newsflow extraction worker");

    let client = reqwest::Client::new();
    let scraper = Arc::new(HttpScraper::new(client.clone(), config.doc_store_url.clone()));
    let doc_store = Arc::new(HttpDocStore::new(client, config.doc_store_url.clone()));
    let handler = ExtractionHandler::new(scraper, doc_store);

    let bus = Arc::new(LapinBus::connect(&config.bus_url, &config.bus_exchange).await?);
    let worker_loop = WorkerLoop::new(bus, handler.clone(), topology::EXTRACTION.queue, config.concurrency);
    let handler = Arc::new(handler);

    let shutdown = CancellationToken::new();
    let loop_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker_loop.run(shutdown).await }
    });

    let app = direct_invocation_router("/extraction/run", handler);
    let listener = tokio::net::TcpListener::bind(&config.http_bind_addr).await?;
    let shutdown_signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_signal.cancel();
        })
        .await?;

    loop_task.await??;
    Ok(())
}
