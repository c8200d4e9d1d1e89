//! ABOUTME: Verification worker binary: consumes tasks.verification, judges one claim per task
//! ABOUTME: Production collaborators call the vector index and the LM over HTTP

use newsflow_bus::{topology, LapinBus};
use newsflow_config::NewsflowConfig;
use newsflow_worker::{direct_invocation_router, WorkerLoop};
use newsflow_workers::{HttpLlmClient, HttpVectorIndex, HttpWebSearch, VerificationHandler};
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
    info!(concurrency = config.concurrency, "starting newsflow verification worker");

    let client = reqwest::Client::new();
    let vector_index = Arc::new(HttpVectorIndex::new(client.clone(), config.vector_store_url.clone()));
    let llm = Arc::new(HttpLlmClient::new(client.clone(), config.llm_url.clone(), config.llm_model.clone()));
    let web_search = Arc::new(HttpWebSearch::new(client, config.web_search_url.clone()));
    let handler = VerificationHandler::new(vector_index, llm, web_search);

    let bus = Arc::new(LapinBus::connect(&config.bus_url, &config.bus_exchange).await?);
    let worker_loop = WorkerLoop::new(bus, handler.clone(), topology::VERIFICATION.queue, config.concurrency);
    let handler = Arc::new(handler);

    let shutdown = CancellationToken::new();
    let loop_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker_loop.run(shutdown).await }
    });

    let app = direct_invocation_router("/verification/claim", handler);
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
