//! ABOUTME: Operator CLI entry point: dispatches `run`, `config`, and `workflow` subcommands

mod cli;

use clap::Parser;
use cli::{Cli, Commands, ConfigCommand, OutputFormat, ServiceCommand, WorkflowCommand};
use newsflow_bus::{topology, LapinBus};
use newsflow_config::NewsflowConfig;
use newsflow_orchestrator::{router, AppState, Engine, Janitor};
use newsflow_store::{SledWorkflowStore, WorkflowStore};
use newsflow_worker::{direct_invocation_router, WorkerLoop};
use newsflow_workers::{
    ExtractionHandler, HttpDocStore, HttpLlmClient, HttpScraper, HttpVectorIndex, HttpWebSearch,
    TransformationHandler, VerificationHandler,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn load_config(cli: &Cli) -> anyhow::Result<NewsflowConfig> {
    if let Some(path) = &cli.config {
        std::env::set_var("CONFIG_FILE", path);
    }
    Ok(NewsflowConfig::load()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { service } => run_service(&cli, *service).await,
        Commands::Config { action } => run_config(&cli, action),
        Commands::Workflow { action } => run_workflow(&cli, action).await,
    }
}

async fn run_service(cli: &Cli, service: ServiceCommand) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let shutdown = CancellationToken::new();

    match service {
        ServiceCommand::Orchestrator => {
            info!(bind = %config.http_bind_addr, "starting newsflow orchestrator");
            let bus = Arc::new(LapinBus::connect(&config.bus_url, &config.bus_exchange).await?);
            let store = Arc::new(SledWorkflowStore::open(&config.workflow_store_url)?);
            let engine = Arc::new(Engine::new(store.clone(), bus.clone(), config.max_attempts));

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

            let state = AppState { engine, store, bus };
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
        }
        ServiceCommand::Extraction => {
            info!(concurrency = config.concurrency, "starting newsflow extraction worker");
            let client = reqwest::Client::new();
            let scraper = Arc::new(HttpScraper::new(client.clone(), config.doc_store_url.clone()));
            let doc_store = Arc::new(HttpDocStore::new(client, config.doc_store_url.clone()));
            let handler = Arc::new(ExtractionHandler::new(scraper, doc_store));

            let bus = Arc::new(LapinBus::connect(&config.bus_url, &config.bus_exchange).await?);
            let worker_loop = WorkerLoop::new(bus, (*handler).clone(), topology::EXTRACTION.queue, config.concurrency);
            run_direct_and_loop(&config, "/extraction/run", handler, worker_loop, shutdown).await?;
        }
        ServiceCommand::Transformation => {
            info!(concurrency = config.concurrency, "starting newsflow transformation worker");
            let client = reqwest::Client::new();
            let doc_store = Arc::new(HttpDocStore::new(client.clone(), config.doc_store_url.clone()));
            let llm = Arc::new(HttpLlmClient::new(client.clone(), config.llm_url.clone(), config.llm_model.clone()));
            let vector_index = Arc::new(HttpVectorIndex::new(client, config.vector_store_url.clone()));
            let handler = Arc::new(TransformationHandler::new(doc_store, llm, vector_index));

            let bus = Arc::new(LapinBus::connect(&config.bus_url, &config.bus_exchange).await?);
            let worker_loop = WorkerLoop::new(bus, (*handler).clone(), topology::TRANSFORMATION.queue, config.concurrency);
            run_direct_and_loop(&config, "/transformation/run", handler, worker_loop, shutdown).await?;
        }
        ServiceCommand::Verification => {
            info!(concurrency = config.concurrency, "starting newsflow verification worker");
            let client = reqwest::Client::new();
            let vector_index = Arc::new(HttpVectorIndex::new(client.clone(), config.vector_store_url.clone()));
            let llm = Arc::new(HttpLlmClient::new(client.clone(), config.llm_url.clone(), config.llm_model.clone()));
            let web_search = Arc::new(HttpWebSearch::new(client, config.web_search_url.clone()));
            let handler = Arc::new(VerificationHandler::new(vector_index, llm, web_search));

            let bus = Arc::new(LapinBus::connect(&config.bus_url, &config.bus_exchange).await?);
            let worker_loop = WorkerLoop::new(bus, (*handler).clone(), topology::VERIFICATION.queue, config.concurrency);
            run_direct_and_loop(&config, "/verification/claim", handler, worker_loop, shutdown).await?;
        }
    }

    Ok(())
}

/// Shared tail for every worker binary: spawn the bus-driven loop, serve the
/// direct-invocation route alongside it, and shut both down together on
/// SIGINT.
async fn run_direct_and_loop<H>(
    config: &NewsflowConfig,
    path: &str,
    handler: Arc<H>,
    worker_loop: WorkerLoop<H>,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    H: newsflow_worker::TaskHandler + 'static,
{
    let loop_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker_loop.run(shutdown).await }
    });

    let app = direct_invocation_router(path, handler);
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

fn run_config(cli: &Cli, action: &ConfigCommand) -> anyhow::Result<()> {
    match action {
        ConfigCommand::Validate => {
            let config = load_config(cli)?;
            config.validate()?;
            println!("configuration is valid");
            print_config(cli, &config);
        }
        ConfigCommand::Show => {
            let config = load_config(cli)?;
            print_config(cli, &config);
        }
    }
    Ok(())
}

fn print_config(cli: &Cli, config: &NewsflowConfig) {
    match cli.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config).expect("config serializes")),
        OutputFormat::Text => println!("{config:#?}"),
    }
}

async fn run_workflow(cli: &Cli, action: &WorkflowCommand) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let store = SledWorkflowStore::open(&config.workflow_store_url)?;

    match action {
        WorkflowCommand::Show { correlation_id } => match store.load(*correlation_id).await? {
            Some(record) => print_record(cli, &record),
            None => {
                eprintln!("workflow {correlation_id} not found");
                std::process::exit(1);
            }
        },
        WorkflowCommand::Stuck { stale_seconds } => {
            let cutoff = chrono::Utc::now() - chrono::Duration::seconds(*stale_seconds);
            let stuck = store.list_stuck(cutoff).await?;
            if stuck.is_empty() {
                println!("no stuck workflows");
            }
            for record in &stuck {
                print_record(cli, record);
            }
        }
    }
    Ok(())
}

fn print_record(cli: &Cli, record: &newsflow_core::WorkflowRecord) {
    match cli.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(record).expect("record serializes")),
        OutputFormat::Text => println!(
            "{}  type={}  status={:?}  stage={}/{}  pending_children={}",
            record.correlation_id,
            record.workflow_type,
            record.status,
            record.current_index,
            record.stages.len(),
            record.pending_children,
        ),
    }
}
