//! ABOUTME: Argument parsing for the newsflow operator CLI
//! ABOUTME: Subcommands mirror the binaries a deployment runs plus operator inspection commands

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "newsflow")]
#[command(version)]
#[command(about = "Operator CLI for the newsflow workflow-orchestration services")]
pub struct Cli {
    /// Path to a TOML config file, overlaid on compiled defaults before
    /// environment variables (equivalent to setting `CONFIG_FILE`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format for commands that print structured data.
    #[arg(long, value_enum, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a service in-process (orchestrator or one worker) until SIGINT.
    Run {
        #[command(subcommand)]
        service: ServiceCommand,
    },
    /// Validate a configuration file (or the environment-resolved config)
    /// without starting any service.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
    /// Inspect a workflow record in the configured workflow store.
    Workflow {
        #[command(subcommand)]
        action: WorkflowCommand,
    },
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ServiceCommand {
    /// The orchestrator: state machine, HTTP surface, janitor sweep.
    Orchestrator,
    /// The extraction worker.
    Extraction,
    /// The transformation worker.
    Transformation,
    /// The verification worker.
    Verification,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Load and validate configuration, printing it on success.
    Validate,
    /// Print the fully resolved configuration without validating.
    Show,
}

#[derive(Debug, Subcommand)]
pub enum WorkflowCommand {
    /// Print one workflow record by correlation id.
    Show {
        correlation_id: uuid::Uuid,
    },
    /// List workflows the janitor would consider stuck (not updated in
    /// `stale_seconds`).
    Stuck {
        #[arg(long, default_value_t = 120)]
        stale_seconds: i64,
    },
}
