//! KMP workflow engine
//!
//! Main entry point for the `kmp` CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;

mod commands;

use commands::{approvals, definition, instance, lifecycle, registry, sweep, vote, worker};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// KMP workflow engine - durable approval workflows
#[derive(Parser)]
#[command(name = "kmp")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file applied on top of the discovered layers
    #[arg(long, global = true, env = "KMP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database path (overrides [database] path)
    #[arg(long, global = true, env = "KMP_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage workflow definitions and versions
    Definition(definition::DefinitionArgs),

    /// Start an instance of a published workflow
    Start(lifecycle::StartArgs),

    /// Deliver a resume signal to a waiting instance
    Resume(lifecycle::ResumeArgs),

    /// Cast a vote on a pending approval
    Vote(vote::VoteArgs),

    /// Cancel a running or waiting instance
    Cancel(lifecycle::CancelArgs),

    /// Start a fresh instance from an existing one's version and payload
    Restart(lifecycle::RestartArgs),

    /// Inspect instances
    Instance(instance::InstanceArgs),

    /// Inspect approvals
    Approvals(approvals::ApprovalsArgs),

    /// Run one deadline sweep pass
    Sweep(sweep::SweepArgs),

    /// Run the sweep scheduler and resume worker until Ctrl-C
    Worker(worker::WorkerArgs),

    /// List registered actions and conditions
    Registry(registry::RegistryArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = kmp_config::load_config_with_options(None, None, cli.config.as_deref())?;
    let logging = loaded.config.logging();

    // Initialize tracing: console (human-readable, stderr) + rolling file
    let filter = if cli.verbose {
        "kmp=debug,kmp_workflow=debug,kmp_config=debug,info"
    } else {
        "kmp=info,kmp_workflow=info,warn"
    };

    let log_dir = logging
        .directory
        .clone()
        .or_else(|| kmp_config::xdg_config_dir().map(|d| d.join("logs")))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "kmp.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    let file_filter = || tracing_subscriber::EnvFilter::new(&logging.file_filter);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(logging.json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking.clone())
                .with_filter(file_filter())
        }))
        .with((!logging.json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking.clone())
                .with_filter(file_filter())
        }))
        .init();

    for warning in &loaded.warnings {
        warn!("{}", warning);
    }

    let ctx = commands::Context {
        config: loaded.config,
        db_path: cli.db,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Definition(args) => definition::run(args, &ctx).await,
        Commands::Start(args) => lifecycle::start(args, &ctx).await,
        Commands::Resume(args) => lifecycle::resume(args, &ctx).await,
        Commands::Vote(args) => vote::run(args, &ctx).await,
        Commands::Cancel(args) => lifecycle::cancel(args, &ctx).await,
        Commands::Restart(args) => lifecycle::restart(args, &ctx).await,
        Commands::Instance(args) => instance::run(args, &ctx).await,
        Commands::Approvals(args) => approvals::run(args, &ctx).await,
        Commands::Sweep(args) => sweep::run(args, &ctx).await,
        Commands::Worker(args) => worker::run(args, &ctx).await,
        Commands::Registry(args) => registry::run(args, &ctx).await,
    }
}
