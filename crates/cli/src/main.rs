//! Inspectus CLI - Main Entry Point
//!
//! Runs visual regression scenarios and inspects material stores.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod config;
mod output;

use commands::run::{self, RunOutcome};
use commands::store;

/// Inspectus - visual regression for web pages
#[derive(Parser)]
#[command(name = "inspectus")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Material store directory (overrides the scenario's)
    #[arg(long, env = "INSPECTUS_STORE", global = true)]
    store: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a scenario
    Run(run::RunArgs),

    /// List jobs in the store
    Jobs,

    /// List runs of a job
    Runs {
        /// Job name
        job: String,
    },

    /// List materials of one run
    Materials {
        /// Job name
        job: String,

        /// Run timestamp (yyyyMMdd_HHmmss)
        timestamp: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match dispatch(cli).await {
        Ok(RunOutcome::Clean) => ExitCode::SUCCESS,
        Ok(RunOutcome::Differences) => ExitCode::from(1),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(2)
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<RunOutcome> {
    let store_dir = cli.store.clone().unwrap_or_else(|| PathBuf::from("store"));

    match cli.command {
        Commands::Run(args) => return run::execute(args, cli.store, cli.format).await,
        Commands::Jobs => store::jobs(&store_dir, cli.format).await?,
        Commands::Runs { job } => store::runs(&store_dir, &job, cli.format).await?,
        Commands::Materials { job, timestamp } => {
            store::materials(&store_dir, &job, &timestamp, cli.format).await?
        }
        Commands::Version => {
            println!("Inspectus CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Engine: inspectus-common v{}", inspectus_common::VERSION);
        }
    }

    Ok(RunOutcome::Clean)
}
