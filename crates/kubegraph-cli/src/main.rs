//! Kubegraph CLI - Command-line interface for Kubegraph
//!
//! Builds the relationship graph of a set of cluster objects and keeps it
//! up to date as they change.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;

use config::{Overrides, Settings};

#[derive(Parser)]
#[command(name = "kubegraph")]
#[command(author = "Kubegraph Contributors")]
#[command(version)]
#[command(about = "Incremental relationship graph of cluster resources", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a manifest directory and emit graph snapshots until Ctrl+C
    Run {
        /// Manifest directory (one subdirectory per kind, e.g. pods/)
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Snapshot file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seconds between snapshots
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Build the graph once, write a snapshot and exit
    Snapshot {
        /// Manifest directory
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Snapshot file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decode every manifest and report the ones that fail
    Check {
        /// Manifest directory
        #[arg(short, long)]
        source: Option<PathBuf>,
    },
}

impl Commands {
    fn overrides(&self) -> Overrides {
        match self {
            Commands::Run {
                source,
                output,
                interval,
            } => Overrides {
                source_dir: source.clone(),
                output: output.clone(),
                interval_secs: *interval,
            },
            Commands::Snapshot { source, output } => Overrides {
                source_dir: source.clone(),
                output: output.clone(),
                interval_secs: None,
            },
            Commands::Check { source } => Overrides {
                source_dir: source.clone(),
                ..Default::default()
            },
        }
    }
}

async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(cli.config.as_deref(), cli.command.overrides())?;

    match cli.command {
        Commands::Run { .. } => commands::run(&settings).await,
        Commands::Snapshot { .. } => commands::snapshot(&settings).await,
        Commands::Check { .. } => commands::check(&settings),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    if let Err(e) = dispatch(cli).await {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
