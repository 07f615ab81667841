//! # quarry CLI
//!
//! Command-line driver for the quarry rule engine: analyzes files through
//! the built-in pipeline, with optional watching and persistent caching.

mod commands;
mod pipeline;

use clap::{Parser, Subcommand};
use commands::BuildOptions;
use quarry_engine::{Engine, EngineConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Persist computed results to this file across runs
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Worker threads (defaults to available parallelism)
    #[arg(long)]
    jobs: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze files and directories once
    Build {
        /// Files or directories to analyze
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Emit JSON for machine consumption
        #[arg(long)]
        json: bool,

        /// Print engine counters after the run
        #[arg(long)]
        stats: bool,
    },

    /// Analyze a directory and re-analyze on changes
    Watch {
        /// Directory to watch
        dir: PathBuf,

        /// Quiet period in milliseconds before a change batch is applied
        #[arg(long, default_value_t = 100)]
        debounce_ms: u64,

        /// Emit JSON for machine consumption
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = EngineConfig::default();
    if let Some(jobs) = cli.jobs {
        config.workers = jobs;
    }
    config.cache_path = cli.cache.clone();
    let engine = Engine::with_config(pipeline::registry(), config)?;

    let outcome = match cli.command {
        Commands::Build { paths, json, stats } => {
            commands::run_build(&engine, &paths, BuildOptions { json, stats })
        }
        Commands::Watch {
            dir,
            debounce_ms,
            json,
        } => commands::watch_files(&engine, &dir, Duration::from_millis(debounce_ms), json),
    };

    if let Err(err) = engine.flush_cache() {
        tracing::warn!(%err, "failed to write persisted cache");
    }
    outcome
}
