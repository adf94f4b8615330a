//! baler unified CLI.
//!
//! # Quick Start
//!
//! ```bash
//! # Train per-topic dictionaries from a sample corpus
//! baler train --samples ./samples
//!
//! # Start the collector
//! baler collect
//!
//! # Inspect the effective configuration
//! baler config
//! ```
//!
//! Exit codes: 0 on clean shutdown, 2 on configuration errors, 3 on
//! unrecoverable I/O errors during startup (e.g. cannot bind).

mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Exit code for configuration errors.
const EXIT_CONFIG: u8 = 2;
/// Exit code for unrecoverable startup I/O errors.
const EXIT_STARTUP_IO: u8 = 3;

/// baler - edge telemetry compression pipeline.
#[derive(Parser)]
#[command(name = "baler")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory holding baler.toml.
    #[arg(short = 'C', long, default_value = ".", global = true)]
    project_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the collector daemon.
    Collect {
        /// Override the bind port from configuration.
        #[arg(short, long)]
        port: Option<u16>,

        /// Write a metrics CSV snapshot to this path on shutdown.
        #[arg(long)]
        metrics_csv: Option<String>,
    },

    /// Train per-topic dictionaries from a sample corpus.
    Train {
        /// Directory tree samples_root/<topic>/*.json[l].
        #[arg(short, long)]
        samples: String,

        /// Target dictionary size in bytes.
        #[arg(long, default_value_t = 4096)]
        dict_size: usize,
    },

    /// Print the effective configuration.
    Config,

    /// Show version information.
    Version,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Collect { port, metrics_csv } => {
            commands::collect::run(&cli.project_dir, *port, metrics_csv.as_deref())
        }
        Commands::Train { samples, dict_size } => {
            commands::train::run(&cli.project_dir, samples, *dict_size)
        }
        Commands::Config => commands::config::run(&cli.project_dir),
        Commands::Version => {
            println!("baler {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Maps an error chain onto the documented exit codes.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(collector_err) = cause.downcast_ref::<baler_collector::CollectorError>() {
            return match collector_err {
                baler_collector::CollectorError::BindFailed { .. }
                | baler_collector::CollectorError::Io(_) => EXIT_STARTUP_IO,
                _ => EXIT_CONFIG,
            };
        }
        if cause.downcast_ref::<std::io::Error>().is_some() {
            return EXIT_STARTUP_IO;
        }
    }
    EXIT_CONFIG
}
