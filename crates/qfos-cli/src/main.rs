//! QFOS CLI
//!
//! Thin driver for the query fan-out session engine.
//!
//! # Commands
//!
//! - `optimize`: sweep candidate windows over an NDJSON request file and
//!   write the recommended window's sessions plus the ranked report
//! - `bundle`: bundle at one fixed window and write the session rows
//! - `deltas`: print inter-request gap statistics and percentile-based
//!   candidate windows

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod error;
mod io;

use commands::{bundle::BundleArgs, deltas::DeltasArgs, optimize::OptimizeArgs};

/// QFOS - query fan-out session detection and window optimization
#[derive(Parser)]
#[command(name = "qfos")]
#[command(version)]
#[command(about = "Query fan-out session detection and window optimization")]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep candidate windows and emit a confidence-rated recommendation
    Optimize(OptimizeArgs),
    /// Bundle at a fixed window and emit session rows
    Bundle(BundleArgs),
    /// Inter-request gap statistics and candidate-window discovery
    Deltas(DeltasArgs),
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Optimize(args) => commands::optimize::run(args),
        Commands::Bundle(args) => commands::bundle::run(args),
        Commands::Deltas(args) => commands::deltas::run(args),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}
