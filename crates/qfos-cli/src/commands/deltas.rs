//! `qfos deltas`: inter-request gap statistics and window discovery.

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use qfos_core::deltas::{delta_stats, discover_candidates, DeltaStats, DEFAULT_CANDIDATE_PERCENTILES};

use crate::error::CliResult;
use crate::io::read_requests;

#[derive(Debug, Args)]
pub struct DeltasArgs {
    /// NDJSON request file.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Percentiles proposed as candidate windows.
    #[arg(short, long, value_delimiter = ',')]
    pub percentiles: Option<Vec<u8>>,
}

#[derive(Debug, Serialize)]
struct DeltasOutput {
    stats: std::collections::BTreeMap<String, DeltaStats>,
    candidate_windows_ms: Vec<f64>,
}

pub fn run(args: DeltasArgs) -> CliResult<()> {
    let requests = read_requests(&args.input)?;
    let percentiles = args
        .percentiles
        .unwrap_or_else(|| DEFAULT_CANDIDATE_PERCENTILES.to_vec());

    let output = DeltasOutput {
        stats: delta_stats(&requests),
        candidate_windows_ms: discover_candidates(&requests, &percentiles),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
