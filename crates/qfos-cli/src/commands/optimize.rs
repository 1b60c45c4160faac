//! `qfos optimize`: sweep candidate windows and emit the report.

use std::path::PathBuf;

use clap::Args;

use qfos_core::config::OptimizerConfig;
use qfos_core::optimizer::WindowOptimizer;
use qfos_core::report::OptimizationReport;

use crate::error::{CliError, CliResult};
use crate::io::{FileSessionSink, NdjsonRequestSource};

#[derive(Debug, Args)]
pub struct OptimizeArgs {
    /// NDJSON request file.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Optional JSON configuration file; defaults apply otherwise.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Candidate windows in ms, overriding the configuration.
    #[arg(short = 'w', long, value_delimiter = ',')]
    pub windows: Option<Vec<u64>>,

    /// Output path for the recommended window's sessions (NDJSON).
    #[arg(long, default_value = "sessions.ndjson")]
    pub sessions: PathBuf,

    /// Output path for the optimization report (JSON).
    #[arg(long, default_value = "report.json")]
    pub report: PathBuf,
}

pub fn run(args: OptimizeArgs) -> CliResult<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(windows) = args.windows {
        config.candidate_windows_ms = windows;
    }

    let optimizer = WindowOptimizer::new(config)?;
    let mut source = NdjsonRequestSource::open(&args.input)?;
    let mut sink = FileSessionSink::new(args.sessions, args.report);
    let report = optimizer.run(&mut source, &mut sink)?;

    print_summary(&report);
    Ok(())
}

pub(crate) fn load_config(path: Option<&std::path::Path>) -> CliResult<OptimizerConfig> {
    match path {
        None => Ok(OptimizerConfig::default()),
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| CliError::io(path.display().to_string(), e))?;
            Ok(serde_json::from_str(&text)?)
        }
    }
}

fn print_summary(report: &OptimizationReport) {
    println!(
        "{:>12} {:>10} {:>8} {:>8} {:>8} {:>8} {:>8}  {}",
        "window (ms)", "OptScore", "MIBCS", "BPS", "silh.", "SR", "GR", ""
    );
    for evaluation in &report.evaluations {
        let marker = match &report.recommendation {
            Some(r) if r.window_ms == evaluation.window_ms => "*",
            _ => "",
        };
        match (&evaluation.metrics, evaluation.opt_score) {
            (Some(m), Some(score)) => println!(
                "{:>12} {:>10.4} {:>8.4} {:>8.4} {:>8.4} {:>7.1}% {:>7.1}%  {}{}",
                evaluation.window_ms,
                score,
                m.mibcs,
                m.bps,
                m.silhouette,
                m.singleton_rate * 100.0,
                m.giant_rate * 100.0,
                marker,
                if evaluation.excluded { " (excluded)" } else { "" },
            ),
            _ => println!(
                "{:>12} {:>10}  skipped: {}",
                evaluation.window_ms,
                "-",
                evaluation.exclusion_reason.as_deref().unwrap_or("unknown"),
            ),
        }
    }

    match &report.recommendation {
        Some(r) => println!(
            "\nrecommended window: {} ms (OptScore {:.4}, confidence {}, {}/{} folds)",
            r.window_ms, r.opt_score, r.confidence, r.fold_wins, r.folds_contested
        ),
        None => println!("\nno recommendation: no candidate met the support minimum"),
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
}
