//! Optimization report types.
//!
//! The report is the optimizer's final artifact: a ranked table of
//! candidate windows with their component metrics, per-provider
//! breakdowns, fold statistics, recorded warnings, and the
//! confidence-rated recommendation (absent when no candidate had
//! sufficient support).

use serde::{Deserialize, Serialize};

use crate::error::EvaluationWarning;
use crate::metrics::MetricSummary;

/// Metrics and composite score for one provider subpopulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderBreakdown {
    pub provider: String,
    pub metrics: MetricSummary,
    pub opt_score: f32,
}

/// Cross-validation statistics for one candidate window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldStats {
    /// OptScore per fold; `None` where the fold evaluation was skipped.
    pub scores: Vec<Option<f32>>,
    /// Mean over evaluated folds.
    pub mean: Option<f32>,
    /// Population standard deviation over evaluated folds.
    pub std: Option<f32>,
    /// Folds in which this window was the argmax.
    pub wins: usize,
}

/// One row of the ranked candidate table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowEvaluation {
    pub window_ms: u64,
    /// Full-pass metrics; `None` when the evaluation was skipped.
    pub metrics: Option<MetricSummary>,
    /// Full-pass composite score; `None` when the evaluation was skipped.
    pub opt_score: Option<f32>,
    /// Per-provider breakdown of the full pass, providers ascending.
    pub per_provider: Vec<ProviderBreakdown>,
    pub folds: FoldStats,
    /// Whether the window was excluded from selection.
    pub excluded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusion_reason: Option<String>,
}

/// Confidence in the recommended window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationConfidence {
    /// Argmax in every contested fold with a margin over the runner-up
    /// exceeding twice the across-fold standard deviation.
    High,
    /// Argmax in at least half the folds (rounded up).
    Medium,
    Low,
}

impl std::fmt::Display for RecommendationConfidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => f.write_str("high"),
            Self::Medium => f.write_str("medium"),
            Self::Low => f.write_str("low"),
        }
    }
}

/// The confidence-rated recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub window_ms: u64,
    pub opt_score: f32,
    pub metrics: MetricSummary,
    pub confidence: RecommendationConfidence,
    /// OptScore margin over the runner-up; `None` with a single
    /// selectable candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin: Option<f32>,
    /// Folds in which the recommended window was the argmax.
    pub fold_wins: usize,
    /// Folds in which at least one candidate was evaluated.
    pub folds_contested: usize,
}

/// Final optimizer artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    /// Candidate table ranked by OptScore descending, ties broken by
    /// window ascending; skipped evaluations rank last.
    pub evaluations: Vec<WindowEvaluation>,
    /// `None` is the `no_recommendation` outcome: every candidate failed
    /// support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,
    pub warnings: Vec<EvaluationWarning>,
    /// Master seed the run used.
    pub seed: u64,
    /// Records received from the source.
    pub total_requests: usize,
    /// Records remaining after category and provider filtering.
    pub evaluated_requests: usize,
    pub folds: usize,
}

impl OptimizationReport {
    /// Evaluation row for a given window, if present.
    pub fn evaluation(&self, window_ms: u64) -> Option<&WindowEvaluation> {
        self.evaluations.iter().find(|e| e.window_ms == window_ms)
    }
}
