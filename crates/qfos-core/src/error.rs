//! Unified error type for the QFOS engine.
//!
//! Two kinds of failure exist in the engine:
//! - Fatal errors (`EngineError`): abort the run immediately. Only
//!   configuration errors and input-order violations are fatal.
//! - Recorded warnings (`EvaluationWarning`): captured per evaluation and
//!   surfaced in the final report instead of aborting.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// CONFIGURATION ERRORS
// ============================================================================

/// Configuration validation errors.
///
/// All variants are fatal: the optimizer refuses to start with an invalid
/// configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// A composite-score weight is negative.
    #[error("Weight '{name}' must be non-negative, got {value}")]
    NegativeWeight { name: &'static str, value: f32 },

    /// A threshold lies outside its allowed range.
    #[error("Threshold '{name}' must be in [{min}, {max}], got {value}")]
    ThresholdOutOfRange {
        name: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },

    /// The candidate window set is empty.
    #[error("Candidate window set is empty")]
    EmptyCandidates,

    /// A candidate window is zero.
    #[error("Candidate windows must be positive, got 0")]
    ZeroWindow,

    /// Cross-validation needs at least one fold.
    #[error("Fold count must be at least 1, got 0")]
    ZeroFolds,
}

// ============================================================================
// EMBEDDING ERRORS
// ============================================================================

/// Errors from embedding backends.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EmbeddingError {
    /// No usable tokens across the whole corpus; the evaluation that hit
    /// this is skipped with a recorded reason.
    #[error("Degenerate embedding: vocabulary is empty")]
    DegenerateVocabulary,

    /// A backend produced a matrix whose row count does not match the
    /// number of input documents.
    #[error("Backend '{backend}' returned {actual} rows for {expected} documents")]
    RowCountMismatch {
        backend: String,
        expected: usize,
        actual: usize,
    },
}

// ============================================================================
// TOP-LEVEL ENGINE ERROR
// ============================================================================

/// Top-level error type for the QFOS engine.
///
/// Per-evaluation failures are not represented here; they are captured as
/// [`EvaluationWarning`] values in the report. Only errors that must abort
/// the whole run surface through this type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration. Always fatal.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Out-of-order timestamp within a provider partition while pre-sort
    /// is disabled. Always fatal; names the offending partition and row.
    #[error("Out-of-order timestamp in provider '{provider}' at row {row}")]
    InputOrder { provider: String, row: usize },

    /// Embedding failure outside the recorded-warning pathway (e.g. a
    /// custom backend violating its row-count contract).
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// A request source failed to produce records.
    #[error("Request source error: {0}")]
    Source(String),

    /// A session sink rejected a write.
    #[error("Session sink error: {0}")]
    Sink(String),

    /// The run was cancelled through the cooperative cancellation token.
    #[error("Run cancelled")]
    Cancelled,
}

impl EngineError {
    /// Whether the error is a configuration problem (caller bug) as
    /// opposed to a data or collaborator failure.
    #[inline]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

// ============================================================================
// RECORDED WARNINGS
// ============================================================================

/// Non-fatal conditions recorded during optimization and surfaced in the
/// final report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationWarning {
    /// A provider has fewer than the minimum request count after
    /// filtering; it is excluded from per-provider metrics.
    EmptyPartition {
        provider: String,
        request_count: usize,
    },

    /// A candidate window produced fewer sessions than the support
    /// minimum; it is reported but excluded from selection.
    LowSupport {
        window_ms: u64,
        session_count: usize,
    },

    /// An evaluation was skipped because its embedding was degenerate.
    EmbeddingDegenerate {
        window_ms: u64,
        fold: Option<usize>,
        reason: String,
    },
}

impl std::fmt::Display for EvaluationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPartition {
                provider,
                request_count,
            } => write!(
                f,
                "provider '{provider}' has only {request_count} requests; excluded from per-provider metrics"
            ),
            Self::LowSupport {
                window_ms,
                session_count,
            } => write!(
                f,
                "window {window_ms} ms produced only {session_count} sessions; excluded from selection"
            ),
            Self::EmbeddingDegenerate {
                window_ms,
                fold,
                reason,
            } => match fold {
                Some(fold) => write!(
                    f,
                    "window {window_ms} ms fold {fold} skipped: {reason}"
                ),
                None => write!(f, "window {window_ms} ms skipped: {reason}"),
            },
        }
    }
}
