//! Window optimization: candidate sweep, cross-validation, selection.
//!
//! For every candidate gap threshold the optimizer runs the full pipeline
//! (bundle, embed, refine, annotate, measure) over the request snapshot
//! and over each temporal cross-validation fold, computes the composite
//! OptScore, and ranks the candidates. Selection excludes windows with
//! insufficient session support; when every candidate fails support the
//! report carries no recommendation.
//!
//! Evaluations are independent: they share only the read-only snapshot
//! and rebuild their TF-IDF vocabulary per pass, so the (window, fold)
//! grid runs on a rayon pool with deterministic result order. Every task
//! observes a cooperative cancellation token; cancellation surfaces as an
//! error before anything reaches a sink.
//!
//! Given the same input, configuration, and seed, the report and the
//! emitted sessions are bit-identical.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use uuid::Uuid;

use crate::bundler::TemporalBundler;
use crate::config::{EmbeddingBackendKind, OptimizerConfig, MIN_SUPPORT};
use crate::embedding::{EmbeddingBackend, TfidfBackend};
use crate::error::{EngineError, EvaluationWarning, Result};
use crate::metrics::{
    annotate_sessions, compute_metrics, url_prefix, MetricSummary, MetricsContext,
};
use crate::refiner::SessionRefiner;
use crate::report::{
    FoldStats, OptimizationReport, ProviderBreakdown, Recommendation,
    RecommendationConfidence, WindowEvaluation,
};
use crate::traits::{RequestSource, SessionSink};
use crate::types::{Request, Session};

/// Page size used when draining a request source.
pub const SOURCE_PAGE_SIZE: usize = 4096;

// ============================================================================
// CANCELLATION
// ============================================================================

/// Cooperative cancellation signal shared between the caller and the
/// evaluation tasks. Cancellation between evaluations guarantees no
/// partial session reaches a sink.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// OPTIMIZER
// ============================================================================

/// Result of an optimization run: the report plus the recommended
/// window's sessions (empty when there is no recommendation).
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub report: OptimizationReport,
    pub recommended_sessions: Vec<Session>,
}

/// The window optimizer drives bundler, embedder, refiner, and metrics
/// once per candidate window and fold.
pub struct WindowOptimizer {
    config: OptimizerConfig,
    backend: Arc<dyn EmbeddingBackend>,
    cancel: CancellationToken,
}

impl WindowOptimizer {
    /// Optimizer with the backend selected by configuration.
    ///
    /// Selecting the transformer backend without installing one falls
    /// back to TF-IDF with a warning, so batch runs degrade instead of
    /// failing.
    pub fn new(config: OptimizerConfig) -> Result<Self> {
        config.validate()?;
        let backend: Arc<dyn EmbeddingBackend> = match config.embedding_backend {
            EmbeddingBackendKind::Tfidf => Arc::new(TfidfBackend::new()),
            EmbeddingBackendKind::Transformer => {
                tracing::warn!(
                    "transformer backend selected but none installed; falling back to tfidf"
                );
                Arc::new(TfidfBackend::new())
            }
        };
        Ok(Self {
            config,
            backend,
            cancel: CancellationToken::new(),
        })
    }

    /// Optimizer with a caller-installed embedding backend.
    pub fn with_backend(
        config: OptimizerConfig,
        backend: Arc<dyn EmbeddingBackend>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Token for cancelling this optimizer's runs from another thread.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain a source, optimize, and write the recommended window's
    /// sessions and the report to the sink.
    ///
    /// Sink writes happen only after every evaluation finished; the
    /// session batch is written before the report so a transactional
    /// sink can tie both to one commit.
    pub fn run(
        &self,
        source: &mut dyn RequestSource,
        sink: &mut dyn SessionSink,
    ) -> Result<OptimizationReport> {
        let mut requests = Vec::new();
        while let Some(batch) = source.next_batch(SOURCE_PAGE_SIZE)? {
            requests.extend(batch);
        }

        let outcome = self.optimize(&requests)?;
        if !outcome.recommended_sessions.is_empty() {
            sink.write_sessions(&outcome.recommended_sessions)?;
        }
        sink.write_report(&outcome.report)?;
        Ok(outcome.report)
    }

    /// Evaluate all candidate windows over an in-memory request set.
    pub fn optimize(&self, requests: &[Request]) -> Result<OptimizationOutcome> {
        self.config.validate()?;
        let total_requests = requests.len();

        // Category and provider filtering happen before anything else;
        // excluded traffic never influences vocabulary or metrics.
        let mut snapshot: Vec<Request> = requests
            .iter()
            .filter(|r| match self.config.filter_category {
                Some(category) => r.bot_category == category,
                None => true,
            })
            .filter(|r| {
                !self
                    .config
                    .exclude_providers
                    .iter()
                    .any(|p| p == r.provider.as_str())
            })
            .cloned()
            .collect();
        // Stable time sort: fold boundaries are temporal, and equal
        // timestamps keep input order.
        snapshot.sort_by_key(|r| r.timestamp);

        let mut warnings = Vec::new();
        let mut provider_counts: BTreeMap<String, usize> = BTreeMap::new();
        for request in &snapshot {
            *provider_counts
                .entry(request.provider.to_string())
                .or_insert(0) += 1;
        }
        for (provider, &count) in &provider_counts {
            if count < MIN_SUPPORT {
                warnings.push(EvaluationWarning::EmptyPartition {
                    provider: provider.clone(),
                    request_count: count,
                });
            }
        }

        let windows = self.config.sorted_candidates();
        let folds = self.config.folds;
        let fold_slices = fold_slices(&snapshot, folds);

        // One task per (window, full-or-fold); rayon preserves result
        // order, which keeps aggregation deterministic.
        let tasks: Vec<(u64, Option<usize>)> = windows
            .iter()
            .flat_map(|&w| {
                std::iter::once((w, None)).chain((0..folds).map(move |f| (w, Some(f))))
            })
            .collect();

        let results: Vec<TaskResult> = tasks
            .par_iter()
            .map(|&(window, fold)| {
                if self.cancel.is_cancelled() {
                    return TaskResult::Cancelled;
                }
                let data: &[Request] = match fold {
                    None => &snapshot,
                    Some(f) => fold_slices[f],
                };
                self.evaluate_pass(data, window, fold)
            })
            .collect();

        for result in &results {
            match result {
                TaskResult::Cancelled => return Err(EngineError::Cancelled),
                TaskResult::Fatal(err) => {
                    return Err(clone_fatal(err));
                }
                _ => {}
            }
        }

        self.assemble(
            windows,
            folds,
            results,
            warnings,
            total_requests,
            snapshot.len(),
        )
    }

    /// One (window, fold) pipeline pass.
    fn evaluate_pass(&self, data: &[Request], window: u64, fold: Option<usize>) -> TaskResult {
        let fold_tag = fold.map(|f| f as u64 + 1).unwrap_or(0);
        if data.is_empty() {
            return TaskResult::Skipped(EvaluationWarning::EmbeddingDegenerate {
                window_ms: window,
                fold,
                reason: "no requests in evaluation".to_string(),
            });
        }

        let bundler = TemporalBundler::new(window, self.config.presort_enabled);
        let sessions = match bundler.bundle(data) {
            Ok(sessions) => sessions,
            Err(err) => return TaskResult::Fatal(err),
        };

        let documents: Vec<Vec<String>> = data
            .iter()
            .map(|r| crate::tokenize::raw_tokens(&r.host, &r.path, r.query_string.as_deref()))
            .collect();
        let matrix = match self.backend.embed(&documents) {
            Ok(matrix) => matrix,
            Err(err) => {
                return TaskResult::Skipped(EvaluationWarning::EmbeddingDegenerate {
                    window_ms: window,
                    fold,
                    reason: err.to_string(),
                })
            }
        };
        if matrix.len() != data.len() {
            return TaskResult::Fatal(EngineError::Embedding(
                crate::error::EmbeddingError::RowCountMismatch {
                    backend: self.backend.name().to_string(),
                    expected: data.len(),
                    actual: matrix.len(),
                },
            ));
        }

        let row_of: HashMap<Uuid, usize> =
            data.iter().enumerate().map(|(i, r)| (r.id, i)).collect();
        let timestamps: Vec<DateTime<Utc>> = data.iter().map(|r| r.timestamp).collect();
        let prefixes: Vec<String> = data.iter().map(|r| url_prefix(&r.path)).collect();

        let refiner = SessionRefiner::new(&self.config);
        let mut sessions = refiner.refine(sessions, &matrix, &row_of, &timestamps, fold_tag);

        let ctx = MetricsContext {
            matrix: &matrix,
            row_of: &row_of,
            prefixes: &prefixes,
        };
        annotate_sessions(&mut sessions, &ctx, &self.config, fold_tag);
        let metrics = compute_metrics(&sessions, &ctx, &self.config, window, fold_tag);
        let opt_score = self.score(&metrics);

        // Per-provider breakdown only for the full pass; folds just need
        // the composite score.
        let per_provider = if fold.is_none() {
            self.provider_breakdown(&sessions, &ctx, data, window)
        } else {
            Vec::new()
        };

        tracing::info!(
            window_ms = window,
            fold = fold.map(|f| f as i64).unwrap_or(-1),
            sessions = sessions.len(),
            opt_score,
            mibcs = metrics.mibcs,
            bps = metrics.bps,
            "evaluated window"
        );

        TaskResult::Ok(Box::new(PassOutcome {
            sessions,
            metrics,
            opt_score,
            per_provider,
        }))
    }

    fn provider_breakdown(
        &self,
        sessions: &[Session],
        ctx: &MetricsContext<'_>,
        data: &[Request],
        window: u64,
    ) -> Vec<ProviderBreakdown> {
        let mut request_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for request in data {
            *request_counts.entry(request.provider.as_str()).or_insert(0) += 1;
        }

        request_counts
            .into_iter()
            .filter(|&(_, count)| count >= MIN_SUPPORT)
            .map(|(provider, _)| {
                let subset: Vec<Session> = sessions
                    .iter()
                    .filter(|s| s.provider.as_str() == provider)
                    .cloned()
                    .collect();
                let metrics = compute_metrics(&subset, ctx, &self.config, window, 0);
                let opt_score = self.score(&metrics);
                ProviderBreakdown {
                    provider: provider.to_string(),
                    metrics,
                    opt_score,
                }
            })
            .collect()
    }

    #[inline]
    fn score(&self, m: &MetricSummary) -> f32 {
        self.config.opt_score_weights.score(
            m.mibcs,
            m.silhouette,
            m.bps,
            m.singleton_rate,
            m.giant_rate,
            m.thematic_variance,
        )
    }

    /// Aggregate task results into the ranked report.
    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        windows: Vec<u64>,
        folds: usize,
        mut results: Vec<TaskResult>,
        mut warnings: Vec<EvaluationWarning>,
        total_requests: usize,
        evaluated_requests: usize,
    ) -> Result<OptimizationOutcome> {
        let stride = folds + 1;
        let mut sessions_by_window: HashMap<u64, Vec<Session>> = HashMap::new();
        let mut rows: Vec<WindowEvaluation> = Vec::with_capacity(windows.len());

        for (i, &window) in windows.iter().enumerate() {
            let mut fold_scores: Vec<Option<f32>> = Vec::with_capacity(folds);
            for f in 0..folds {
                match std::mem::replace(&mut results[i * stride + 1 + f], TaskResult::Taken) {
                    TaskResult::Ok(outcome) => fold_scores.push(Some(outcome.opt_score)),
                    TaskResult::Skipped(warning) => {
                        warnings.push(warning);
                        fold_scores.push(None);
                    }
                    _ => unreachable!("fatal results handled before assembly"),
                }
            }

            let (metrics, opt_score, per_provider, mut excluded, mut exclusion_reason) =
                match std::mem::replace(&mut results[i * stride], TaskResult::Taken) {
                    TaskResult::Ok(outcome) => {
                        let PassOutcome {
                            sessions,
                            metrics,
                            opt_score,
                            per_provider,
                        } = *outcome;
                        sessions_by_window.insert(window, sessions);
                        (Some(metrics), Some(opt_score), per_provider, false, None)
                    }
                    TaskResult::Skipped(warning) => {
                        let reason = warning.to_string();
                        warnings.push(warning);
                        (None, None, Vec::new(), true, Some(reason))
                    }
                    _ => unreachable!("fatal results handled before assembly"),
                };

            if let Some(metrics) = &metrics {
                if metrics.session_count < MIN_SUPPORT {
                    excluded = true;
                    let warning = EvaluationWarning::LowSupport {
                        window_ms: window,
                        session_count: metrics.session_count,
                    };
                    exclusion_reason = Some(warning.to_string());
                    warnings.push(warning);
                }
            }

            let present: Vec<f32> = fold_scores.iter().flatten().copied().collect();
            let (mean, std) = if present.is_empty() {
                (None, None)
            } else {
                let mean = present.iter().sum::<f32>() / present.len() as f32;
                let variance = present.iter().map(|s| (s - mean).powi(2)).sum::<f32>()
                    / present.len() as f32;
                (Some(mean), Some(variance.sqrt()))
            };

            rows.push(WindowEvaluation {
                window_ms: window,
                metrics,
                opt_score,
                per_provider,
                folds: FoldStats {
                    scores: fold_scores,
                    mean,
                    std,
                    wins: 0,
                },
                excluded,
                exclusion_reason,
            });
        }

        // Fold wins: per fold, the argmax over scored windows; a strict
        // tie goes to the smaller window.
        let mut folds_contested = 0usize;
        for f in 0..folds {
            let mut best: Option<(usize, f32)> = None;
            for (w, row) in rows.iter().enumerate() {
                if let Some(score) = row.folds.scores[f] {
                    let replace = match best {
                        Some((_, best_score)) => score > best_score,
                        None => true,
                    };
                    if replace {
                        best = Some((w, score));
                    }
                }
            }
            if let Some((w, _)) = best {
                folds_contested += 1;
                rows[w].folds.wins += 1;
            }
        }

        // Selection over supported candidates.
        let mut winner: Option<usize> = None;
        let mut runner_up: Option<f32> = None;
        for (w, row) in rows.iter().enumerate() {
            if row.excluded {
                continue;
            }
            let score = row.opt_score.expect("non-excluded rows have a score");
            match winner {
                None => winner = Some(w),
                Some(current) => {
                    let current_score =
                        rows[current].opt_score.expect("winner has a score");
                    if score > current_score {
                        runner_up = Some(current_score);
                        winner = Some(w);
                    } else {
                        runner_up = Some(runner_up.map_or(score, |r| r.max(score)));
                    }
                }
            }
        }

        let recommendation = winner.map(|w| {
            let row = &rows[w];
            let opt_score = row.opt_score.expect("winner has a score");
            let margin = runner_up.map(|r| opt_score - r);
            let std = row.folds.std.unwrap_or(0.0);
            let wins = row.folds.wins;

            let confidence = if folds_contested > 0
                && wins == folds_contested
                && margin.map_or(true, |m| m > 2.0 * std)
            {
                RecommendationConfidence::High
            } else if wins >= folds.div_ceil(2) {
                RecommendationConfidence::Medium
            } else {
                RecommendationConfidence::Low
            };

            Recommendation {
                window_ms: row.window_ms,
                opt_score,
                metrics: row.metrics.clone().expect("winner has metrics"),
                confidence,
                margin,
                fold_wins: wins,
                folds_contested,
            }
        });

        let recommended_sessions = recommendation
            .as_ref()
            .and_then(|r| sessions_by_window.remove(&r.window_ms))
            .unwrap_or_default();

        if recommendation.is_none() {
            tracing::warn!("no candidate window met the support minimum; no recommendation");
        }

        // Ranked table: OptScore descending, skipped evaluations last,
        // ties broken by window ascending.
        rows.sort_by(|a, b| match (a.opt_score, b.opt_score) {
            (Some(x), Some(y)) => y
                .partial_cmp(&x)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.window_ms.cmp(&b.window_ms)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.window_ms.cmp(&b.window_ms),
        });

        Ok(OptimizationOutcome {
            report: OptimizationReport {
                evaluations: rows,
                recommendation,
                warnings,
                seed: self.config.seed,
                total_requests,
                evaluated_requests,
                folds,
            },
            recommended_sessions,
        })
    }
}

// ============================================================================
// TASK PLUMBING
// ============================================================================

struct PassOutcome {
    sessions: Vec<Session>,
    metrics: MetricSummary,
    opt_score: f32,
    per_provider: Vec<ProviderBreakdown>,
}

enum TaskResult {
    Ok(Box<PassOutcome>),
    Skipped(EvaluationWarning),
    Fatal(EngineError),
    Cancelled,
    /// Placeholder after the result moved out during assembly.
    Taken,
}

/// Split a time-sorted snapshot into `k` contiguous fold slices; the
/// remainder spreads over the leading folds.
fn fold_slices(snapshot: &[Request], folds: usize) -> Vec<&[Request]> {
    let n = snapshot.len();
    let base = n / folds;
    let remainder = n % folds;
    let mut slices = Vec::with_capacity(folds);
    let mut start = 0;
    for f in 0..folds {
        let len = base + usize::from(f < remainder);
        slices.push(&snapshot[start..start + len]);
        start += len;
    }
    slices
}

/// `EngineError` is not `Clone` (io-like payloads); rebuild the fatal
/// variants that can escape a task.
fn clone_fatal(err: &EngineError) -> EngineError {
    match err {
        EngineError::InputOrder { provider, row } => EngineError::InputOrder {
            provider: provider.clone(),
            row: *row,
        },
        EngineError::Embedding(e) => EngineError::Embedding(e.clone()),
        EngineError::Config(e) => EngineError::Config(e.clone()),
        EngineError::Source(msg) => EngineError::Source(msg.clone()),
        EngineError::Sink(msg) => EngineError::Sink(msg.clone()),
        EngineError::Cancelled => EngineError::Cancelled,
    }
}
