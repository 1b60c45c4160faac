//! Optimizer configuration.
//!
//! Configuration is an immutable value passed into the optimizer; there is
//! no process-wide state. `Default` carries the validated production
//! defaults; [`OptimizerConfig::validate`] rejects out-of-range values
//! before any evaluation starts.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default candidate gap thresholds in milliseconds.
pub const DEFAULT_CANDIDATE_WINDOWS_MS: [u64; 6] = [50, 100, 500, 1000, 3000, 5000];

/// Sessions larger than this are flagged `giant`.
pub const DEFAULT_GIANT_THRESHOLD: usize = 50;

/// Sessions at or below this size count as singletons.
pub const DEFAULT_SINGLETON_SIZE: usize = 1;

/// Sessions with MIBCS below this floor are refinement candidates.
pub const DEFAULT_COHERENCE_FLOOR: f32 = 0.5;

/// Minimum pairwise cosine for a refinement-graph edge.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.5;

/// Minimum session size for refinement candidacy.
pub const DEFAULT_MIN_BUNDLE_SIZE: usize = 3;

/// Components smaller than this are held aside as residual during a split.
pub const DEFAULT_MIN_SUB_BUNDLE_SIZE: usize = 2;

/// A split is accepted only if the weighted component MIBCS beats the
/// parent MIBCS by at least this much.
pub const DEFAULT_MIN_MIBCS_IMPROVEMENT: f32 = 0.05;

/// Row cap for intra-bundle pairwise similarity on giant sessions.
pub const DEFAULT_MAX_INTRA_BUNDLE_ROWS: usize = 200;

/// Number of temporal cross-validation folds.
pub const DEFAULT_FOLDS: usize = 5;

/// Request cap for silhouette computation per evaluation.
pub const DEFAULT_SILHOUETTE_SAMPLE_CAP: usize = 5000;

/// Deterministic default seed for all samplers.
pub const DEFAULT_SEED: u64 = 42;

/// Minimum sessions a candidate window must produce to be selectable, and
/// minimum requests a provider must carry to appear in per-provider
/// metrics.
pub const MIN_SUPPORT: usize = 10;

/// Embedding backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackendKind {
    /// TF-IDF over tokenized URLs. Always available.
    #[default]
    Tfidf,
    /// Dense transformer embeddings. Requires an installed backend; falls
    /// back to TF-IDF with a warning when none is registered.
    Transformer,
}

/// Weights for the composite optimization score.
///
/// `OptScore = α·MIBCS + β·Silhouette + γ·BPS − δ·SingletonRate −
/// ε·GiantRate − ζ·ThematicVariance`. The weights need not sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptScoreWeights {
    /// MIBCS weight.
    pub alpha: f32,
    /// Silhouette weight.
    pub beta: f32,
    /// Bundle purity weight.
    pub gamma: f32,
    /// Singleton-rate penalty.
    pub delta: f32,
    /// Giant-rate penalty.
    pub epsilon: f32,
    /// Thematic-variance penalty.
    pub zeta: f32,
}

impl Default for OptScoreWeights {
    fn default() -> Self {
        Self {
            alpha: 0.30,
            beta: 0.25,
            gamma: 0.25,
            delta: 0.10,
            epsilon: 0.05,
            zeta: 0.05,
        }
    }
}

impl OptScoreWeights {
    /// Composite score from the six components.
    #[inline]
    pub fn score(
        &self,
        mibcs: f32,
        silhouette: f32,
        bps: f32,
        singleton_rate: f32,
        giant_rate: f32,
        thematic_variance: f32,
    ) -> f32 {
        self.alpha * mibcs + self.beta * silhouette + self.gamma * bps
            - self.delta * singleton_rate
            - self.epsilon * giant_rate
            - self.zeta * thematic_variance
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("alpha", self.alpha),
            ("beta", self.beta),
            ("gamma", self.gamma),
            ("delta", self.delta),
            ("epsilon", self.epsilon),
            ("zeta", self.zeta),
        ] {
            if value < 0.0 {
                return Err(ConfigError::NegativeWeight { name, value });
            }
        }
        Ok(())
    }
}

/// Complete optimizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Ordered set of candidate gap thresholds in milliseconds.
    pub candidate_windows_ms: Vec<u64>,

    /// Composite-score weights.
    pub opt_score_weights: OptScoreWeights,

    /// Sessions larger than this are flagged `giant`.
    pub giant_threshold: usize,

    /// Sessions at or below this size count as singletons.
    pub singleton_size: usize,

    /// MIBCS floor below which a session becomes a refinement candidate.
    pub coherence_floor: f32,

    /// Minimum pairwise cosine for a refinement-graph edge.
    pub similarity_threshold: f32,

    /// Minimum session size for refinement candidacy.
    pub min_bundle_size: usize,

    /// Minimum component size during graph splitting.
    pub min_sub_bundle_size: usize,

    /// Required MIBCS improvement to accept a split.
    pub min_mibcs_improvement: f32,

    /// Whether the session refiner runs at all.
    pub refinement_enabled: bool,

    /// IP-based refinement toggle. The default pathway ignores IP
    /// entirely; enabling this keeps the interface but does not change
    /// splitting behavior.
    pub ip_refinement_enabled: bool,

    /// Embedding backend selector.
    pub embedding_backend: EmbeddingBackendKind,

    /// Row cap for intra-bundle pairwise similarity on giant sessions.
    pub max_intra_bundle_pairs: usize,

    /// Number of temporal cross-validation folds.
    pub folds: usize,

    /// Request cap for silhouette computation per evaluation.
    pub silhouette_sample_cap: usize,

    /// Master seed for all samplers.
    pub seed: u64,

    /// Provider labels ignored during optimization.
    pub exclude_providers: Vec<String>,

    /// When set, only requests of this bot category are evaluated.
    pub filter_category: Option<crate::types::BotCategory>,

    /// Stable per-partition timestamp sort before bundling. When
    /// disabled, out-of-order input is a fatal `InputOrderError`.
    pub presort_enabled: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            candidate_windows_ms: DEFAULT_CANDIDATE_WINDOWS_MS.to_vec(),
            opt_score_weights: OptScoreWeights::default(),
            giant_threshold: DEFAULT_GIANT_THRESHOLD,
            singleton_size: DEFAULT_SINGLETON_SIZE,
            coherence_floor: DEFAULT_COHERENCE_FLOOR,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            min_bundle_size: DEFAULT_MIN_BUNDLE_SIZE,
            min_sub_bundle_size: DEFAULT_MIN_SUB_BUNDLE_SIZE,
            min_mibcs_improvement: DEFAULT_MIN_MIBCS_IMPROVEMENT,
            refinement_enabled: true,
            ip_refinement_enabled: false,
            embedding_backend: EmbeddingBackendKind::Tfidf,
            max_intra_bundle_pairs: DEFAULT_MAX_INTRA_BUNDLE_ROWS,
            folds: DEFAULT_FOLDS,
            silhouette_sample_cap: DEFAULT_SILHOUETTE_SAMPLE_CAP,
            seed: DEFAULT_SEED,
            exclude_providers: vec!["Microsoft".to_string(), "Bing".to_string()],
            filter_category: Some(crate::types::BotCategory::UserRequest),
            presort_enabled: true,
        }
    }
}

impl OptimizerConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found: negative weights,
    /// thresholds outside [0, 1], an empty or zero-valued candidate set,
    /// or a zero fold count.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.opt_score_weights.validate()?;

        if self.candidate_windows_ms.is_empty() {
            return Err(ConfigError::EmptyCandidates);
        }
        if self.candidate_windows_ms.iter().any(|&w| w == 0) {
            return Err(ConfigError::ZeroWindow);
        }
        if self.folds == 0 {
            return Err(ConfigError::ZeroFolds);
        }

        for (name, value) in [
            ("coherence_floor", self.coherence_floor),
            ("similarity_threshold", self.similarity_threshold),
            ("min_mibcs_improvement", self.min_mibcs_improvement),
        ] {
            if !(0.0..=1.0).contains(&value) || value.is_nan() {
                return Err(ConfigError::ThresholdOutOfRange {
                    name,
                    value,
                    min: 0.0,
                    max: 1.0,
                });
            }
        }

        Ok(())
    }

    /// Candidate windows sorted ascending with duplicates removed.
    pub fn sorted_candidates(&self) -> Vec<u64> {
        let mut windows = self.candidate_windows_ms.clone();
        windows.sort_unstable();
        windows.dedup();
        windows
    }
}
