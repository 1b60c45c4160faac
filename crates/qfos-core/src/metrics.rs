//! Bundle quality metrics.
//!
//! Six population metrics drive the window optimizer:
//!
//! - **MIBCS**: mean intra-bundle cosine similarity, aggregated as the
//!   unweighted mean over sessions where it is defined
//! - **BPS**: fraction of sessions dominated (>= 60%) by one URL prefix
//! - **SingletonRate** / **GiantRate**: size-degeneracy rates
//! - **ThematicVariance**: mean of `1 - MIBCS(s)`, singletons contribute 0
//! - **Silhouette**: cosine-distance silhouette over session labels
//!
//! Zero embedding rows (empty tokenizations) are masked out of MIBCS; a
//! session needs two usable rows for a defined similarity profile.
//! Sessions beyond the row cap and evaluations beyond the silhouette cap
//! are uniformly subsampled with seeded generators, so every number here
//! is reproducible. Every aggregate carries its support size so the
//! optimizer can reject low-support windows.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::OptimizerConfig;
use crate::embedding::EmbeddingMatrix;
use crate::sampling::{rng_for, sample_indices};
use crate::types::{ConfidenceLevel, Session, SessionFlag};

/// A session is "pure" when its dominant URL prefix covers at least this
/// fraction of members.
pub const PURITY_DOMINANCE: f32 = 0.6;

/// Path segments forming the purity prefix.
pub const PURITY_PREFIX_SEGMENTS: usize = 2;

// Sampler salts; one stream family per decision kind.
const SALT_SILHOUETTE: u64 = 0x51;
const SALT_SESSION_BASE: u64 = 0x1000_0000;

// ============================================================================
// PER-SESSION PROFILE
// ============================================================================

/// Pairwise-similarity profile of one session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityProfile {
    /// Mean pairwise cosine (the session's MIBCS).
    pub mean: f32,
    pub min: f32,
    pub max: f32,
    pub std: f32,
    /// Number of pairs the profile was computed over.
    pub pair_count: usize,
    /// Rows with non-zero embeddings that entered the computation.
    pub usable_rows: usize,
}

/// Evaluation context shared by the metric computations: the embedding
/// matrix, the request-id to row mapping, and per-row URL prefixes.
pub struct MetricsContext<'a> {
    pub matrix: &'a EmbeddingMatrix,
    pub row_of: &'a HashMap<Uuid, usize>,
    pub prefixes: &'a [String],
}

/// Rows of a session's members, in member order. Members missing from the
/// mapping are skipped (cannot happen for engine-produced sessions).
pub fn session_rows(session: &Session, row_of: &HashMap<Uuid, usize>) -> Vec<usize> {
    session
        .request_ids
        .iter()
        .filter_map(|id| row_of.get(id).copied())
        .collect()
}

/// Pairwise-similarity profile over the given matrix rows.
///
/// Zero rows are masked. Returns `None` with fewer than two usable rows.
/// When usable rows exceed `row_cap`, a uniform seeded subset of exactly
/// `row_cap` rows is used.
pub fn similarity_profile(
    matrix: &EmbeddingMatrix,
    rows: &[usize],
    row_cap: usize,
    rng: &mut rand_chacha::ChaCha8Rng,
) -> Option<SimilarityProfile> {
    let usable: Vec<usize> = rows
        .iter()
        .copied()
        .filter(|&r| !matrix.row(r).is_zero())
        .collect();
    if usable.len() < 2 {
        return None;
    }

    let sampled: Vec<usize> = if usable.len() > row_cap {
        sample_indices(rng, usable.len(), row_cap)
            .into_iter()
            .map(|i| usable[i])
            .collect()
    } else {
        usable.clone()
    };

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    let mut pairs = 0usize;
    for i in 0..sampled.len() {
        for j in (i + 1)..sampled.len() {
            let cos = matrix.cosine(sampled[i], sampled[j]);
            sum += cos as f64;
            sum_sq += (cos as f64) * (cos as f64);
            min = min.min(cos);
            max = max.max(cos);
            pairs += 1;
        }
    }

    let mean = sum / pairs as f64;
    let variance = (sum_sq / pairs as f64 - mean * mean).max(0.0);
    Some(SimilarityProfile {
        mean: mean as f32,
        min,
        max,
        std: variance.sqrt() as f32,
        pair_count: pairs,
        usable_rows: usable.len(),
    })
}

// ============================================================================
// SESSION ANNOTATION
// ============================================================================

/// Fill in each session's MIBCS, confidence, and size flags.
///
/// Runs after bundling (and after refinement when enabled) so the emitted
/// rows carry their final quality fields. `fold_tag` keeps sampler
/// streams distinct between the full pass (0) and fold passes (fold + 1).
pub fn annotate_sessions(
    sessions: &mut [Session],
    ctx: &MetricsContext<'_>,
    config: &OptimizerConfig,
    fold_tag: u64,
) {
    for (index, session) in sessions.iter_mut().enumerate() {
        let rows = session_rows(session, ctx.row_of);
        let mut rng = rng_for(
            config.seed,
            session.window_used,
            fold_tag,
            SALT_SESSION_BASE + index as u64,
        );
        let profile =
            similarity_profile(ctx.matrix, &rows, config.max_intra_bundle_pairs, &mut rng);

        session.mibcs = profile.map(|p| p.mean);
        session.confidence =
            profile.map(|p| ConfidenceLevel::from_similarity(p.mean, p.min));

        if session.size() <= config.singleton_size && !session.has_flag(SessionFlag::Singleton) {
            session.flags.push(SessionFlag::Singleton);
        }
        if session.size() > config.giant_threshold && !session.has_flag(SessionFlag::Giant) {
            session.flags.push(SessionFlag::Giant);
        }
    }
}

// ============================================================================
// POPULATION METRICS
// ============================================================================

/// Metric summary over one session population. Every aggregate carries
/// its support size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    /// Unweighted mean of defined per-session MIBCS.
    pub mibcs: f32,
    /// Sessions with a defined MIBCS.
    pub mibcs_support: usize,
    /// Cosine silhouette averaged over (sampled) requests.
    pub silhouette: f32,
    /// Requests that entered the silhouette average.
    pub silhouette_support: usize,
    /// Bundle purity score.
    pub bps: f32,
    pub singleton_rate: f32,
    pub giant_rate: f32,
    pub thematic_variance: f32,
    /// Support for bps / rates / variance.
    pub session_count: usize,
    pub request_count: usize,
    pub mean_size: f32,
    pub median_size: f32,
    pub min_size: usize,
    pub max_size: usize,
}

impl MetricSummary {
    fn empty() -> Self {
        Self {
            mibcs: 0.0,
            mibcs_support: 0,
            silhouette: 0.0,
            silhouette_support: 0,
            bps: 0.0,
            singleton_rate: 0.0,
            giant_rate: 0.0,
            thematic_variance: 0.0,
            session_count: 0,
            request_count: 0,
            mean_size: 0.0,
            median_size: 0.0,
            min_size: 0,
            max_size: 0,
        }
    }
}

/// Compute the full metric summary for an annotated session population.
///
/// `fold_tag` distinguishes sampler streams as in [`annotate_sessions`];
/// `window_ms` seeds them per candidate.
pub fn compute_metrics(
    sessions: &[Session],
    ctx: &MetricsContext<'_>,
    config: &OptimizerConfig,
    window_ms: u64,
    fold_tag: u64,
) -> MetricSummary {
    if sessions.is_empty() {
        return MetricSummary::empty();
    }

    let session_count = sessions.len();
    let mut sizes: Vec<usize> = sessions.iter().map(Session::size).collect();
    sizes.sort_unstable();
    let request_count: usize = sizes.iter().sum();

    // MIBCS aggregate and thematic variance from the annotated values.
    let defined: Vec<f32> = sessions.iter().filter_map(|s| s.mibcs).collect();
    let mibcs = if defined.is_empty() {
        0.0
    } else {
        defined.iter().sum::<f32>() / defined.len() as f32
    };
    let thematic_variance = sessions
        .iter()
        .map(|s| match s.mibcs {
            Some(m) if s.size() > 1 => 1.0 - m,
            _ => 0.0,
        })
        .sum::<f32>()
        / session_count as f32;

    let singleton_rate = sessions
        .iter()
        .filter(|s| s.size() <= config.singleton_size)
        .count() as f32
        / session_count as f32;
    let giant_rate = sessions
        .iter()
        .filter(|s| s.size() > config.giant_threshold)
        .count() as f32
        / session_count as f32;

    let bps = bundle_purity(sessions, ctx);
    let (silhouette, silhouette_support) =
        silhouette_score(sessions, ctx, config, window_ms, fold_tag);

    let mean_size = request_count as f32 / session_count as f32;
    let median_size = if sizes.len() % 2 == 1 {
        sizes[sizes.len() / 2] as f32
    } else {
        (sizes[sizes.len() / 2 - 1] + sizes[sizes.len() / 2]) as f32 / 2.0
    };

    MetricSummary {
        mibcs,
        mibcs_support: defined.len(),
        silhouette,
        silhouette_support,
        bps,
        singleton_rate,
        giant_rate,
        thematic_variance,
        session_count,
        request_count,
        mean_size,
        median_size,
        min_size: sizes[0],
        max_size: sizes[sizes.len() - 1],
    }
}

/// Fraction of sessions whose most frequent URL prefix covers at least
/// [`PURITY_DOMINANCE`] of the members.
fn bundle_purity(sessions: &[Session], ctx: &MetricsContext<'_>) -> f32 {
    let pure = sessions
        .iter()
        .filter(|session| {
            let rows = session_rows(session, ctx.row_of);
            if rows.is_empty() {
                return false;
            }
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for &row in &rows {
                *counts.entry(ctx.prefixes[row].as_str()).or_insert(0) += 1;
            }
            let dominant = counts.values().copied().max().unwrap_or(0);
            dominant as f32 / rows.len() as f32 >= PURITY_DOMINANCE
        })
        .count();
    pure as f32 / sessions.len() as f32
}

/// Cosine silhouette over session labels.
///
/// `a(i)` is the mean cosine distance to the other members of `i`'s
/// session, `b(i)` the minimum over other sessions of the mean distance to
/// that session's members; singletons contribute 0. Evaluations larger
/// than the configured cap are uniformly subsampled.
fn silhouette_score(
    sessions: &[Session],
    ctx: &MetricsContext<'_>,
    config: &OptimizerConfig,
    window_ms: u64,
    fold_tag: u64,
) -> (f32, usize) {
    let session_rows_list: Vec<Vec<usize>> = sessions
        .iter()
        .map(|s| session_rows(s, ctx.row_of))
        .collect();

    // (row, session index) pairs in deterministic order.
    let membership: Vec<(usize, usize)> = session_rows_list
        .iter()
        .enumerate()
        .flat_map(|(s, rows)| rows.iter().map(move |&r| (r, s)))
        .collect();

    if membership.is_empty() || sessions.len() < 2 {
        return (0.0, 0);
    }

    let sampled: Vec<(usize, usize)> = if membership.len() > config.silhouette_sample_cap {
        let mut rng = rng_for(config.seed, window_ms, fold_tag, SALT_SILHOUETTE);
        sample_indices(&mut rng, membership.len(), config.silhouette_sample_cap)
            .into_iter()
            .map(|i| membership[i])
            .collect()
    } else {
        membership
    };

    let mut sum = 0.0f64;
    for &(row, own) in &sampled {
        let own_rows = &session_rows_list[own];
        if own_rows.len() < 2 {
            // Singleton contributes 0.
            continue;
        }

        let a = mean_distance(ctx.matrix, row, own_rows, true);
        let mut b = f32::MAX;
        for (other, other_rows) in session_rows_list.iter().enumerate() {
            if other == own || other_rows.is_empty() {
                continue;
            }
            b = b.min(mean_distance(ctx.matrix, row, other_rows, false));
        }
        if b == f32::MAX {
            continue;
        }

        let denom = a.max(b);
        if denom > 0.0 {
            sum += ((b - a) / denom) as f64;
        }
    }

    ((sum / sampled.len() as f64) as f32, sampled.len())
}

/// Mean cosine distance from `row` to the rows of one session,
/// excluding `row` itself when it belongs to that session.
fn mean_distance(
    matrix: &EmbeddingMatrix,
    row: usize,
    session_rows: &[usize],
    exclude_self: bool,
) -> f32 {
    let mut sum = 0.0f32;
    let mut count = 0usize;
    for &other in session_rows {
        if exclude_self && other == row {
            continue;
        }
        sum += matrix.cosine_distance(row, other);
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// URL prefix used by the purity metric: the first
/// [`PURITY_PREFIX_SEGMENTS`] path segments, normalized.
pub fn url_prefix(path: &str) -> String {
    let segments: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .take(PURITY_PREFIX_SEGMENTS)
        .collect();
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingBackend, TfidfBackend};
    use crate::types::{BotCategory, Provider, RefinementOrigin, Request};
    use chrono::{TimeZone, Utc};

    fn request(ms: i64, path: &str, n: u64) -> Request {
        Request {
            id: Uuid::from_u64_pair(0, n),
            timestamp: Utc.timestamp_millis_opt(ms).unwrap(),
            client_ip: "203.0.113.7".to_string(),
            method: "GET".to_string(),
            host: "example.com".to_string(),
            path: path.to_string(),
            status_code: 200,
            user_agent: "ChatGPT-User/1.0".to_string(),
            provider: Provider::from("OpenAI"),
            bot_category: BotCategory::UserRequest,
            query_string: None,
            response_bytes: None,
            request_bytes: None,
            response_time_ms: None,
            cache_status: None,
            edge_location: None,
            referer: None,
            protocol: None,
            ssl_protocol: None,
        }
    }

    fn build_context(
        requests: &[Request],
    ) -> (EmbeddingMatrix, HashMap<Uuid, usize>, Vec<String>) {
        let docs: Vec<Vec<String>> = requests
            .iter()
            .map(|r| {
                crate::tokenize::raw_tokens(&r.host, &r.path, r.query_string.as_deref())
            })
            .collect();
        let matrix = TfidfBackend::new().embed(&docs).unwrap();
        let row_of: HashMap<Uuid, usize> =
            requests.iter().enumerate().map(|(i, r)| (r.id, i)).collect();
        let prefixes: Vec<String> = requests.iter().map(|r| url_prefix(&r.path)).collect();
        (matrix, row_of, prefixes)
    }

    fn session_of(requests: &[Request], ids: &[u64], seq: usize) -> Session {
        let members: Vec<&Request> = ids
            .iter()
            .map(|&n| {
                requests
                    .iter()
                    .find(|r| r.id == Uuid::from_u64_pair(0, n))
                    .unwrap()
            })
            .collect();
        Session {
            session_id: format!("OpenAI:{}:{seq}", members[0].timestamp_ms()),
            provider: Provider::from("OpenAI"),
            start_ts: members[0].timestamp,
            end_ts: members[members.len() - 1].timestamp,
            request_ids: members.iter().map(|r| r.id).collect(),
            window_used: 100,
            refinement_origin: Some(RefinementOrigin::Initial),
            mibcs: None,
            confidence: None,
            flags: vec![],
        }
    }

    #[test]
    fn url_prefix_takes_first_two_segments() {
        assert_eq!(url_prefix("/api/weather/forecast/tokyo"), "/api/weather");
        assert_eq!(url_prefix("/api"), "/api");
        assert_eq!(url_prefix("/"), "/");
    }

    #[test]
    fn profile_undefined_for_singletons() {
        let requests = vec![request(0, "/api/weather", 0)];
        let (matrix, row_of, _) = build_context(&requests);
        let mut rng = crate::sampling::rng_for(42, 100, 0, 0);
        let rows = vec![row_of[&requests[0].id]];
        assert!(similarity_profile(&matrix, &rows, 200, &mut rng).is_none());
    }

    #[test]
    fn profile_bounds_hold() {
        let requests = vec![
            request(0, "/api/weather/tokyo", 0),
            request(1, "/api/weather/paris", 1),
            request(2, "/api/stocks/aapl", 2),
        ];
        let (matrix, row_of, _) = build_context(&requests);
        let mut rng = crate::sampling::rng_for(42, 100, 0, 0);
        let rows: Vec<usize> = requests.iter().map(|r| row_of[&r.id]).collect();
        let profile = similarity_profile(&matrix, &rows, 200, &mut rng).unwrap();
        assert_eq!(profile.pair_count, 3);
        assert_eq!(profile.usable_rows, 3);
        assert!(profile.min <= profile.mean && profile.mean <= profile.max);
        assert!((-1.0..=1.0).contains(&profile.mean));
        assert!(profile.std >= 0.0);
    }

    #[test]
    fn annotation_sets_mibcs_confidence_and_flags() {
        let requests: Vec<Request> = (0..3)
            .map(|i| request(i as i64, "/api/weather/tokyo", i))
            .collect();
        let (matrix, row_of, prefixes) = build_context(&requests);
        let ctx = MetricsContext {
            matrix: &matrix,
            row_of: &row_of,
            prefixes: &prefixes,
        };
        let mut sessions = vec![session_of(&requests, &[0, 1, 2], 0)];
        let config = OptimizerConfig::default();
        annotate_sessions(&mut sessions, &ctx, &config, 0);

        // Identical URLs: MIBCS 1.0, high confidence.
        let mibcs = sessions[0].mibcs.unwrap();
        assert!((mibcs - 1.0).abs() < 1e-5);
        assert_eq!(sessions[0].confidence, Some(ConfidenceLevel::High));
        assert!(!sessions[0].has_flag(SessionFlag::Singleton));
    }

    #[test]
    fn giant_flag_uses_threshold() {
        let requests: Vec<Request> = (0..5)
            .map(|i| request(i as i64, "/api/weather", i))
            .collect();
        let (matrix, row_of, prefixes) = build_context(&requests);
        let ctx = MetricsContext {
            matrix: &matrix,
            row_of: &row_of,
            prefixes: &prefixes,
        };
        let mut sessions = vec![session_of(&requests, &[0, 1, 2, 3, 4], 0)];
        let config = OptimizerConfig {
            giant_threshold: 4,
            ..Default::default()
        };
        annotate_sessions(&mut sessions, &ctx, &config, 0);
        assert!(sessions[0].has_flag(SessionFlag::Giant));
    }

    #[test]
    fn metrics_on_two_clean_themes() {
        let requests = vec![
            request(0, "/api/weather/forecast/tokyo", 0),
            request(1, "/api/weather/forecast/paris", 1),
            request(2, "/api/weather/forecast/london", 2),
            request(1000, "/api/stocks/quote/aapl", 3),
            request(1001, "/api/stocks/quote/msft", 4),
            request(1002, "/api/stocks/quote/googl", 5),
        ];
        let (matrix, row_of, prefixes) = build_context(&requests);
        let ctx = MetricsContext {
            matrix: &matrix,
            row_of: &row_of,
            prefixes: &prefixes,
        };
        let mut sessions = vec![
            session_of(&requests, &[0, 1, 2], 0),
            session_of(&requests, &[3, 4, 5], 1),
        ];
        let config = OptimizerConfig::default();
        annotate_sessions(&mut sessions, &ctx, &config, 0);
        let summary = compute_metrics(&sessions, &ctx, &config, 100, 0);

        assert_eq!(summary.session_count, 2);
        assert_eq!(summary.request_count, 6);
        assert_eq!(summary.mibcs_support, 2);
        assert_eq!(summary.singleton_rate, 0.0);
        assert_eq!(summary.giant_rate, 0.0);
        // Each session is prefix-homogeneous.
        assert_eq!(summary.bps, 1.0);
        // Well-separated themes: positive silhouette.
        assert!(summary.silhouette > 0.0, "got {}", summary.silhouette);
        assert_eq!(summary.silhouette_support, 6);
        assert!((-1.0..=1.0).contains(&summary.mibcs));
        assert!(summary.thematic_variance >= 0.0);
        assert_eq!(summary.mean_size, 3.0);
        assert_eq!(summary.median_size, 3.0);
    }

    #[test]
    fn singleton_sessions_contribute_zero_to_silhouette_and_variance() {
        let requests = vec![
            request(0, "/api/weather/tokyo", 0),
            request(5000, "/api/stocks/aapl", 1),
        ];
        let (matrix, row_of, prefixes) = build_context(&requests);
        let ctx = MetricsContext {
            matrix: &matrix,
            row_of: &row_of,
            prefixes: &prefixes,
        };
        let mut sessions = vec![
            session_of(&requests, &[0], 0),
            session_of(&requests, &[1], 1),
        ];
        let config = OptimizerConfig::default();
        annotate_sessions(&mut sessions, &ctx, &config, 0);
        let summary = compute_metrics(&sessions, &ctx, &config, 100, 0);

        assert_eq!(summary.singleton_rate, 1.0);
        assert_eq!(summary.silhouette, 0.0);
        assert_eq!(summary.thematic_variance, 0.0);
        assert_eq!(summary.mibcs_support, 0);
        // Singletons are trivially prefix-dominated.
        assert_eq!(summary.bps, 1.0);
    }

    #[test]
    fn giant_session_profile_is_sampled_and_deterministic() {
        let requests: Vec<Request> = (0..300)
            .map(|i| request(i as i64, "/api/weather/forecast", i as u64))
            .collect();
        let (matrix, row_of, _) = build_context(&requests);
        let rows: Vec<usize> = requests.iter().map(|r| row_of[&r.id]).collect();

        let mut rng_a = crate::sampling::rng_for(42, 100, 0, 7);
        let mut rng_b = crate::sampling::rng_for(42, 100, 0, 7);
        let a = similarity_profile(&matrix, &rows, 200, &mut rng_a).unwrap();
        let b = similarity_profile(&matrix, &rows, 200, &mut rng_b).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.pair_count, 200 * 199 / 2);
        assert_eq!(a.usable_rows, 300);
    }
}
