//! Inter-request delta statistics and candidate-window discovery.
//!
//! Consecutive-gap distributions are the empirical basis for choosing
//! candidate windows: the production datasets showed burst gaps with a
//! 9 ms mode and a long idle tail, which is what makes gap-threshold
//! bundling work at all. This module summarizes the distribution per
//! provider and proposes candidate thresholds at configurable percentiles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Request;

/// Percentiles reported by [`DeltaStats`].
pub const REPORTED_PERCENTILES: [u8; 5] = [50, 75, 90, 95, 99];

/// Default percentiles proposed as candidate windows.
pub const DEFAULT_CANDIDATE_PERCENTILES: [u8; 4] = [75, 90, 95, 99];

/// Summary statistics for inter-request time deltas, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaStats {
    /// Number of gaps (one less than requests per partition).
    pub count: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub std_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// Keyed `p50`, `p75`, `p90`, `p95`, `p99`.
    pub percentiles: BTreeMap<String, f64>,
}

impl DeltaStats {
    fn empty() -> Self {
        Self {
            count: 0,
            mean_ms: 0.0,
            median_ms: 0.0,
            std_ms: 0.0,
            min_ms: 0.0,
            max_ms: 0.0,
            percentiles: BTreeMap::new(),
        }
    }

    /// Summarize a list of gap values.
    pub fn from_deltas(deltas: &[f64]) -> Self {
        if deltas.is_empty() {
            return Self::empty();
        }

        let mut sorted = deltas.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("gap values are finite"));

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let variance = sorted.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / count as f64;

        let mut percentiles = BTreeMap::new();
        for p in REPORTED_PERCENTILES {
            percentiles.insert(format!("p{p}"), percentile(&sorted, p as f64));
        }

        Self {
            count,
            mean_ms: mean,
            median_ms: percentile(&sorted, 50.0),
            std_ms: variance.sqrt(),
            min_ms: sorted[0],
            max_ms: sorted[count - 1],
            percentiles,
        }
    }
}

/// Consecutive gaps within each provider partition, in ms.
///
/// The first request of each partition produces no gap. Input is sorted
/// internally; the caller's order does not matter.
pub fn provider_deltas(requests: &[Request]) -> BTreeMap<String, Vec<f64>> {
    let mut partitions: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for request in requests {
        partitions
            .entry(request.provider.to_string())
            .or_default()
            .push(request.timestamp_ms());
    }

    partitions
        .into_iter()
        .map(|(provider, mut timestamps)| {
            timestamps.sort_unstable();
            let deltas = timestamps
                .windows(2)
                .map(|w| (w[1] - w[0]) as f64)
                .collect();
            (provider, deltas)
        })
        .collect()
}

/// Delta statistics per provider plus an `all` entry over the combined
/// gap population.
pub fn delta_stats(requests: &[Request]) -> BTreeMap<String, DeltaStats> {
    let per_provider = provider_deltas(requests);
    let mut all: Vec<f64> = Vec::new();
    let mut stats: BTreeMap<String, DeltaStats> = per_provider
        .into_iter()
        .map(|(provider, deltas)| {
            all.extend_from_slice(&deltas);
            (provider, DeltaStats::from_deltas(&deltas))
        })
        .collect();
    stats.insert("all".to_string(), DeltaStats::from_deltas(&all));
    stats
}

/// Propose candidate gap thresholds at the given percentiles of the
/// combined delta distribution. Purely informational; the optimizer still
/// sweeps its configured candidate set.
pub fn discover_candidates(requests: &[Request], percentiles_wanted: &[u8]) -> Vec<f64> {
    let mut all: Vec<f64> = provider_deltas(requests).into_values().flatten().collect();
    if all.is_empty() {
        return Vec::new();
    }
    all.sort_by(|a, b| a.partial_cmp(b).expect("gap values are finite"));
    percentiles_wanted
        .iter()
        .map(|&p| percentile(&all, p as f64))
        .collect()
}

/// Linear-interpolation percentile over sorted data (the convention the
/// experiment tooling used).
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BotCategory, Provider};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn request(provider: &str, ms: i64, n: u64) -> Request {
        Request {
            id: Uuid::from_u64_pair(0, n),
            timestamp: Utc.timestamp_millis_opt(ms).unwrap(),
            client_ip: "203.0.113.7".to_string(),
            method: "GET".to_string(),
            host: "example.com".to_string(),
            path: "/page".to_string(),
            status_code: 200,
            user_agent: "ChatGPT-User/1.0".to_string(),
            provider: Provider::from(provider),
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

    #[test]
    fn deltas_computed_within_provider_only() {
        let requests = vec![
            request("OpenAI", 0, 0),
            request("Anthropic", 5, 1),
            request("OpenAI", 10, 2),
            request("Anthropic", 25, 3),
        ];
        let deltas = provider_deltas(&requests);
        assert_eq!(deltas["OpenAI"], vec![10.0]);
        assert_eq!(deltas["Anthropic"], vec![20.0]);
    }

    #[test]
    fn stats_summary_values() {
        let stats = DeltaStats::from_deltas(&[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(stats.count, 4);
        assert!((stats.mean_ms - 25.0).abs() < 1e-9);
        assert!((stats.median_ms - 25.0).abs() < 1e-9);
        assert_eq!(stats.min_ms, 10.0);
        assert_eq!(stats.max_ms, 40.0);
        // Population std of [10,20,30,40] = sqrt(125).
        assert!((stats.std_ms - 125.0f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn empty_partition_yields_zeroed_summary() {
        let stats = DeltaStats::from_deltas(&[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean_ms, 0.0);
        assert!(stats.percentiles.is_empty());
    }

    #[test]
    fn percentile_linear_interpolation() {
        let sorted = [0.0, 10.0, 20.0, 30.0];
        assert_eq!(percentile(&sorted, 0.0), 0.0);
        assert_eq!(percentile(&sorted, 100.0), 30.0);
        assert!((percentile(&sorted, 50.0) - 15.0).abs() < 1e-9);
        assert!((percentile(&sorted, 75.0) - 22.5).abs() < 1e-9);
    }

    #[test]
    fn combined_stats_include_all_entry() {
        let requests = vec![
            request("OpenAI", 0, 0),
            request("OpenAI", 10, 1),
            request("Anthropic", 0, 2),
            request("Anthropic", 30, 3),
        ];
        let stats = delta_stats(&requests);
        assert_eq!(stats["all"].count, 2);
        assert!((stats["all"].mean_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn discovered_candidates_are_nondecreasing() {
        let requests: Vec<Request> = (0..50)
            .map(|i| request("OpenAI", (i * i) as i64, i as u64))
            .collect();
        let candidates = discover_candidates(&requests, &DEFAULT_CANDIDATE_PERCENTILES);
        assert_eq!(candidates.len(), 4);
        for pair in candidates.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }
}
