//! Core domain types: normalized requests and emitted sessions.
//!
//! The engine consumes immutable [`Request`] records and emits immutable
//! [`Session`] rows. No session is mutated after emission; refinement
//! deletes a parent and emits new child sessions instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// PROVIDER / CATEGORY
// ============================================================================

/// Coarse classifier of the user-agent string, e.g. `OpenAI`, `Anthropic`.
///
/// The engine treats the label opaquely: it is a hard partitioning key,
/// compared only for equality and membership in the exclusion set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Provider(String);

impl Provider {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Provider {
    fn from(label: &str) -> Self {
        Self(label.to_string())
    }
}

/// Bot traffic category derived at ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotCategory {
    /// Fetch issued on behalf of a live user query.
    UserRequest,
    /// Training or index crawler.
    Crawler,
    /// Anything else (search-engine bots, unknown agents).
    Other,
}

impl std::fmt::Display for BotCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserRequest => f.write_str("user_request"),
            Self::Crawler => f.write_str("crawler"),
            Self::Other => f.write_str("other"),
        }
    }
}

// ============================================================================
// REQUEST
// ============================================================================

/// Normalized, immutable input record.
///
/// `provider` and `timestamp` are the authoritative keys: every request
/// carries both, and the engine partitions by provider before bundling.
/// Optional fields are absent-or-present, never null sentinels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Stable identifier assigned by the source. Sources must assign ids
    /// deterministically for the engine's bit-identical-output guarantee
    /// to hold.
    pub id: Uuid,
    /// UTC instant, millisecond precision or better.
    pub timestamp: DateTime<Utc>,
    pub client_ip: String,
    pub method: String,
    pub host: String,
    pub path: String,
    pub status_code: u16,
    pub user_agent: String,
    /// Derived at ingest from the user agent.
    pub provider: Provider,
    /// Derived at ingest from the user agent.
    pub bot_category: BotCategory,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_protocol: Option<String>,
}

impl Request {
    /// Epoch milliseconds of the request timestamp.
    #[inline]
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// Origin of a session with respect to refinement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RefinementOrigin {
    /// Produced directly by the temporal bundler.
    Initial,
    /// Produced by splitting the named parent session.
    SplitFrom(String),
}

impl From<RefinementOrigin> for String {
    fn from(origin: RefinementOrigin) -> Self {
        match origin {
            RefinementOrigin::Initial => "initial".to_string(),
            RefinementOrigin::SplitFrom(parent) => format!("split_from:{parent}"),
        }
    }
}

impl TryFrom<String> for RefinementOrigin {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "initial" {
            Ok(Self::Initial)
        } else if let Some(parent) = value.strip_prefix("split_from:") {
            Ok(Self::SplitFrom(parent.to_string()))
        } else {
            Err(format!("invalid refinement origin: '{value}'"))
        }
    }
}

/// Flags attached to a session during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionFlag {
    /// Session of size 1.
    Singleton,
    /// Session larger than the configured giant threshold.
    Giant,
    /// Refinement candidate that could not be split.
    LowCoherence,
}

/// Per-session confidence in thematic coherence.
///
/// Thresholds follow the validated production values: `high` needs mean
/// pairwise cosine >= 0.7 and min >= 0.5, `medium` needs mean >= 0.5 and
/// min >= 0.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    /// Classify from a session's mean and min pairwise cosine.
    pub fn from_similarity(mean: f32, min: f32) -> Self {
        if mean >= 0.7 && min >= 0.5 {
            Self::High
        } else if mean >= 0.5 && min >= 0.3 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => f.write_str("high"),
            Self::Medium => f.write_str("medium"),
            Self::Low => f.write_str("low"),
        }
    }
}

/// A query fan-out session: temporally bundled, single-provider requests.
///
/// Sessions are produced by a single bundler pass; refinement may delete a
/// session and emit children whose `request_ids` partition the parent's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque id, stable within a run: `provider:start_ms:seq`.
    pub session_id: String,
    /// Shared by all members (invariant).
    pub provider: Provider,
    /// Timestamp of the first member.
    pub start_ts: DateTime<Utc>,
    /// Timestamp of the last member.
    pub end_ts: DateTime<Utc>,
    /// Ordered member request identifiers.
    pub request_ids: Vec<Uuid>,
    /// Gap threshold (ms) that produced this session.
    pub window_used: u64,
    /// None when refinement is disabled for the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refinement_origin: Option<RefinementOrigin>,
    /// Mean intra-bundle cosine similarity; None when fewer than two
    /// usable member embeddings exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mibcs: Option<f32>,
    /// Thematic-coherence confidence; None when mibcs is undefined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceLevel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<SessionFlag>,
}

impl Session {
    /// Number of member requests.
    #[inline]
    pub fn size(&self) -> usize {
        self.request_ids.len()
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        self.request_ids.len() == 1
    }

    /// Session duration in milliseconds.
    #[inline]
    pub fn duration_ms(&self) -> i64 {
        (self.end_ts - self.start_ts).num_milliseconds()
    }

    pub fn has_flag(&self, flag: SessionFlag) -> bool {
        self.flags.contains(&flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session_at(start_ms: i64, end_ms: i64, n: usize) -> Session {
        Session {
            session_id: format!("OpenAI:{start_ms}:0"),
            provider: Provider::from("OpenAI"),
            start_ts: Utc.timestamp_millis_opt(start_ms).unwrap(),
            end_ts: Utc.timestamp_millis_opt(end_ms).unwrap(),
            request_ids: (0..n as u64).map(|i| Uuid::from_u64_pair(0, i)).collect(),
            window_used: 100,
            refinement_origin: Some(RefinementOrigin::Initial),
            mibcs: None,
            confidence: None,
            flags: vec![],
        }
    }

    #[test]
    fn session_size_and_duration() {
        let s = session_at(1_000, 1_250, 4);
        assert_eq!(s.size(), 4);
        assert_eq!(s.duration_ms(), 250);
        assert!(!s.is_singleton());
    }

    #[test]
    fn refinement_origin_round_trips() {
        let initial = RefinementOrigin::Initial;
        let json = serde_json::to_string(&initial).unwrap();
        assert_eq!(json, "\"initial\"");

        let split = RefinementOrigin::SplitFrom("OpenAI:1000:0".to_string());
        let json = serde_json::to_string(&split).unwrap();
        assert_eq!(json, "\"split_from:OpenAI:1000:0\"");
        let back: RefinementOrigin = serde_json::from_str(&json).unwrap();
        assert_eq!(back, split);
    }

    #[test]
    fn refinement_origin_rejects_garbage() {
        let result: Result<RefinementOrigin, _> = serde_json::from_str("\"merged\"");
        assert!(result.is_err());
    }

    #[test]
    fn confidence_thresholds() {
        assert_eq!(
            ConfidenceLevel::from_similarity(0.75, 0.55),
            ConfidenceLevel::High
        );
        assert_eq!(
            ConfidenceLevel::from_similarity(0.75, 0.45),
            ConfidenceLevel::Medium
        );
        assert_eq!(
            ConfidenceLevel::from_similarity(0.55, 0.35),
            ConfidenceLevel::Medium
        );
        assert_eq!(
            ConfidenceLevel::from_similarity(0.55, 0.25),
            ConfidenceLevel::Low
        );
        assert_eq!(
            ConfidenceLevel::from_similarity(0.2, 0.1),
            ConfidenceLevel::Low
        );
    }

    #[test]
    fn provider_is_opaque_label() {
        let a = Provider::from("OpenAI");
        let b = Provider::new("OpenAI");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "OpenAI");
    }
}
