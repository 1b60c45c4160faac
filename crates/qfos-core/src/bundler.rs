//! Temporal bundling: partition-then-gap session grouping.
//!
//! Requests are partitioned by provider (cross-provider merging is
//! forbidden), ordered by timestamp, and grouped greedily: a request joins
//! the open session while its gap to the session's last member is within
//! the window `W`, otherwise the session is emitted and a new one starts.
//!
//! The gap is measured against the *last* member, not the session start,
//! so a sustained burst with small inter-request gaps stays one session
//! regardless of total duration.
//!
//! Emission order is deterministic: providers ascending, then session
//! start ascending. Requests with identical timestamps keep their input
//! order (the pre-sort is stable).

use std::collections::BTreeMap;

use crate::error::{EngineError, Result};
use crate::types::{Provider, RefinementOrigin, Request, Session, SessionFlag};

/// Streaming gap-based session grouper for a fixed window.
#[derive(Debug, Clone)]
pub struct TemporalBundler {
    window_ms: u64,
    presort: bool,
}

impl TemporalBundler {
    /// Bundler for the given gap threshold in milliseconds.
    ///
    /// `presort` enables the internal stable per-partition timestamp sort;
    /// when disabled, out-of-order input is a fatal
    /// [`EngineError::InputOrder`].
    pub fn new(window_ms: u64, presort: bool) -> Self {
        Self { window_ms, presort }
    }

    #[inline]
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Group requests into sessions.
    ///
    /// Runs in O(N) over sorted input per provider, O(N log N) when the
    /// pre-sort pass is needed.
    pub fn bundle(&self, requests: &[Request]) -> Result<Vec<Session>> {
        // BTreeMap orders partitions by provider for deterministic
        // emission.
        let mut partitions: BTreeMap<&Provider, Vec<(usize, &Request)>> = BTreeMap::new();
        for (row, request) in requests.iter().enumerate() {
            partitions
                .entry(&request.provider)
                .or_default()
                .push((row, request));
        }

        let mut sessions = Vec::new();
        for (provider, mut members) in partitions {
            if self.presort {
                members.sort_by_key(|&(_, r)| r.timestamp);
            } else if let Some(&(row, _)) = members
                .windows(2)
                .find(|w| w[1].1.timestamp < w[0].1.timestamp)
                .map(|w| &w[1])
            {
                return Err(EngineError::InputOrder {
                    provider: provider.to_string(),
                    row,
                });
            }

            self.bundle_partition(provider, &members, &mut sessions);
        }

        tracing::debug!(
            window_ms = self.window_ms,
            requests = requests.len(),
            sessions = sessions.len(),
            "temporal bundling complete"
        );
        Ok(sessions)
    }

    /// Emit sessions for one provider partition, already time-ordered.
    fn bundle_partition(
        &self,
        provider: &Provider,
        members: &[(usize, &Request)],
        sessions: &mut Vec<Session>,
    ) {
        let mut seq = 0usize;
        let mut buffer: Vec<&Request> = Vec::new();

        for &(_, request) in members {
            if let Some(last) = buffer.last() {
                let gap = request.timestamp_ms() - last.timestamp_ms();
                if gap > self.window_ms as i64 {
                    sessions.push(self.emit(provider, &buffer, seq));
                    seq += 1;
                    buffer.clear();
                }
            }
            buffer.push(request);
        }
        if !buffer.is_empty() {
            sessions.push(self.emit(provider, &buffer, seq));
        }
    }

    fn emit(&self, provider: &Provider, buffer: &[&Request], seq: usize) -> Session {
        let start = buffer[0].timestamp;
        let end = buffer[buffer.len() - 1].timestamp;
        let mut flags = Vec::new();
        if buffer.len() == 1 {
            flags.push(SessionFlag::Singleton);
        }
        Session {
            session_id: format!("{provider}:{}:{seq}", start.timestamp_millis()),
            provider: provider.clone(),
            start_ts: start,
            end_ts: end,
            request_ids: buffer.iter().map(|r| r.id).collect(),
            window_used: self.window_ms,
            refinement_origin: Some(RefinementOrigin::Initial),
            mibcs: None,
            confidence: None,
            flags,
        }
    }
}
