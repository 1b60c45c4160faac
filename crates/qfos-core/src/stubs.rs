//! In-memory source and sink implementations.
//!
//! Used by the test suites and by callers embedding the engine without a
//! storage collaborator.

use crate::error::Result;
use crate::report::OptimizationReport;
use crate::traits::{RequestSource, SessionSink};
use crate::types::{Request, Session};

/// Request source over an owned vector, paginated.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRequestSource {
    requests: Vec<Request>,
    cursor: usize,
}

impl InMemoryRequestSource {
    pub fn new(requests: Vec<Request>) -> Self {
        Self {
            requests,
            cursor: 0,
        }
    }
}

impl RequestSource for InMemoryRequestSource {
    fn next_batch(&mut self, max_records: usize) -> Result<Option<Vec<Request>>> {
        if self.cursor >= self.requests.len() {
            return Ok(None);
        }
        let end = (self.cursor + max_records).min(self.requests.len());
        let batch = self.requests[self.cursor..end].to_vec();
        self.cursor = end;
        Ok(Some(batch))
    }
}

/// Sink collecting sessions and the report in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionSink {
    sessions: Vec<Session>,
    report: Option<OptimizationReport>,
}

impl InMemorySessionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn report(&self) -> Option<&OptimizationReport> {
        self.report.as_ref()
    }
}

impl SessionSink for InMemorySessionSink {
    fn write_sessions(&mut self, sessions: &[Session]) -> Result<()> {
        self.sessions.extend_from_slice(sessions);
        Ok(())
    }

    fn write_report(&mut self, report: &OptimizationReport) -> Result<()> {
        self.report = Some(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BotCategory, Provider};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn request(n: u64) -> Request {
        Request {
            id: Uuid::from_u64_pair(0, n),
            timestamp: Utc.timestamp_millis_opt(n as i64).unwrap(),
            client_ip: "203.0.113.7".to_string(),
            method: "GET".to_string(),
            host: "example.com".to_string(),
            path: "/page".to_string(),
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

    #[test]
    fn source_paginates_and_signals_end() {
        let mut source = InMemoryRequestSource::new((0..5).map(request).collect());
        let first = source.next_batch(2).unwrap().unwrap();
        assert_eq!(first.len(), 2);
        let second = source.next_batch(2).unwrap().unwrap();
        assert_eq!(second.len(), 2);
        let third = source.next_batch(2).unwrap().unwrap();
        assert_eq!(third.len(), 1);
        assert!(source.next_batch(2).unwrap().is_none());
    }

    #[test]
    fn empty_source_signals_end_immediately() {
        let mut source = InMemoryRequestSource::new(Vec::new());
        assert!(source.next_batch(100).unwrap().is_none());
    }
}
