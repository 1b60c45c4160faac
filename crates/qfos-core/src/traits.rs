//! Collaborator traits: request sources and session sinks.
//!
//! The engine is format-agnostic. Storage and ingestion live behind these
//! two traits; the engine only requires a finite record stream in and a
//! transactional batch write out.

use crate::error::Result;
use crate::report::OptimizationReport;
use crate::types::{Request, Session};

/// Yields normalized request records in arbitrary order.
///
/// The stream must be finite; `Ok(None)` signals end-of-stream. The
/// engine partitions and sorts internally, so producers need no ordering
/// guarantee. Bounded pagination (`max_records`) keeps memory-limited
/// runs feasible.
pub trait RequestSource {
    /// Next batch of at most `max_records` records, or `None` at end of
    /// stream.
    fn next_batch(&mut self, max_records: usize) -> Result<Option<Vec<Request>>>;
}

/// Accepts emitted sessions and the final report.
///
/// Batch writes are all-or-nothing: a sink must not persist part of a
/// batch. Session ids within a run are duplicate-free.
pub trait SessionSink {
    /// Write one transactional batch of session rows.
    fn write_sessions(&mut self, sessions: &[Session]) -> Result<()>;

    /// Write the final optimization report.
    fn write_report(&mut self, report: &OptimizationReport) -> Result<()>;
}
