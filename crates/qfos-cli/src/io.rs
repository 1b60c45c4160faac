//! File-backed source and sink: NDJSON requests in, NDJSON sessions and a
//! JSON report out.
//!
//! Input records that carry no provider label are classified from their
//! user agent. Request ids derive from the line number, so re-reading the
//! same file yields the same ids and the engine's determinism guarantee
//! extends across process runs.
//!
//! The sink stages each batch in a temporary file and renames it into
//! place, which is the all-or-nothing write the engine contract asks for.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use qfos_core::classify::classify_user_agent;
use qfos_core::error::{EngineError, Result};
use qfos_core::report::OptimizationReport;
use qfos_core::traits::{RequestSource, SessionSink};
use qfos_core::types::{BotCategory, Provider, Request, Session};

use crate::error::{CliError, CliResult};

/// One NDJSON input line. Provider and category are optional; absent
/// values derive from the user agent.
#[derive(Debug, Deserialize)]
struct RawRecord {
    timestamp: DateTime<Utc>,
    host: String,
    path: String,
    user_agent: String,
    #[serde(default)]
    client_ip: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    bot_category: Option<BotCategory>,
    #[serde(default)]
    query_string: Option<String>,
    #[serde(default)]
    response_bytes: Option<u64>,
    #[serde(default)]
    request_bytes: Option<u64>,
    #[serde(default)]
    response_time_ms: Option<u32>,
    #[serde(default)]
    cache_status: Option<String>,
    #[serde(default)]
    edge_location: Option<String>,
    #[serde(default)]
    referer: Option<String>,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    ssl_protocol: Option<String>,
}

impl RawRecord {
    fn into_request(self, line: usize) -> Request {
        let (derived_provider, derived_category) = classify_user_agent(&self.user_agent);
        Request {
            id: Uuid::from_u64_pair(0x714f_5f71_666f_7300, line as u64),
            timestamp: self.timestamp,
            client_ip: self.client_ip.unwrap_or_default(),
            method: self.method.unwrap_or_else(|| "GET".to_string()),
            host: self.host,
            path: self.path,
            status_code: self.status_code.unwrap_or(200),
            user_agent: self.user_agent,
            provider: self.provider.map(Provider::new).unwrap_or(derived_provider),
            bot_category: self.bot_category.unwrap_or(derived_category),
            query_string: self.query_string,
            response_bytes: self.response_bytes,
            request_bytes: self.request_bytes,
            response_time_ms: self.response_time_ms,
            cache_status: self.cache_status,
            edge_location: self.edge_location,
            referer: self.referer,
            protocol: self.protocol,
            ssl_protocol: self.ssl_protocol,
        }
    }
}

/// Read a whole NDJSON request file. Blank lines are skipped.
pub fn read_requests(path: &Path) -> CliResult<Vec<Request>> {
    let file = File::open(path).map_err(|e| CliError::io(path.display().to_string(), e))?;
    let reader = BufReader::new(file);

    let mut requests = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| CliError::io(path.display().to_string(), e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: RawRecord =
            serde_json::from_str(&line).map_err(|e| CliError::Parse {
                path: path.display().to_string(),
                line: index + 1,
                message: e.to_string(),
            })?;
        requests.push(record.into_request(index + 1));
    }
    tracing::info!(path = %path.display(), records = requests.len(), "loaded request file");
    Ok(requests)
}

/// Request source over a pre-loaded NDJSON file.
pub struct NdjsonRequestSource {
    requests: Vec<Request>,
    cursor: usize,
}

impl NdjsonRequestSource {
    pub fn open(path: &Path) -> CliResult<Self> {
        Ok(Self {
            requests: read_requests(path)?,
            cursor: 0,
        })
    }
}

impl RequestSource for NdjsonRequestSource {
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

/// Sink writing sessions as NDJSON and the report as pretty JSON.
pub struct FileSessionSink {
    sessions_path: PathBuf,
    report_path: PathBuf,
}

impl FileSessionSink {
    pub fn new(sessions_path: PathBuf, report_path: PathBuf) -> Self {
        Self {
            sessions_path,
            report_path,
        }
    }

    fn atomic_write(path: &Path, body: impl FnOnce(&mut BufWriter<File>) -> CliResult<()>) -> Result<()> {
        let staged = path.with_extension("tmp");
        let write = || -> CliResult<()> {
            let file = File::create(&staged)
                .map_err(|e| CliError::io(staged.display().to_string(), e))?;
            let mut writer = BufWriter::new(file);
            body(&mut writer)?;
            writer
                .flush()
                .map_err(|e| CliError::io(staged.display().to_string(), e))?;
            std::fs::rename(&staged, path)
                .map_err(|e| CliError::io(path.display().to_string(), e))?;
            Ok(())
        };
        write().map_err(|e| {
            let _ = std::fs::remove_file(&staged);
            EngineError::Sink(e.to_string())
        })
    }
}

impl SessionSink for FileSessionSink {
    fn write_sessions(&mut self, sessions: &[Session]) -> Result<()> {
        Self::atomic_write(&self.sessions_path, |writer| {
            for session in sessions {
                serde_json::to_writer(&mut *writer, session)?;
                writer
                    .write_all(b"\n")
                    .map_err(|e| CliError::io("sessions".to_string(), e))?;
            }
            Ok(())
        })?;
        tracing::info!(
            path = %self.sessions_path.display(),
            sessions = sessions.len(),
            "wrote session batch"
        );
        Ok(())
    }

    fn write_report(&mut self, report: &OptimizationReport) -> Result<()> {
        Self::atomic_write(&self.report_path, |writer| {
            serde_json::to_writer_pretty(&mut *writer, report)?;
            writer
                .write_all(b"\n")
                .map_err(|e| CliError::io("report".to_string(), e))?;
            Ok(())
        })?;
        tracing::info!(path = %self.report_path.display(), "wrote report");
        Ok(())
    }
}
