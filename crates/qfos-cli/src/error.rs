//! CLI error type and exit codes.
//!
//! Exit codes:
//! - 0: success
//! - 1: data or I/O failure
//! - 2: invalid configuration or arguments

use qfos_core::error::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in '{path}' line {line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CliError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Engine(e) if e.is_config() => 2,
            _ => 1,
        }
    }
}

pub type CliResult<T> = std::result::Result<T, CliError>;
