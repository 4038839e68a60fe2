use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ResolverError {
    #[error("failed to load data from {path}: {message}")]
    #[diagnostic(help("check that the reference/index files exist and have a header row"))]
    DataLoad { path: PathBuf, message: String },

    #[error("transient resolution failure for {id}: {message}")]
    TransientResolution { id: String, message: String },

    #[error("structure not found: {0}")]
    NotFound(String),

    #[error("failed to write output {path}: {message}")]
    OutputWrite { path: PathBuf, message: String },

    #[error("malformed record at line {line}: {reason}")]
    MalformedRecord { line: u64, reason: String },

    #[error("invalid structure id: {0}")]
    InvalidStructureId(String),

    #[error("invalid entry id: {0}")]
    InvalidEntryId(String),

    #[error("invalid line filter: {0}")]
    InvalidLineFilter(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("RCSB request failed: {0}")]
    RcsbHttp(String),

    #[error("RCSB returned status {status}: {message}")]
    RcsbStatus { status: u16, message: String },
}

impl ResolverError {
    pub fn data_load(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        ResolverError::DataLoad {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn output_write(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        ResolverError::OutputWrite {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ResolverError::TransientResolution { .. })
    }
}
