use thiserror::Error;

use crate::transfer::TransferKind;

pub type Result<T> = std::result::Result<T, S3napError>;

/// Boxed error returned by object store adapters.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum S3napError {
    #[error("malformed chunk key '{key}': {reason}")]
    MalformedKey { key: String, reason: &'static str },

    #[error(
        "invalid logical name '{0}': must be a non-empty relative path without ':', '.' or '..'"
    )]
    InvalidName(String),

    #[error("invalid chunk size {0}: must be at least one byte")]
    InvalidChunkSize(usize),

    #[error(
        "integrity check failed for '{key}' (chunk {index}): client md5 {actual} != store checksum {expected}"
    )]
    IntegrityMismatch {
        key: String,
        index: u64,
        expected: String,
        actual: String,
    },

    #[error("{kind} of '{key}' (chunk {index}) failed: {source}")]
    TransferFailed {
        kind: TransferKind,
        key: String,
        index: u64,
        #[source]
        source: BackendError,
    },

    #[error("{kind} of '{key}' was canceled")]
    TransferCanceled { kind: TransferKind, key: String },

    #[error("no chunks found for '{0}'")]
    NotFound(String),

    #[error("'{name}' is incomplete: chunk {index} is missing")]
    MissingChunk { name: String, index: u64 },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("object store {op} failed: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl S3napError {
    pub(crate) fn store(op: &'static str, source: BackendError) -> Self {
        S3napError::Store { op, source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, S3napError::NotFound(_))
    }
}
