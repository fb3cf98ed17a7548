use std::io;

use thiserror::Error;

use crate::models::ComponentId;

#[derive(Error, Debug)]
pub enum PatchOpsError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("Checksum mismatch for {label}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        label: String,
        expected: String,
        actual: String,
    },
    #[error("Content rejected: {0}")]
    ContentRejected(String),
    #[error("Another operation is already running for {0}")]
    Busy(ComponentId),
    #[error("{0} cannot be installed alongside {1}")]
    Conflict(ComponentId, ComponentId),
    #[error("Refusing to delete protected file without a backup: {0}")]
    ProtectedFileWithoutBackup(String),
    #[error("Config unavailable: {0}")]
    ConfigUnavailable(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Archive error: {0}")]
    Archive(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Config error: {0}")]
    Config(String),
}

impl From<zip::result::ZipError> for PatchOpsError {
    fn from(err: zip::result::ZipError) -> Self {
        PatchOpsError::Archive(err.to_string())
    }
}

impl PatchOpsError {
    /// Terminal for the package: no further source or retry can help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PatchOpsError::ChecksumMismatch { .. } | PatchOpsError::ContentRejected(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PatchOpsError>;
