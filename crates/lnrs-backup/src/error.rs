use std::path::PathBuf;

use lnrs_store_sqlite::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backups are disabled in this environment; {operation} is unavailable")]
    Disabled { operation: &'static str },

    #[error("snapshot {0} not found")]
    NotFound(String),

    #[error("snapshot {snapshot_id} artifact missing at {}", path.display())]
    ArtifactMissing { snapshot_id: String, path: PathBuf },

    #[error("database file {} does not exist", .0.display())]
    DatabaseMissing(PathBuf),

    #[error("snapshot {snapshot_id} checksum mismatch: expected {expected}, found {actual}")]
    ChecksumMismatch { snapshot_id: String, expected: String, actual: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot metadata log {} is unreadable: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The live store was overwritten but failed verification. Restore
    /// `safety_snapshot_id` to get back the state from before the attempt.
    #[error(
        "restored snapshot {snapshot_id} failed verification ({reason}); \
         the previous state is kept in snapshot {safety_snapshot_id}"
    )]
    Verification { snapshot_id: String, safety_snapshot_id: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BackupError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}
