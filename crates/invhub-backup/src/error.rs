//! Error type for the backup engine.
//!
//! Every failure is returned to the caller; nothing in this crate retries.
//! `BackupError` maps onto `invhub_core::error::AppError` so that the API
//! and CLI can render it without knowing the engine's internals.

use std::path::PathBuf;

use invhub_core::error::{AppError, ErrorKind};
use thiserror::Error;

/// Failures of snapshot creation, listing, verification, restore, and deletion.
#[derive(Debug, Error)]
pub enum BackupError {
    /// The live datastore file could not be read.
    #[error("Datastore '{path}' is unavailable: {source}")]
    SourceUnavailable {
        /// Datastore path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The Archive Store could not be written (disk full, permissions, ...).
    #[error("Failed to write '{path}': {source}")]
    StorageWriteFailed {
        /// Path that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The staged copy could not be compressed into an archive.
    #[error("Failed to compress snapshot '{name}': {source}")]
    CompressionFailed {
        /// Snapshot name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No archive exists for the given snapshot name.
    #[error("Snapshot '{name}' not found")]
    SnapshotNotFound {
        /// Snapshot name.
        name: String,
    },

    /// A snapshot with this name already exists or is being written.
    #[error("Snapshot '{name}' already exists")]
    SnapshotExists {
        /// Snapshot name.
        name: String,
    },

    /// The name is not a valid snapshot identifier.
    #[error("Invalid snapshot name '{name}'")]
    InvalidName {
        /// Rejected name.
        name: String,
    },

    /// The archive digest does not match its checksum sidecar.
    #[error("Checksum mismatch for snapshot '{name}': expected {expected}, computed {actual}")]
    ChecksumMismatch {
        /// Snapshot name.
        name: String,
        /// Digest recorded in the sidecar.
        expected: String,
        /// Digest recomputed from the archive.
        actual: String,
    },

    /// The snapshot has no checksum sidecar and unverified restores are disabled.
    #[error("Snapshot '{name}' has no checksum on file and unverified restores are disabled")]
    UnverifiedSnapshot {
        /// Snapshot name.
        name: String,
    },

    /// The archive could not be expanded, or expanded to unexpected content.
    #[error("Failed to decompress snapshot '{name}': {reason}")]
    DecompressionFailed {
        /// Snapshot name.
        name: String,
        /// Description of the failure.
        reason: String,
    },

    /// Decompression exceeded the configured restore timeout.
    #[error("Restore of '{name}' timed out after {seconds}s; the datastore was not modified")]
    RestoreTimedOut {
        /// Snapshot name.
        name: String,
        /// Configured limit in seconds.
        seconds: u64,
    },

    /// Replacing the live datastore failed; its state must be checked by hand.
    #[error("Swap of datastore '{path}' failed, datastore state is uncertain: {source}")]
    SwapFailed {
        /// Live datastore path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Generic I/O error on an Archive Store path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Metadata sidecar could not be serialized.
    #[error("Metadata serialization error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// A blocking task panicked or was cancelled.
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl BackupError {
    /// Build an [`BackupError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Build a [`BackupError::StorageWriteFailed`] for `path`.
    pub fn write_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StorageWriteFailed {
            path: path.into(),
            source,
        }
    }

    /// Whether this error leaves the live datastore in an uncertain state.
    pub fn is_swap_failure(&self) -> bool {
        matches!(self, Self::SwapFailed { .. })
    }
}

impl From<BackupError> for AppError {
    fn from(err: BackupError) -> Self {
        let kind = match &err {
            BackupError::SnapshotNotFound { .. } => ErrorKind::NotFound,
            BackupError::SnapshotExists { .. } => ErrorKind::Conflict,
            BackupError::InvalidName { .. } => ErrorKind::Validation,
            BackupError::ChecksumMismatch { .. }
            | BackupError::UnverifiedSnapshot { .. }
            | BackupError::DecompressionFailed { .. } => ErrorKind::Integrity,
            BackupError::RestoreTimedOut { .. } => ErrorKind::ServiceUnavailable,
            BackupError::SourceUnavailable { .. }
            | BackupError::StorageWriteFailed { .. }
            | BackupError::CompressionFailed { .. }
            | BackupError::Io { .. } => ErrorKind::Storage,
            BackupError::Metadata(_) => ErrorKind::Serialization,
            BackupError::SwapFailed { .. } | BackupError::Join(_) => ErrorKind::Internal,
        };
        let message = err.to_string();
        AppError::with_source(kind, message, err)
    }
}
