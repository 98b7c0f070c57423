//! Snapshot identity, metadata sidecar, and catalog entry types.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BackupError;

/// Current metadata sidecar layout version.
pub const METADATA_FORMAT_VERSION: u32 = 1;

const MAX_NAME_LEN: usize = 128;

/// A validated snapshot name.
///
/// Names never contain path separators and never start with `.`, so they can
/// be joined onto the Archive Store directory without escaping it and never
/// collide with transient files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SnapshotName(String);

impl SnapshotName {
    /// Validate a caller-supplied name.
    pub fn parse(name: &str) -> Result<Self, BackupError> {
        let valid = !name.is_empty()
            && name.len() <= MAX_NAME_LEN
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(BackupError::InvalidName {
                name: name.to_string(),
            })
        }
    }

    /// Derive a name from a prefix and a timestamp with second precision,
    /// e.g. `inventory_2024-05-01T12-30-00`.
    pub fn generate(prefix: &str, at: DateTime<Utc>) -> Result<Self, BackupError> {
        Self::parse(&format!("{prefix}_{}", at.format("%Y-%m-%dT%H-%M-%S")))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SnapshotName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Contents of the `<name>.meta.json` sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Snapshot name.
    pub name: String,
    /// Creation time (RFC 3339).
    pub created_at: DateTime<Utc>,
    /// Size of the compressed archive in bytes.
    pub size_bytes: u64,
    /// Size of the datastore copy before compression.
    #[serde(default)]
    pub uncompressed_bytes: u64,
    /// Datastore path the snapshot was taken from.
    pub source_path: String,
    /// SHA-256 of the uncompressed datastore copy.
    #[serde(default)]
    pub source_sha256: Option<String>,
    /// Actor that requested the snapshot.
    pub created_by: String,
    /// Sidecar layout version.
    #[serde(default)]
    pub format_version: u32,
}

/// Integrity status shown in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    /// Not checked as part of this listing.
    Unverified,
    /// Archive digest matches its checksum sidecar.
    Verified,
    /// Archive digest does not match its checksum sidecar.
    Mismatch,
    /// No checksum sidecar exists.
    NoChecksum,
}

/// A catalog entry: one snapshot whose archive exists on disk.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Snapshot name.
    pub name: SnapshotName,
    /// Compressed archive location.
    #[serde(skip)]
    pub archive_path: PathBuf,
    /// Metadata sidecar location (may not exist).
    #[serde(skip)]
    pub metadata_path: PathBuf,
    /// Checksum sidecar location (may not exist).
    #[serde(skip)]
    pub checksum_path: PathBuf,
    /// Archive size in bytes, as found on disk.
    pub size_bytes: u64,
    /// Archive size for display, e.g. `1.50 MB`.
    pub size_human: String,
    /// Creation time from metadata, or the archive's modification time.
    pub created_at: DateTime<Utc>,
    /// Actor recorded in metadata.
    pub created_by: Option<String>,
    /// Whether a readable metadata sidecar was found.
    pub has_metadata: bool,
    /// Whether a checksum sidecar exists.
    pub has_checksum: bool,
    /// Integrity status placeholder, filled in by verification.
    pub integrity: IntegrityStatus,
}

/// Format a byte count for display.
pub fn human_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
