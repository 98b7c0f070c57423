//! Backup engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Archive Store and live datastore configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory holding snapshot archives and their sidecars.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: String,
    /// Path of the live datastore file.
    #[serde(default = "default_datastore_path")]
    pub datastore_path: String,
    /// Prefix for generated snapshot names.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Extension of the payload inside the archive name (`<name>.<ext>.gz`).
    #[serde(default = "default_archive_extension")]
    pub archive_extension: String,
    /// Gzip compression level (0-9).
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    /// Allow restoring snapshots that have no checksum sidecar.
    #[serde(default = "default_true")]
    pub allow_unverified_restore: bool,
    /// Snapshot the live datastore before it is replaced by a restore.
    #[serde(default = "default_true")]
    pub pre_restore_snapshot: bool,
    /// Upper bound for the decompression phase of a restore (0 = unbounded).
    #[serde(default = "default_restore_timeout")]
    pub restore_timeout_seconds: u64,
}

impl BackupConfig {
    /// Archive Store directory as a path.
    pub fn archive_dir(&self) -> PathBuf {
        PathBuf::from(&self.archive_dir)
    }

    /// Live datastore file as a path.
    pub fn datastore_path(&self) -> PathBuf {
        PathBuf::from(&self.datastore_path)
    }

    /// Restore decompression timeout, if one is configured.
    pub fn restore_timeout(&self) -> Option<Duration> {
        (self.restore_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.restore_timeout_seconds))
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            archive_dir: default_archive_dir(),
            datastore_path: default_datastore_path(),
            name_prefix: default_name_prefix(),
            archive_extension: default_archive_extension(),
            compression_level: default_compression_level(),
            allow_unverified_restore: true,
            pre_restore_snapshot: true,
            restore_timeout_seconds: default_restore_timeout(),
        }
    }
}

fn default_archive_dir() -> String {
    "./data/backups".to_string()
}

fn default_datastore_path() -> String {
    "./data/inventory.db".to_string()
}

fn default_name_prefix() -> String {
    "inventory".to_string()
}

fn default_archive_extension() -> String {
    "db".to_string()
}

fn default_compression_level() -> u32 {
    6
}

fn default_true() -> bool {
    true
}

fn default_restore_timeout() -> u64 {
    600
}
