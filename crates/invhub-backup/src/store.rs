//! Archive Store: the directory holding snapshot archives and sidecars.
//!
//! Layout for a snapshot named `N` with payload extension `E`:
//!
//! ```text
//! N.E.gz        compressed archive
//! N.meta.json   metadata sidecar
//! N.sha256      checksum sidecar (`<hex>  N.E.gz`)
//! .N.staging    datastore copy while a snapshot is being built
//! .N.partial    archive while it is being compressed
//! .N.restore-<uuid>.tmp   decompressed payload while restoring
//! ```
//!
//! Dot-prefixed files are transient and never listed.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::BackupError;
use crate::snapshot::SnapshotName;

const METADATA_SUFFIX: &str = ".meta.json";
const CHECKSUM_SUFFIX: &str = ".sha256";
const ARCHIVE_SUFFIX: &str = ".gz";

/// Path resolver and housekeeping for one Archive Store directory.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    /// Archive Store directory.
    root: PathBuf,
    /// Payload extension inside archive names (`db` in `N.db.gz`).
    extension: String,
}

impl ArchiveStore {
    /// Create a store rooted at `root`. Nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    /// The Archive Store directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the Archive Store directory, including intermediate directories.
    pub async fn ensure_dir(&self) -> Result<(), BackupError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| BackupError::write_failed(&self.root, e))
    }

    /// File name of the archive for `name`.
    pub fn archive_file_name(&self, name: &SnapshotName) -> String {
        format!("{name}.{}{ARCHIVE_SUFFIX}", self.extension)
    }

    /// Location of the compressed archive.
    pub fn archive_path(&self, name: &SnapshotName) -> PathBuf {
        self.root.join(self.archive_file_name(name))
    }

    /// Location of the metadata sidecar.
    pub fn metadata_path(&self, name: &SnapshotName) -> PathBuf {
        self.root.join(format!("{name}{METADATA_SUFFIX}"))
    }

    /// Location of the checksum sidecar.
    pub fn checksum_path(&self, name: &SnapshotName) -> PathBuf {
        self.root.join(format!("{name}{CHECKSUM_SUFFIX}"))
    }

    /// Location of the datastore copy while a snapshot is being built.
    pub fn staging_path(&self, name: &SnapshotName) -> PathBuf {
        self.root.join(format!(".{name}.staging"))
    }

    /// Location of the archive while it is being compressed.
    pub fn partial_path(&self, name: &SnapshotName) -> PathBuf {
        self.root.join(format!(".{name}.partial"))
    }

    /// A fresh location for a decompressed restore payload.
    pub fn restore_temp_path(&self, name: &SnapshotName) -> PathBuf {
        self.root
            .join(format!(".{name}.restore-{}.tmp", Uuid::new_v4().simple()))
    }

    /// Map an archive file name back to its snapshot name.
    ///
    /// Returns `None` for sidecars, transient files, and foreign files.
    pub fn snapshot_name_for(&self, file_name: &str) -> Option<SnapshotName> {
        if file_name.starts_with('.') {
            return None;
        }
        let suffix = format!(".{}{ARCHIVE_SUFFIX}", self.extension);
        let stem = file_name.strip_suffix(&suffix)?;
        SnapshotName::parse(stem).ok()
    }

    /// Whether an archive exists for `name`.
    pub async fn archive_exists(&self, name: &SnapshotName) -> Result<bool, BackupError> {
        let path = self.archive_path(name);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| BackupError::io(path, e))
    }

    /// Remove transient files left behind by interrupted runs.
    ///
    /// Only files not modified for `older_than` are touched, so work in
    /// progress in another manager or process survives. Returns the number
    /// of files removed. A missing directory is not an error.
    pub async fn sweep_transient(&self, older_than: Duration) -> Result<usize, BackupError> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(BackupError::io(&self.root, e)),
        };

        let mut removed = 0;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| BackupError::io(&self.root, e))?
        {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !is_transient(&file_name) {
                continue;
            }
            let stale = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => is_stale(modified, older_than),
                Err(_) => false,
            };
            if !stale {
                debug!(file = %file_name, "Keeping recent transient file");
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    removed += 1;
                    debug!(file = %file_name, "Removed stale transient file");
                }
                Err(e) => warn!(file = %file_name, error = %e, "Failed to remove stale file"),
            }
        }
        Ok(removed)
    }
}

/// Whether `modified` lies at least `older_than` in the past.
pub(crate) fn is_stale(modified: SystemTime, older_than: Duration) -> bool {
    SystemTime::now()
        .duration_since(modified)
        .is_ok_and(|age| age >= older_than)
}

fn is_transient(file_name: &str) -> bool {
    file_name.starts_with('.')
        && (file_name.ends_with(".staging")
            || file_name.ends_with(".partial")
            || file_name.ends_with(".tmp"))
}

/// Write `data` to `path` by writing a hidden sibling and renaming it over
/// the target, so readers never observe a half-written sidecar.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Flush directory entries (renames, creations) of `dir` to disk.
pub(crate) fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
            debug!(dir = %dir.display(), error = %e, "Directory fsync failed");
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> SnapshotName {
        SnapshotName::parse(s).unwrap()
    }

    #[test]
    fn test_layout_shares_base_name() {
        let store = ArchiveStore::new("/backups", "db");
        let n = name("inventory_2024-05-01T12-30-00");

        assert_eq!(
            store.archive_path(&n),
            PathBuf::from("/backups/inventory_2024-05-01T12-30-00.db.gz")
        );
        assert_eq!(
            store.metadata_path(&n),
            PathBuf::from("/backups/inventory_2024-05-01T12-30-00.meta.json")
        );
        assert_eq!(
            store.checksum_path(&n),
            PathBuf::from("/backups/inventory_2024-05-01T12-30-00.sha256")
        );
    }

    #[test]
    fn test_snapshot_name_for_filters_non_archives() {
        let store = ArchiveStore::new("/backups", "db");
        assert_eq!(
            store.snapshot_name_for("inventory_2024-05-01T12-30-00.db.gz"),
            Some(name("inventory_2024-05-01T12-30-00"))
        );
        assert_eq!(store.snapshot_name_for("inventory_2024.meta.json"), None);
        assert_eq!(store.snapshot_name_for("inventory_2024.sha256"), None);
        assert_eq!(store.snapshot_name_for(".inventory_2024.partial"), None);
        assert_eq!(store.snapshot_name_for("notes.txt.gz"), None);
    }

    fn age(path: &Path, secs: u64) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(secs))
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_transient_keeps_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path(), "db");
        let n = name("inventory_2024-05-01T12-30-00");

        std::fs::write(store.archive_path(&n), b"gz").unwrap();
        std::fs::write(store.checksum_path(&n), b"abc").unwrap();
        std::fs::write(store.staging_path(&n), b"copy").unwrap();
        std::fs::write(store.restore_temp_path(&n), b"payload").unwrap();
        for path in [
            store.archive_path(&n),
            store.checksum_path(&n),
            store.staging_path(&n),
        ] {
            age(&path, 7200);
        }

        assert_eq!(store.sweep_transient(Duration::from_secs(3600)).await.unwrap(), 1);
        assert!(store.archive_path(&n).exists());
        assert!(store.checksum_path(&n).exists());
        assert!(!store.staging_path(&n).exists());
        // Fresh: could belong to a restore in progress elsewhere.
        assert!(store.restore_temp_path(&n).exists());
    }

    #[tokio::test]
    async fn test_sweep_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path().join("absent"), "db");
        assert_eq!(store.sweep_transient(Duration::ZERO).await.unwrap(), 0);
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.sha256");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
