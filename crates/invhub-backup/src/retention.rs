//! Retention/Deletion Manager: remove a snapshot's archive and sidecars.
//!
//! The archive goes first, so an interrupted delete never leaves a listed
//! snapshot without its files. Sidecars are removed independently and a
//! missing sidecar is not an error.

use std::io;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::BackupError;
use crate::snapshot::SnapshotName;
use crate::store::ArchiveStore;

/// What a delete actually removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    /// Snapshot name.
    pub name: SnapshotName,
    /// Whether an archive was removed. `false` when only orphan sidecars existed.
    pub archive_removed: bool,
    /// Whether a metadata sidecar was removed.
    pub metadata_removed: bool,
    /// Whether a checksum sidecar was removed.
    pub checksum_removed: bool,
    /// Sidecars that exist but could not be removed.
    pub leftover: Vec<String>,
}

impl DeleteReport {
    /// Whether every file belonging to the snapshot is gone.
    pub fn is_complete(&self) -> bool {
        self.leftover.is_empty()
    }
}

enum Removal {
    Removed,
    Absent,
    Failed(io::Error),
}

async fn remove(path: &Path) -> Removal {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Removal::Removed,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Removal::Absent,
        Err(e) => Removal::Failed(e),
    }
}

/// Deletes snapshots from one Archive Store.
#[derive(Debug, Clone)]
pub struct RetentionManager {
    store: ArchiveStore,
}

impl RetentionManager {
    /// Create a manager for `store`.
    pub fn new(store: ArchiveStore) -> Self {
        Self { store }
    }

    /// Remove the archive and both sidecars of `name`.
    ///
    /// Returns [`BackupError::SnapshotNotFound`] when none of the three files
    /// exist. A sidecar that cannot be removed is reported in
    /// [`DeleteReport::leftover`] rather than failing the call.
    pub async fn delete(&self, name: &SnapshotName) -> Result<DeleteReport, BackupError> {
        let archive_path = self.store.archive_path(name);
        let archive_removed = match remove(&archive_path).await {
            Removal::Removed => true,
            Removal::Absent => false,
            Removal::Failed(e) => return Err(BackupError::io(archive_path, e)),
        };

        let mut leftover = Vec::new();
        let mut sidecar = |path: &Path, removal: Removal| match removal {
            Removal::Removed => true,
            Removal::Absent => false,
            Removal::Failed(e) => {
                warn!(
                    snapshot = %name,
                    path = %path.display(),
                    error = %e,
                    "Failed to remove sidecar"
                );
                leftover.push(
                    path.file_name()
                        .map(|f| f.to_string_lossy().to_string())
                        .unwrap_or_default(),
                );
                false
            }
        };

        let metadata_path = self.store.metadata_path(name);
        let metadata_removed = sidecar(&metadata_path, remove(&metadata_path).await);
        let checksum_path = self.store.checksum_path(name);
        let checksum_removed = sidecar(&checksum_path, remove(&checksum_path).await);

        if !archive_removed && !metadata_removed && !checksum_removed && leftover.is_empty() {
            return Err(BackupError::SnapshotNotFound {
                name: name.to_string(),
            });
        }

        if archive_removed {
            info!(snapshot = %name, leftover = leftover.len(), "Snapshot deleted");
        } else {
            warn!(snapshot = %name, "Removed orphan sidecars of a snapshot with no archive");
        }

        Ok(DeleteReport {
            name: name.clone(),
            archive_removed,
            metadata_removed,
            checksum_removed,
            leftover,
        })
    }
}
