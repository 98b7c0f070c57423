//! Catalog Reader: a newest-first view of the snapshots in an Archive Store.
//!
//! A snapshot is listed if and only if its archive exists. Sidecars enrich
//! an entry when present and are ignored when missing or unreadable.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::BackupError;
use crate::snapshot::{IntegrityStatus, Snapshot, SnapshotMetadata, SnapshotName, human_size};
use crate::store::ArchiveStore;

/// Enumerates snapshots in one Archive Store.
#[derive(Debug, Clone)]
pub struct CatalogReader {
    store: ArchiveStore,
}

impl CatalogReader {
    /// Create a reader for `store`.
    pub fn new(store: ArchiveStore) -> Self {
        Self { store }
    }

    /// All snapshots, newest first. A missing Archive Store yields an empty list.
    pub async fn list(&self) -> Result<Vec<Snapshot>, BackupError> {
        let root = self.store.root();
        let mut dir = match tokio::fs::read_dir(root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %root.display(), "Archive store does not exist yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(BackupError::io(root, e)),
        };

        let mut snapshots = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| BackupError::io(root, e))?
        {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(name) = self.store.snapshot_name_for(&file_name) else {
                continue;
            };
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                // Deleted while listing.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(BackupError::io(entry.path(), e)),
            };
            snapshots.push(self.describe(name, &meta).await);
        }

        snapshots.sort_by(newest_first);
        Ok(snapshots)
    }

    /// The catalog entry for `name`.
    pub async fn get(&self, name: &SnapshotName) -> Result<Snapshot, BackupError> {
        let path = self.store.archive_path(name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(self.describe(name.clone(), &meta).await),
            Ok(_) => Err(BackupError::SnapshotNotFound {
                name: name.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BackupError::SnapshotNotFound {
                    name: name.to_string(),
                })
            }
            Err(e) => Err(BackupError::io(path, e)),
        }
    }

    async fn describe(&self, name: SnapshotName, archive: &std::fs::Metadata) -> Snapshot {
        let archive_path = self.store.archive_path(&name);
        let metadata_path = self.store.metadata_path(&name);
        let checksum_path = self.store.checksum_path(&name);

        let metadata = read_metadata(&name, &metadata_path).await;
        let has_checksum = tokio::fs::try_exists(&checksum_path)
            .await
            .unwrap_or(false);

        let created_at = match &metadata {
            Some(meta) => meta.created_at,
            None => archive
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH),
        };
        let size_bytes = archive.len();

        Snapshot {
            name,
            archive_path,
            metadata_path,
            checksum_path,
            size_bytes,
            size_human: human_size(size_bytes),
            created_at,
            created_by: metadata.as_ref().map(|m| m.created_by.clone()),
            has_metadata: metadata.is_some(),
            has_checksum,
            integrity: IntegrityStatus::Unverified,
        }
    }
}

/// Read a metadata sidecar. Missing or malformed sidecars yield `None`.
pub(crate) async fn read_metadata(
    name: &SnapshotName,
    path: &std::path::Path,
) -> Option<SnapshotMetadata> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(snapshot = %name, error = %e, "Unreadable metadata sidecar, using file time");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(meta) => Some(meta),
        Err(e) => {
            warn!(snapshot = %name, error = %e, "Malformed metadata sidecar, using file time");
            None
        }
    }
}

fn newest_first(a: &Snapshot, b: &Snapshot) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.name.cmp(&a.name))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn name(s: &str) -> SnapshotName {
        SnapshotName::parse(s).unwrap()
    }

    fn write_meta(store: &ArchiveStore, n: &SnapshotName, created_at: DateTime<Utc>) {
        let meta = SnapshotMetadata {
            name: n.to_string(),
            created_at,
            size_bytes: 0,
            uncompressed_bytes: 0,
            source_path: "/srv/inventory.db".into(),
            source_sha256: None,
            created_by: "alice".into(),
            format_version: 1,
        };
        std::fs::write(
            store.metadata_path(n),
            serde_json::to_vec(&meta).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_missing_store_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let reader = CatalogReader::new(ArchiveStore::new(dir.path().join("none"), "db"));
        assert!(reader.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lists_only_existing_archives_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path(), "db");
        let old = name("inventory_2024-05-01T12-30-00");
        let new = name("inventory_2024-05-02T08-00-00");
        let orphan = name("inventory_2024-05-03T08-00-00");

        std::fs::write(store.archive_path(&old), b"old archive").unwrap();
        std::fs::write(store.archive_path(&new), b"new").unwrap();
        write_meta(&store, &old, Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap());
        write_meta(&store, &new, Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap());
        // Sidecars without an archive are not snapshots.
        write_meta(&store, &orphan, Utc.with_ymd_and_hms(2024, 5, 3, 8, 0, 0).unwrap());
        std::fs::write(store.checksum_path(&orphan), b"abc").unwrap();
        std::fs::write(store.staging_path(&orphan), b"copy").unwrap();

        let list = CatalogReader::new(store).list().await.unwrap();
        let names: Vec<_> = list.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![new.as_str(), old.as_str()]);
        assert_eq!(list[1].size_bytes, 11);
        assert_eq!(list[1].size_human, "11 B");
        assert_eq!(list[0].created_by.as_deref(), Some("alice"));
        assert_eq!(list[0].integrity, IntegrityStatus::Unverified);
    }

    #[tokio::test]
    async fn test_malformed_metadata_falls_back_to_file_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path(), "db");
        let n = name("inventory_2024-05-01T12-30-00");
        std::fs::write(store.archive_path(&n), b"gz").unwrap();
        std::fs::write(store.metadata_path(&n), b"{not json").unwrap();

        let reader = CatalogReader::new(store.clone());
        let list = reader.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert!(!list[0].has_metadata);
        assert!(!list[0].has_checksum);

        let mtime: DateTime<Utc> = std::fs::metadata(store.archive_path(&n))
            .unwrap()
            .modified()
            .unwrap()
            .into();
        assert_eq!(list[0].created_at, mtime);
    }

    #[tokio::test]
    async fn test_equal_timestamps_order_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path(), "db");
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let a = name("a_2024-05-01T12-30-00");
        let b = name("b_2024-05-01T12-30-00");
        for n in [&a, &b] {
            std::fs::write(store.archive_path(n), b"gz").unwrap();
            write_meta(&store, n, at);
        }

        let list = CatalogReader::new(store).list().await.unwrap();
        assert_eq!(list[0].name, b);
        assert_eq!(list[1].name, a);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let reader = CatalogReader::new(ArchiveStore::new(dir.path(), "db"));
        let err = reader
            .get(&name("inventory_2024-05-01T12-30-00"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::SnapshotNotFound { .. }));
    }
}
