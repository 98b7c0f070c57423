//! `BackupManager`: the entry point used by the service layer and CLI.
//!
//! Owns one Archive Store, one live datastore path, and the exclusion lock
//! for that datastore. Every name-addressed call validates the name first.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use invhub_core::config::BackupConfig;
use tracing::{debug, info, warn};

use crate::builder::SnapshotBuilder;
use crate::catalog::CatalogReader;
use crate::error::BackupError;
use crate::lock::DatastoreLock;
use crate::restore::{RestoreExecutor, RestoreOutcome};
use crate::retention::{DeleteReport, RetentionManager};
use crate::snapshot::{Snapshot, SnapshotName};
use crate::store::{ArchiveStore, is_stale};
use crate::verifier::{IntegrityVerifier, Verification};

/// Transient files untouched for this long are considered abandoned.
const STALE_TRANSIENT_AGE: Duration = Duration::from_secs(60 * 60);

/// An opened archive, ready to be streamed.
#[derive(Debug)]
pub struct ArchiveHandle {
    /// Open archive file.
    pub file: tokio::fs::File,
    /// File name to offer to the downloader.
    pub file_name: String,
    /// Archive length in bytes.
    pub size_bytes: u64,
}

/// Facade over the backup components for one datastore.
#[derive(Debug, Clone)]
pub struct BackupManager {
    store: ArchiveStore,
    datastore: PathBuf,
    name_prefix: String,
    lock: DatastoreLock,
    builder: SnapshotBuilder,
    catalog: CatalogReader,
    verifier: IntegrityVerifier,
    restorer: RestoreExecutor,
    retention: RetentionManager,
}

impl BackupManager {
    /// Build a manager from configuration with its own datastore lock.
    pub async fn open(config: &BackupConfig) -> Result<Self, BackupError> {
        Self::with_lock(config, DatastoreLock::new(config.datastore_path())).await
    }

    /// Build a manager that shares `lock` with other users of the datastore.
    ///
    /// Leftover transient files from interrupted runs are removed, but only
    /// while no operation holds the datastore lock and only once they have
    /// gone unmodified for an hour.
    pub async fn with_lock(
        config: &BackupConfig,
        lock: DatastoreLock,
    ) -> Result<Self, BackupError> {
        let store = ArchiveStore::new(config.archive_dir(), config.archive_extension.clone());
        let datastore = config.datastore_path();
        let builder =
            SnapshotBuilder::new(store.clone(), &datastore, config.compression_level);
        let restorer = RestoreExecutor::new(store.clone(), &datastore)
            .allow_unverified(config.allow_unverified_restore)
            .timeout(config.restore_timeout())
            .pre_restore_snapshot(config.pre_restore_snapshot.then(|| builder.clone()));

        match lock.try_acquire("sweep") {
            Ok(Some(_guard)) => {
                let swept = store.sweep_transient(STALE_TRANSIENT_AGE).await?;
                let swept_swap = sweep_swap_staging(&datastore, STALE_TRANSIENT_AGE).await;
                if swept + swept_swap > 0 {
                    warn!(
                        archive_files = swept,
                        datastore_files = swept_swap,
                        "Removed transient files from interrupted backup operations"
                    );
                }
            }
            Ok(None) => debug!("Datastore busy, skipping transient file sweep"),
            Err(e) => warn!(
                error = %e,
                "Cannot take datastore lock, skipping transient file sweep"
            ),
        }

        if config.allow_unverified_restore {
            warn!("Restoring snapshots without a checksum on file is allowed");
        }

        info!(
            archive_dir = %store.root().display(),
            datastore = %datastore.display(),
            "Backup manager ready"
        );

        Ok(Self {
            catalog: CatalogReader::new(store.clone()),
            verifier: IntegrityVerifier::new(store.clone()),
            retention: RetentionManager::new(store.clone()),
            store,
            datastore,
            name_prefix: config.name_prefix.clone(),
            lock,
            builder,
            restorer,
        })
    }

    /// The Archive Store.
    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }

    /// The live datastore path.
    pub fn datastore_path(&self) -> &Path {
        &self.datastore
    }

    /// The datastore exclusion lock.
    pub fn lock(&self) -> &DatastoreLock {
        &self.lock
    }

    /// Snapshot the live datastore on behalf of `actor`.
    ///
    /// Runs on its own task, so a dropped caller cannot release the lock
    /// while the datastore is still being copied.
    pub async fn create_snapshot(&self, actor: &str) -> Result<Snapshot, BackupError> {
        let this = self.clone();
        let actor = actor.to_string();
        let task = tokio::spawn(async move {
            let now = Utc::now();
            let name = SnapshotName::generate(&this.name_prefix, now)?;
            let guard = this.lock.acquire("snapshot").await?;

            this.builder
                .build(name.clone(), now, &actor, guard)
                .await
                .inspect_err(|e| {
                    warn!(snapshot = %name, actor = %actor, error = %e, "Snapshot failed")
                })
        });
        task.await
            .map_err(|e| BackupError::io(&self.datastore, std::io::Error::other(e)))?
    }

    /// All snapshots, newest first.
    pub async fn list_snapshots(&self) -> Result<Vec<Snapshot>, BackupError> {
        self.catalog.list().await
    }

    /// The catalog entry for `name`.
    pub async fn get_snapshot(&self, name: &str) -> Result<Snapshot, BackupError> {
        self.catalog.get(&SnapshotName::parse(name)?).await
    }

    /// Check `name` against its checksum sidecar.
    pub async fn verify(&self, name: &str) -> Result<Verification, BackupError> {
        self.verifier.verify(&SnapshotName::parse(name)?).await
    }

    /// Replace the live datastore with snapshot `name`.
    ///
    /// Waits for any in-flight restore or datastore copy to finish first. The
    /// restore runs to completion on its own task even if the caller is
    /// dropped, and holds the lock until it does.
    pub async fn restore(&self, name: &str, actor: &str) -> Result<RestoreOutcome, BackupError> {
        let name = SnapshotName::parse(name)?;
        let restorer = self.restorer.clone();
        let lock = self.lock.clone();
        let actor = actor.to_string();

        let task = tokio::spawn(async move {
            let guard = lock.acquire("restore").await?;
            restorer.restore(&name, &actor, &guard).await
        });
        task.await
            .map_err(|e| BackupError::io(&self.datastore, std::io::Error::other(e)))?
    }

    /// Remove snapshot `name` and its sidecars.
    pub async fn delete_snapshot(&self, name: &str) -> Result<DeleteReport, BackupError> {
        self.retention.delete(&SnapshotName::parse(name)?).await
    }

    /// Open the archive of `name` for streaming.
    pub async fn open_archive(&self, name: &str) -> Result<ArchiveHandle, BackupError> {
        let name = SnapshotName::parse(name)?;
        let path = self.store.archive_path(&name);
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::SnapshotNotFound {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(BackupError::io(path, e)),
        };
        let size_bytes = file
            .metadata()
            .await
            .map_err(|e| BackupError::io(&path, e))?
            .len();

        Ok(ArchiveHandle {
            file,
            file_name: self.store.archive_file_name(&name),
            size_bytes,
        })
    }
}

/// Remove `.<datastore>.restore-*.tmp` files left next to the datastore by
/// an interrupted cross-filesystem swap.
async fn sweep_swap_staging(datastore: &Path, older_than: Duration) -> usize {
    let (Some(parent), Some(file_name)) = (datastore.parent(), datastore.file_name()) else {
        return 0;
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    let prefix = format!(".{}.restore-", file_name.to_string_lossy());

    let Ok(mut dir) = tokio::fs::read_dir(parent).await else {
        return 0;
    };
    let mut removed = 0;
    while let Ok(Some(entry)) = dir.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(&prefix) || !name.ends_with(".tmp") {
            continue;
        }
        let stale = entry
            .metadata()
            .await
            .and_then(|m| m.modified())
            .is_ok_and(|modified| is_stale(modified, older_than));
        if stale && tokio::fs::remove_file(entry.path()).await.is_ok() {
            removed += 1;
        }
    }
    removed
}
