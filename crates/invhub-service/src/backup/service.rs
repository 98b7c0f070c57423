//! Backup administration: create, list, verify, restore, download, delete.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use invhub_backup::{
    BackupError, BackupManager, DeleteReport, RestoreOutcome, Snapshot, Verification,
};
use invhub_core::{AppError, AppResult};

use crate::context::AdminContext;

/// Shown to the administrator after every successful restore.
pub const RESTART_NOTICE: &str = "The datastore has been restored. Restart the application or \
     reconnect datastore clients before serving requests; open connections still see the old file.";

const ARCHIVE_CONTENT_TYPE: &str = "application/gzip";

/// Verification result for one snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    /// Snapshot name.
    pub name: String,
    /// Verification outcome.
    #[serde(flatten)]
    pub verification: Verification,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}

/// Restore result with operator instructions.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    /// Engine outcome.
    #[serde(flatten)]
    pub outcome: RestoreOutcome,
    /// What the operator must do next.
    pub notice: String,
    /// Who performed the restore.
    pub restored_by: String,
}

/// An archive ready to be streamed to a client.
#[derive(Debug)]
pub struct ArchiveDownload {
    /// Open archive file.
    pub file: tokio::fs::File,
    /// Suggested filename for Content-Disposition.
    pub filename: String,
    /// MIME type for Content-Type.
    pub content_type: &'static str,
    /// Content length.
    pub size_bytes: u64,
}

/// Snapshot administration on behalf of an [`AdminContext`].
#[derive(Debug, Clone)]
pub struct BackupService {
    /// Backup engine.
    manager: Arc<BackupManager>,
}

impl BackupService {
    /// Creates a new backup service.
    pub fn new(manager: Arc<BackupManager>) -> Self {
        Self { manager }
    }

    /// The underlying engine.
    pub fn manager(&self) -> &BackupManager {
        &self.manager
    }

    /// Lists snapshots, newest first.
    pub async fn list_snapshots(&self, _ctx: &AdminContext) -> AppResult<Vec<Snapshot>> {
        Ok(self.manager.list_snapshots().await?)
    }

    /// Gets one snapshot.
    pub async fn get_snapshot(&self, _ctx: &AdminContext, name: &str) -> AppResult<Snapshot> {
        Ok(self.manager.get_snapshot(name).await?)
    }

    /// Snapshots the live datastore, recording the acting administrator.
    pub async fn create_snapshot(&self, ctx: &AdminContext) -> AppResult<Snapshot> {
        let snapshot = self.manager.create_snapshot(&ctx.actor).await?;
        info!(
            snapshot = %snapshot.name,
            actor = %ctx.actor,
            size_bytes = snapshot.size_bytes,
            "Admin created snapshot"
        );
        Ok(snapshot)
    }

    /// Verifies a snapshot's archive against its checksum.
    pub async fn verify_snapshot(
        &self,
        _ctx: &AdminContext,
        name: &str,
    ) -> AppResult<VerificationReport> {
        let verification = self.manager.verify(name).await?;
        Ok(VerificationReport {
            name: name.to_string(),
            verification,
            checked_at: Utc::now(),
        })
    }

    /// Restores the live datastore from a snapshot.
    pub async fn restore_snapshot(
        &self,
        ctx: &AdminContext,
        name: &str,
    ) -> AppResult<RestoreReport> {
        let outcome = self
            .manager
            .restore(name, &ctx.actor)
            .await
            .map_err(|e| {
                if e.is_swap_failure() {
                    error!(
                        snapshot = name,
                        actor = %ctx.actor,
                        "Restore left the datastore in an uncertain state"
                    );
                }
                AppError::from(e)
            })?;

        info!(snapshot = name, actor = %ctx.actor, "Admin restored snapshot");

        Ok(RestoreReport {
            outcome,
            notice: RESTART_NOTICE.to_string(),
            restored_by: ctx.actor.clone(),
        })
    }

    /// Deletes a snapshot and its sidecars.
    pub async fn delete_snapshot(
        &self,
        ctx: &AdminContext,
        name: &str,
    ) -> AppResult<DeleteReport> {
        let report = self.manager.delete_snapshot(name).await?;
        info!(snapshot = name, actor = %ctx.actor, "Admin deleted snapshot");
        Ok(report)
    }

    /// Opens a snapshot archive for download.
    ///
    /// With `verify`, the archive must match its checksum sidecar first.
    pub async fn download(
        &self,
        ctx: &AdminContext,
        name: &str,
        verify: bool,
    ) -> AppResult<ArchiveDownload> {
        if verify {
            self.require_intact(name).await?;
        }

        let handle = self.manager.open_archive(name).await?;
        info!(
            snapshot = name,
            actor = %ctx.actor,
            size_bytes = handle.size_bytes,
            "Admin downloading snapshot"
        );

        Ok(ArchiveDownload {
            file: handle.file,
            filename: handle.file_name,
            content_type: ARCHIVE_CONTENT_TYPE,
            size_bytes: handle.size_bytes,
        })
    }

    /// Copies a snapshot archive to `dest`. Returns the bytes written.
    pub async fn export(
        &self,
        ctx: &AdminContext,
        name: &str,
        dest: &Path,
        overwrite: bool,
    ) -> AppResult<u64> {
        let mut download = self.download(ctx, name, true).await?;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let mut out = options.open(dest).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                AppError::conflict(format!("'{}' already exists", dest.display()))
            } else {
                AppError::storage(format!("Cannot create '{}': {e}", dest.display()))
            }
        })?;

        let written = tokio::io::copy(&mut download.file, &mut out)
            .await
            .map_err(|e| AppError::storage(format!("Export failed: {e}")))?;
        out.flush()
            .await
            .map_err(|e| AppError::storage(format!("Export failed: {e}")))?;

        info!(snapshot = name, dest = %dest.display(), bytes = written, "Snapshot exported");
        Ok(written)
    }

    async fn require_intact(&self, name: &str) -> AppResult<()> {
        if let Verification::Mismatch { expected, actual } = self.manager.verify(name).await? {
            return Err(BackupError::ChecksumMismatch {
                name: name.to_string(),
                expected,
                actual,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use invhub_core::config::BackupConfig;
    use invhub_core::error::ErrorKind;

    use super::*;

    async fn service(dir: &Path) -> BackupService {
        std::fs::write(dir.join("inventory.db"), b"rows").unwrap();
        let config = BackupConfig {
            archive_dir: dir.join("backups").display().to_string(),
            datastore_path: dir.join("inventory.db").display().to_string(),
            pre_restore_snapshot: false,
            ..BackupConfig::default()
        };
        BackupService::new(Arc::new(BackupManager::open(&config).await.unwrap()))
    }

    #[tokio::test]
    async fn test_restore_report_carries_notice() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;
        let ctx = AdminContext::new("ops").unwrap();

        let snapshot = service.create_snapshot(&ctx).await.unwrap();
        let report = service
            .restore_snapshot(&ctx, snapshot.name.as_str())
            .await
            .unwrap();

        assert_eq!(report.notice, RESTART_NOTICE);
        assert_eq!(report.restored_by, "ops");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["restart_required"], true);
        assert_eq!(json["verification"]["status"], "verified");
    }

    #[tokio::test]
    async fn test_errors_map_to_app_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;
        let ctx = AdminContext::new("ops").unwrap();

        let missing = service
            .delete_snapshot(&ctx, "inventory_1999-01-01T00-00-00")
            .await
            .unwrap_err();
        assert_eq!(missing.kind, ErrorKind::NotFound);

        let invalid = service.get_snapshot(&ctx, "../x").await.unwrap_err();
        assert_eq!(invalid.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_export_refuses_corrupt_archive_and_existing_dest() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;
        let ctx = AdminContext::new("ops").unwrap();
        let snapshot = service.create_snapshot(&ctx).await.unwrap();
        let name = snapshot.name.as_str();

        let dest = dir.path().join("export.db.gz");
        let written = service.export(&ctx, name, &dest, false).await.unwrap();
        assert_eq!(written, snapshot.size_bytes);
        assert_eq!(
            std::fs::read(&dest).unwrap(),
            std::fs::read(&snapshot.archive_path).unwrap()
        );

        let exists = service.export(&ctx, name, &dest, false).await.unwrap_err();
        assert_eq!(exists.kind, ErrorKind::Conflict);

        let mut bytes = std::fs::read(&snapshot.archive_path).unwrap();
        bytes[0] ^= 0x01;
        std::fs::write(&snapshot.archive_path, bytes).unwrap();
        let corrupt = service.export(&ctx, name, &dest, true).await.unwrap_err();
        assert_eq!(corrupt.kind, ErrorKind::Integrity);
    }
}
