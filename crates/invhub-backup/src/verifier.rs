//! Integrity Verifier: recompute an archive's digest and compare it with the
//! checksum sidecar written when the snapshot was created.

use serde::Serialize;
use tracing::{debug, warn};

use crate::checksum::{digests_match, read_sidecar, sha256_file};
use crate::error::BackupError;
use crate::snapshot::{IntegrityStatus, SnapshotName};
use crate::store::ArchiveStore;

/// Outcome of verifying one snapshot.
///
/// `NoChecksumOnFile` is advisory: the archive may predate checksums.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
    /// The archive digest matches the sidecar.
    Verified {
        /// Hex SHA-256 of the archive.
        digest: String,
    },
    /// The archive digest differs from the sidecar.
    Mismatch {
        /// Digest recorded in the sidecar.
        expected: String,
        /// Digest recomputed from the archive.
        actual: String,
    },
    /// The snapshot has no checksum sidecar.
    NoChecksumOnFile,
}

impl Verification {
    /// Whether the archive matched its sidecar.
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }

    /// Catalog status for this outcome.
    pub fn status(&self) -> IntegrityStatus {
        match self {
            Self::Verified { .. } => IntegrityStatus::Verified,
            Self::Mismatch { .. } => IntegrityStatus::Mismatch,
            Self::NoChecksumOnFile => IntegrityStatus::NoChecksum,
        }
    }

    /// Turn a mismatch into [`BackupError::ChecksumMismatch`].
    pub fn into_result(self, name: &SnapshotName) -> Result<Self, BackupError> {
        match self {
            Self::Mismatch { expected, actual } => Err(BackupError::ChecksumMismatch {
                name: name.to_string(),
                expected,
                actual,
            }),
            other => Ok(other),
        }
    }
}

/// Read-only digest checks against one Archive Store.
#[derive(Debug, Clone)]
pub struct IntegrityVerifier {
    store: ArchiveStore,
}

impl IntegrityVerifier {
    /// Create a verifier for `store`.
    pub fn new(store: ArchiveStore) -> Self {
        Self { store }
    }

    /// Recompute the archive digest for `name` and compare it to the sidecar.
    ///
    /// Safe to call any number of times; nothing is written.
    pub async fn verify(&self, name: &SnapshotName) -> Result<Verification, BackupError> {
        if !self.store.archive_exists(name).await? {
            return Err(BackupError::SnapshotNotFound {
                name: name.to_string(),
            });
        }

        let archive_path = self.store.archive_path(name);
        let checksum_path = self.store.checksum_path(name);
        let task_name = name.to_string();

        let verification = tokio::task::spawn_blocking(move || {
            let Some(expected) =
                read_sidecar(&checksum_path).map_err(|e| BackupError::io(&checksum_path, e))?
            else {
                return Ok::<_, BackupError>(Verification::NoChecksumOnFile);
            };
            // The archive may be deleted between the existence check and here.
            let actual = sha256_file(&archive_path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => BackupError::SnapshotNotFound { name: task_name },
                _ => BackupError::io(&archive_path, e),
            })?;

            if digests_match(&expected, &actual) {
                Ok(Verification::Verified { digest: actual })
            } else {
                Ok(Verification::Mismatch { expected, actual })
            }
        })
        .await??;

        match &verification {
            Verification::Verified { .. } => debug!(snapshot = %name, "Checksum verified"),
            Verification::Mismatch { expected, actual } => warn!(
                snapshot = %name,
                expected = %expected,
                actual = %actual,
                "Checksum mismatch"
            ),
            Verification::NoChecksumOnFile => {
                debug!(snapshot = %name, "No checksum on file")
            }
        }

        Ok(verification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::write_sidecar;

    fn setup() -> (tempfile::TempDir, ArchiveStore, SnapshotName) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path(), "db");
        let name = SnapshotName::parse("inventory_2024-05-01T12-30-00").unwrap();
        std::fs::write(store.archive_path(&name), b"archive bytes").unwrap();
        (dir, store, name)
    }

    #[tokio::test]
    async fn test_matching_sidecar_verifies() {
        let (_dir, store, name) = setup();
        let digest = sha256_file(&store.archive_path(&name)).unwrap();
        write_sidecar(
            &store.checksum_path(&name),
            &digest,
            &store.archive_file_name(&name),
        )
        .unwrap();

        let verifier = IntegrityVerifier::new(store);
        let first = verifier.verify(&name).await.unwrap();
        let second = verifier.verify(&name).await.unwrap();

        assert_eq!(first, Verification::Verified { digest });
        assert_eq!(first, second);
        assert_eq!(first.status(), IntegrityStatus::Verified);
    }

    #[tokio::test]
    async fn test_flipped_byte_is_a_mismatch() {
        let (_dir, store, name) = setup();
        let digest = sha256_file(&store.archive_path(&name)).unwrap();
        write_sidecar(&store.checksum_path(&name), &digest, "x").unwrap();
        std::fs::write(store.archive_path(&name), b"archive bytez").unwrap();

        let outcome = IntegrityVerifier::new(store).verify(&name).await.unwrap();
        assert!(matches!(
            outcome,
            Verification::Mismatch { ref expected, .. } if *expected == digest
        ));
        assert!(matches!(
            outcome.into_result(&name),
            Err(BackupError::ChecksumMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_sidecar_is_advisory() {
        let (_dir, store, name) = setup();
        let outcome = IntegrityVerifier::new(store).verify(&name).await.unwrap();
        assert_eq!(outcome, Verification::NoChecksumOnFile);
        assert!(outcome.into_result(&name).is_ok());
    }

    #[tokio::test]
    async fn test_missing_archive_is_not_found() {
        let (_dir, store, _) = setup();
        let absent = SnapshotName::parse("inventory_1999-01-01T00-00-00").unwrap();
        let err = IntegrityVerifier::new(store)
            .verify(&absent)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::SnapshotNotFound { name } if name == absent.as_str()));
    }

    #[test]
    fn test_serializes_with_status_tag() {
        let json = serde_json::to_value(Verification::NoChecksumOnFile).unwrap();
        assert_eq!(json["status"], "no_checksum_on_file");
    }
}
