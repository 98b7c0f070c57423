//! Snapshot Builder: copy the live datastore, compress it, checksum the
//! archive, and describe it in a metadata sidecar.
//!
//! Building happens in two phases so that the datastore lock is held only
//! while the live file is read:
//!
//! 1. [`SnapshotBuilder::stage`] copies the datastore byte-for-byte into a
//!    hidden staging file. Requires a [`DatastoreGuard`].
//! 2. [`SnapshotBuilder::seal`] compresses the staged copy into a hidden
//!    partial archive, renames it into place, then writes the checksum and
//!    metadata sidecars.
//!
//! A sidecar is only written after the step it describes has fully
//! succeeded. If compression or publishing fails, no archive or sidecar is
//! left behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::info;

use crate::checksum::{HashingWriter, write_sidecar};
use crate::error::BackupError;
use crate::lock::DatastoreGuard;
use crate::snapshot::{
    IntegrityStatus, METADATA_FORMAT_VERSION, Snapshot, SnapshotMetadata, SnapshotName, human_size,
};
use crate::store::{ArchiveStore, sync_dir, write_atomic};

const COPY_BUFFER: usize = 256 * 1024;

/// Creates snapshots of one datastore file inside one Archive Store.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    /// Target Archive Store.
    store: ArchiveStore,
    /// Live datastore file.
    datastore: PathBuf,
    /// Gzip level.
    compression: Compression,
}

/// A byte-for-byte copy of the datastore awaiting compression.
#[derive(Debug)]
pub struct StagedCopy {
    /// Snapshot name reserved by the staging file.
    pub name: SnapshotName,
    /// Snapshot timestamp.
    pub created_at: DateTime<Utc>,
    /// Hidden staging file in the Archive Store.
    pub staging_path: PathBuf,
    /// SHA-256 of the copied bytes.
    pub source_sha256: String,
    /// Number of bytes copied.
    pub uncompressed_bytes: u64,
}

impl SnapshotBuilder {
    /// Create a builder. `level` is clamped to gzip's 0-9 range.
    pub fn new(store: ArchiveStore, datastore: impl Into<PathBuf>, level: u32) -> Self {
        Self {
            store,
            datastore: datastore.into(),
            compression: Compression::new(level.min(9)),
        }
    }

    /// Copy the live datastore into the Archive Store.
    ///
    /// The caller proves exclusive access to the datastore with `_guard`.
    pub async fn stage(
        &self,
        name: SnapshotName,
        created_at: DateTime<Utc>,
        _guard: &DatastoreGuard,
    ) -> Result<StagedCopy, BackupError> {
        self.store.ensure_dir().await?;

        if self.store.archive_exists(&name).await? {
            return Err(BackupError::SnapshotExists {
                name: name.to_string(),
            });
        }

        let staging_path = self.store.staging_path(&name);
        let source = self.datastore.clone();
        let staging = staging_path.clone();
        let task_name = name.clone();

        let (source_sha256, uncompressed_bytes) = tokio::task::spawn_blocking(move || {
            copy_source(&source, &staging, &task_name)
        })
        .await??;

        info!(
            snapshot = %name,
            bytes = uncompressed_bytes,
            "Datastore copied to staging"
        );

        Ok(StagedCopy {
            name,
            created_at,
            staging_path,
            source_sha256,
            uncompressed_bytes,
        })
    }

    /// Compress a staged copy and publish the archive with its sidecars.
    ///
    /// The staging file is removed whether or not sealing succeeds.
    pub async fn seal(&self, staged: StagedCopy, actor: &str) -> Result<Snapshot, BackupError> {
        let store = self.store.clone();
        let compression = self.compression;
        let metadata = SnapshotMetadata {
            name: staged.name.to_string(),
            created_at: staged.created_at,
            size_bytes: 0,
            uncompressed_bytes: staged.uncompressed_bytes,
            source_path: self.datastore.display().to_string(),
            source_sha256: Some(staged.source_sha256.clone()),
            created_by: actor.to_string(),
            format_version: METADATA_FORMAT_VERSION,
        };

        let snapshot = tokio::task::spawn_blocking(move || {
            let result = publish(&store, &staged, compression, metadata);
            let _ = fs::remove_file(&staged.staging_path);
            result
        })
        .await??;

        info!(
            snapshot = %snapshot.name,
            size_bytes = snapshot.size_bytes,
            actor,
            "Snapshot created"
        );
        Ok(snapshot)
    }

    /// Stage and seal in one call, releasing `guard` as soon as the live
    /// datastore has been copied.
    pub async fn build(
        &self,
        name: SnapshotName,
        created_at: DateTime<Utc>,
        actor: &str,
        guard: DatastoreGuard,
    ) -> Result<Snapshot, BackupError> {
        let staged = self.stage(name, created_at, &guard).await?;
        drop(guard);
        self.seal(staged, actor).await
    }
}

/// Copy `source` to a newly created `staging` file, hashing on the way.
///
/// Read failures are reported as `SourceUnavailable`, write failures as
/// `StorageWriteFailed`. An existing staging file means another build of
/// the same name is in flight.
fn copy_source(
    source: &Path,
    staging: &Path,
    name: &SnapshotName,
) -> Result<(String, u64), BackupError> {
    let mut reader = File::open(source).map_err(|e| BackupError::SourceUnavailable {
        path: source.to_path_buf(),
        source: e,
    })?;

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(staging)
        .map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                BackupError::SnapshotExists {
                    name: name.to_string(),
                }
            } else {
                BackupError::write_failed(staging, e)
            }
        })?;

    let result = copy_hashing(&mut reader, file, source, staging);
    if result.is_err() {
        let _ = fs::remove_file(staging);
    }
    result
}

fn copy_hashing(
    reader: &mut File,
    file: File,
    source: &Path,
    staging: &Path,
) -> Result<(String, u64), BackupError> {
    let mut writer = HashingWriter::new(BufWriter::new(file));
    let mut buf = vec![0u8; COPY_BUFFER];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(BackupError::SourceUnavailable {
                    path: source.to_path_buf(),
                    source: e,
                });
            }
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| BackupError::write_failed(staging, e))?;
    }

    let (buffered, digest, bytes) = writer.finish();
    let file = buffered
        .into_inner()
        .map_err(|e| BackupError::write_failed(staging, e.into_error()))?;
    file.sync_all()
        .map_err(|e| BackupError::write_failed(staging, e))?;

    Ok((digest, bytes))
}

fn publish(
    store: &ArchiveStore,
    staged: &StagedCopy,
    compression: Compression,
    mut metadata: SnapshotMetadata,
) -> Result<Snapshot, BackupError> {
    let name = &staged.name;
    let archive_path = store.archive_path(name);
    let partial_path = store.partial_path(name);
    let checksum_path = store.checksum_path(name);
    let metadata_path = store.metadata_path(name);

    let (digest, size_bytes) =
        match compress(&staged.staging_path, &partial_path, compression, name) {
            Ok(result) => result,
            Err(e) => {
                let _ = fs::remove_file(&partial_path);
                return Err(e);
            }
        };

    if archive_path.exists() {
        let _ = fs::remove_file(&partial_path);
        return Err(BackupError::SnapshotExists {
            name: name.to_string(),
        });
    }
    if let Err(e) = fs::rename(&partial_path, &archive_path) {
        let _ = fs::remove_file(&partial_path);
        return Err(BackupError::write_failed(&archive_path, e));
    }

    if let Err(e) = write_sidecar(&checksum_path, &digest, &store.archive_file_name(name)) {
        let _ = fs::remove_file(&archive_path);
        return Err(BackupError::write_failed(&checksum_path, e));
    }

    metadata.size_bytes = size_bytes;
    let written = serde_json::to_vec_pretty(&metadata)
        .map_err(BackupError::from)
        .and_then(|json| {
            write_atomic(&metadata_path, &json)
                .map_err(|e| BackupError::write_failed(&metadata_path, e))
        });
    if let Err(e) = written {
        let _ = fs::remove_file(&checksum_path);
        let _ = fs::remove_file(&archive_path);
        return Err(e);
    }

    sync_dir(store.root());

    Ok(Snapshot {
        name: name.clone(),
        archive_path,
        metadata_path,
        checksum_path,
        size_bytes,
        size_human: human_size(size_bytes),
        created_at: staged.created_at,
        created_by: Some(metadata.created_by),
        has_metadata: true,
        has_checksum: true,
        integrity: IntegrityStatus::Unverified,
    })
}

/// Gzip `staging` into `partial`, returning the archive digest and size.
fn compress(
    staging: &Path,
    partial: &Path,
    compression: Compression,
    name: &SnapshotName,
) -> Result<(String, u64), BackupError> {
    let compression_failed = |e: io::Error| BackupError::CompressionFailed {
        name: name.to_string(),
        source: e,
    };

    let mut reader = BufReader::new(File::open(staging).map_err(compression_failed)?);
    let file = File::create(partial).map_err(|e| BackupError::write_failed(partial, e))?;

    let mut encoder = GzEncoder::new(HashingWriter::new(BufWriter::new(file)), compression);
    io::copy(&mut reader, &mut encoder).map_err(compression_failed)?;
    let hashing = encoder.finish().map_err(compression_failed)?;

    let (buffered, digest, size) = hashing.finish();
    let file = buffered
        .into_inner()
        .map_err(|e| BackupError::write_failed(partial, e.into_error()))?;
    file.sync_all()
        .map_err(|e| BackupError::write_failed(partial, e))?;

    Ok((digest, size))
}
