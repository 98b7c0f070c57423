//! Restore Executor: replace the live datastore with the contents of a
//! verified snapshot.
//!
//! A restore walks `Requested -> Verifying -> Decompressing -> Swapping ->
//! Completed`. It can abort during `Verifying` or `Decompressing`, and
//! nothing before `Swapping` touches the live datastore. The swap is a
//! rename. When the Archive Store and the datastore sit on different
//! filesystems, the payload is first copied next to the datastore,
//! re-hashed, and then renamed into place.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use flate2::read::GzDecoder;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::builder::SnapshotBuilder;
use crate::catalog::read_metadata;
use crate::checksum::{HashingWriter, digests_match, sha256_file};
use crate::error::BackupError;
use crate::lock::DatastoreGuard;
use crate::snapshot::SnapshotName;
use crate::store::{ArchiveStore, sync_dir};
use crate::verifier::{IntegrityVerifier, Verification};

/// Name prefix of the safety snapshot taken before a swap.
pub const PRE_RESTORE_PREFIX: &str = "pre-restore";

/// Linux `EXDEV`: rename across filesystems.
const CROSS_DEVICE_ERROR: i32 = 18;

const COPY_BUFFER: usize = 256 * 1024;

/// Restore state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePhase {
    /// Accepted, nothing done yet.
    Requested,
    /// Checking the archive against its checksum sidecar.
    Verifying,
    /// Expanding the archive into the Archive Store.
    Decompressing,
    /// Replacing the live datastore.
    Swapping,
    /// The live datastore now holds the snapshot contents.
    Completed,
    /// Stopped before `Swapping`; the live datastore is untouched.
    Aborted,
}

/// Result of a completed restore.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    /// Snapshot that was restored.
    pub snapshot: SnapshotName,
    /// Verification result that allowed the restore.
    pub verification: Verification,
    /// Size of the restored datastore.
    pub restored_bytes: u64,
    /// Safety snapshot of the previous datastore, if one was taken.
    pub pre_restore_snapshot: Option<SnapshotName>,
    /// Always `true`: datastore clients must reconnect or the process restart.
    pub restart_required: bool,
    /// Final phase.
    pub phase: RestorePhase,
}

/// Decompressed archive waiting to be swapped in.
#[derive(Debug)]
struct Payload {
    path: PathBuf,
    bytes: u64,
    digest: String,
}

/// Verifies, expands, and swaps snapshots into the live datastore.
#[derive(Debug, Clone)]
pub struct RestoreExecutor {
    store: ArchiveStore,
    datastore: PathBuf,
    verifier: IntegrityVerifier,
    allow_unverified: bool,
    timeout: Option<Duration>,
    safety: Option<SnapshotBuilder>,
}

impl RestoreExecutor {
    /// Create an executor that restores into `datastore`.
    ///
    /// Defaults: unverified snapshots allowed, no timeout, no safety snapshot.
    pub fn new(store: ArchiveStore, datastore: impl Into<PathBuf>) -> Self {
        Self {
            verifier: IntegrityVerifier::new(store.clone()),
            store,
            datastore: datastore.into(),
            allow_unverified: true,
            timeout: None,
            safety: None,
        }
    }

    /// Whether snapshots without a checksum sidecar may be restored.
    pub fn allow_unverified(mut self, allow: bool) -> Self {
        self.allow_unverified = allow;
        self
    }

    /// Bound the `Decompressing` phase.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Snapshot the live datastore with `builder` right before swapping.
    pub fn pre_restore_snapshot(mut self, builder: Option<SnapshotBuilder>) -> Self {
        self.safety = builder;
        self
    }

    /// Restore `name` into the live datastore.
    ///
    /// `guard` must be held for the whole call.
    pub async fn restore(
        &self,
        name: &SnapshotName,
        actor: &str,
        guard: &DatastoreGuard,
    ) -> Result<RestoreOutcome, BackupError> {
        info!(snapshot = %name, actor, phase = ?RestorePhase::Requested, "Restore requested");

        info!(snapshot = %name, phase = ?RestorePhase::Verifying, "Restore phase");
        let verification = self
            .verify(name)
            .await
            .map_err(|e| aborted(name, RestorePhase::Verifying, e))?;

        info!(snapshot = %name, phase = ?RestorePhase::Decompressing, "Restore phase");
        let payload = self
            .decompress(name)
            .await
            .map_err(|e| aborted(name, RestorePhase::Decompressing, e))?;

        let pre_restore = match self.take_safety_snapshot(actor, guard).await {
            Ok(pre) => pre,
            Err(e) => {
                discard(&payload.path);
                return Err(aborted(name, RestorePhase::Decompressing, e));
            }
        };

        info!(snapshot = %name, phase = ?RestorePhase::Swapping, "Restore phase");
        self.swap(&payload).await?;

        info!(
            snapshot = %name,
            actor,
            restored_bytes = payload.bytes,
            pre_restore = pre_restore.as_ref().map(|n| n.as_str()),
            phase = ?RestorePhase::Completed,
            "Datastore restored, clients must reconnect"
        );

        Ok(RestoreOutcome {
            snapshot: name.clone(),
            verification,
            restored_bytes: payload.bytes,
            pre_restore_snapshot: pre_restore,
            restart_required: true,
            phase: RestorePhase::Completed,
        })
    }

    async fn verify(&self, name: &SnapshotName) -> Result<Verification, BackupError> {
        let verification = self.verifier.verify(name).await?.into_result(name)?;
        if verification == Verification::NoChecksumOnFile {
            if !self.allow_unverified {
                return Err(BackupError::UnverifiedSnapshot {
                    name: name.to_string(),
                });
            }
            warn!(snapshot = %name, "Restoring snapshot without checksum on file");
        }
        Ok(verification)
    }

    async fn decompress(&self, name: &SnapshotName) -> Result<Payload, BackupError> {
        let expected = read_metadata(name, &self.store.metadata_path(name))
            .await
            .and_then(|meta| meta.source_sha256);

        let archive = self.store.archive_path(name);
        let temp = self.store.restore_temp_path(name);
        let cancel = Arc::new(AtomicBool::new(false));

        let mut task = {
            let temp = temp.clone();
            let cancel = Arc::clone(&cancel);
            let name = name.clone();
            tokio::task::spawn_blocking(move || expand(&archive, &temp, &cancel, &name))
        };

        let expanded = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    cancel.store(true, Ordering::Relaxed);
                    let _ = task.await;
                    discard(&temp);
                    return Err(BackupError::RestoreTimedOut {
                        name: name.to_string(),
                        seconds: limit.as_secs(),
                    });
                }
            },
            None => task.await,
        };
        let (digest, bytes) = match expanded {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => return Err(e),
            Err(e) => {
                discard(&temp);
                return Err(e.into());
            }
        };

        if let Some(expected) = expected {
            if !digests_match(&expected, &digest) {
                discard(&temp);
                return Err(BackupError::DecompressionFailed {
                    name: name.to_string(),
                    reason: format!(
                        "restored content digest {digest} does not match recorded {expected}"
                    ),
                });
            }
        }

        Ok(Payload {
            path: temp,
            bytes,
            digest,
        })
    }

    async fn take_safety_snapshot(
        &self,
        actor: &str,
        guard: &DatastoreGuard,
    ) -> Result<Option<SnapshotName>, BackupError> {
        let Some(builder) = &self.safety else {
            return Ok(None);
        };

        let now = Utc::now();
        let base = SnapshotName::generate(PRE_RESTORE_PREFIX, now)?;
        let mut candidate = base.clone();
        let mut attempt = 1;
        loop {
            match builder.stage(candidate.clone(), now, guard).await {
                Ok(staged) => {
                    let snapshot = builder.seal(staged, actor).await?;
                    return Ok(Some(snapshot.name));
                }
                Err(BackupError::SnapshotExists { .. }) if attempt < 10 => {
                    candidate = SnapshotName::parse(&format!("{base}.{attempt}"))?;
                    attempt += 1;
                }
                Err(BackupError::SourceUnavailable { source, .. })
                    if source.kind() == io::ErrorKind::NotFound =>
                {
                    warn!(
                        datastore = %self.datastore.display(),
                        "No live datastore to protect, skipping pre-restore snapshot"
                    );
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn swap(&self, payload: &Payload) -> Result<(), BackupError> {
        let source = payload.path.clone();
        let datastore = self.datastore.clone();
        let digest = payload.digest.clone();

        let swapped =
            tokio::task::spawn_blocking(move || swap_into_place(&source, &datastore, &digest))
                .await
                .map_err(io::Error::other)
                .and_then(|r| r);

        match swapped {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(
                    target: "invhub::backup::swap",
                    datastore = %self.datastore.display(),
                    payload = %payload.path.display(),
                    error = %e,
                    operator_action = "verify datastore integrity manually",
                    "Datastore swap failed, datastore state is uncertain"
                );
                discard(&payload.path);
                Err(BackupError::SwapFailed {
                    path: self.datastore.clone(),
                    source: e,
                })
            }
        }
    }
}

fn aborted(name: &SnapshotName, phase: RestorePhase, err: BackupError) -> BackupError {
    warn!(
        snapshot = %name,
        phase = ?phase,
        state = ?RestorePhase::Aborted,
        error = %err,
        "Restore aborted, live datastore untouched"
    );
    err
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove restore payload");
        }
    }
}

/// Gunzip `archive` into a new file at `temp`, hashing the output.
///
/// Stops early once `cancel` is set. Removes `temp` on any failure.
fn expand(
    archive: &Path,
    temp: &Path,
    cancel: &AtomicBool,
    name: &SnapshotName,
) -> Result<(String, u64), BackupError> {
    let file = File::open(archive).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => BackupError::SnapshotNotFound {
            name: name.to_string(),
        },
        _ => BackupError::io(archive, e),
    })?;
    let out = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp)
        .map_err(|e| BackupError::write_failed(temp, e))?;

    let result = expand_into(file, out, temp, cancel, name);
    if result.is_err() {
        let _ = fs::remove_file(temp);
    }
    result
}

fn expand_into(
    archive: File,
    out: File,
    temp: &Path,
    cancel: &AtomicBool,
    name: &SnapshotName,
) -> Result<(String, u64), BackupError> {
    let mut decoder = GzDecoder::new(BufReader::new(archive));
    let mut writer = HashingWriter::new(BufWriter::new(out));
    let mut buf = vec![0u8; COPY_BUFFER];

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(BackupError::RestoreTimedOut {
                name: name.to_string(),
                seconds: 0,
            });
        }
        let n = match decoder.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(BackupError::DecompressionFailed {
                    name: name.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| BackupError::write_failed(temp, e))?;
    }

    let (buffered, digest, bytes) = writer.finish();
    let file = buffered
        .into_inner()
        .map_err(|e| BackupError::write_failed(temp, e.into_error()))?;
    file.sync_all()
        .map_err(|e| BackupError::write_failed(temp, e))?;
    Ok((digest, bytes))
}

/// Move `payload` over `datastore`.
fn swap_into_place(payload: &Path, datastore: &Path, digest: &str) -> io::Result<()> {
    let parent = datastore
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    match fs::rename(payload, datastore) {
        Ok(()) => {
            sync_dir(parent);
            Ok(())
        }
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE_ERROR) => {
            copy_across(payload, datastore, parent, digest)?;
            let _ = fs::remove_file(payload);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Copy `payload` onto the datastore's filesystem, confirm its digest, then
/// rename it into place.
fn copy_across(payload: &Path, datastore: &Path, parent: &Path, digest: &str) -> io::Result<()> {
    let file_name = datastore
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();
    let staging = parent.join(format!(
        ".{file_name}.restore-{}.tmp",
        Uuid::new_v4().simple()
    ));

    let result = (|| {
        fs::copy(payload, &staging)?;
        File::open(&staging)?.sync_all()?;
        let copied = sha256_file(&staging)?;
        if !digests_match(digest, &copied) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("copied payload digest {copied} does not match {digest}"),
            ));
        }
        fs::rename(&staging, datastore)?;
        sync_dir(parent);
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result
}
