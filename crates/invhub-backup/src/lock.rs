//! Mutual exclusion for operations on the live datastore file.
//!
//! Two layers: an in-process async mutex shared by clones of one handle, and
//! an exclusive `flock` on `.<datastore>.lock` next to the datastore, which
//! excludes other processes (the server and the CLI) and independent handles.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::BackupError;

/// Exclusion handle scoped to one live datastore file.
///
/// Clones share the same lock. Create one per datastore path and pass it to
/// every component that reads or replaces that file.
#[derive(Debug, Clone)]
pub struct DatastoreLock {
    inner: Arc<Mutex<()>>,
    lock_path: PathBuf,
}

impl DatastoreLock {
    /// Create a new, unlocked handle for `datastore`.
    pub fn new(datastore: impl AsRef<Path>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
            lock_path: lock_path_for(datastore.as_ref()),
        }
    }

    /// The lock file shared with other processes.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Wait for exclusive access to the live datastore.
    pub async fn acquire(&self, operation: &'static str) -> Result<DatastoreGuard, BackupError> {
        let started = Instant::now();
        let local = Arc::clone(&self.inner).lock_owned().await;

        let path = self.lock_path.clone();
        let file = tokio::task::spawn_blocking(move || {
            let file = open_lock_file(&path)?;
            file.lock_exclusive()?;
            Ok::<_, io::Error>(file)
        })
        .await
        .map_err(io::Error::other)
        .and_then(|r| r)
        .map_err(|e| BackupError::io(&self.lock_path, e))?;

        debug!(
            operation,
            waited_ms = started.elapsed().as_millis() as u64,
            "Datastore lock acquired"
        );
        Ok(DatastoreGuard::new(local, file, operation))
    }

    /// Take exclusive access only if nobody, in any process, holds it.
    pub fn try_acquire(
        &self,
        operation: &'static str,
    ) -> Result<Option<DatastoreGuard>, BackupError> {
        let Ok(local) = Arc::clone(&self.inner).try_lock_owned() else {
            return Ok(None);
        };
        let file =
            open_lock_file(&self.lock_path).map_err(|e| BackupError::io(&self.lock_path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(DatastoreGuard::new(local, file, operation))),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(BackupError::io(&self.lock_path, e)),
        }
    }

    /// Whether an operation in this process currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

/// `.<name>.lock` in the datastore's directory.
fn lock_path_for(datastore: &Path) -> PathBuf {
    let parent = datastore
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = datastore
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "datastore".to_string());
    parent.join(format!(".{name}.lock"))
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
}

/// Proof of exclusive access to the live datastore. Released on drop.
#[derive(Debug)]
pub struct DatastoreGuard {
    file: File,
    _local: OwnedMutexGuard<()>,
    operation: &'static str,
    acquired_at: Instant,
}

impl DatastoreGuard {
    fn new(local: OwnedMutexGuard<()>, file: File, operation: &'static str) -> Self {
        Self {
            file,
            _local: local,
            operation,
            acquired_at: Instant::now(),
        }
    }

    /// The operation holding the lock.
    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl Drop for DatastoreGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(
            operation = self.operation,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Datastore lock released"
        );
    }
}
