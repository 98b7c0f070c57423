//! # invhub-backup
//!
//! Point-in-time, integrity-verified snapshots of the InvHub datastore.
//!
//! The crate is organised around the components that operate on a single
//! Archive Store directory and a single live datastore file:
//!
//! - [`store::ArchiveStore`] : on-disk layout of archives and sidecars.
//! - [`builder::SnapshotBuilder`] : copy, compress, checksum, describe.
//! - [`catalog::CatalogReader`] : newest-first listing of snapshots.
//! - [`verifier::IntegrityVerifier`] : recompute and compare archive digests.
//! - [`restore::RestoreExecutor`] : verify, decompress, atomically swap.
//! - [`retention::RetentionManager`] : remove a snapshot and its sidecars.
//!
//! [`BackupManager`] wires them together with an explicit
//! [`lock::DatastoreLock`] so that a restore never overlaps another restore
//! or a snapshot's read of the live datastore.

pub mod builder;
pub mod catalog;
pub mod checksum;
pub mod error;
pub mod lock;
pub mod manager;
pub mod restore;
pub mod retention;
pub mod snapshot;
pub mod store;
pub mod verifier;

pub use error::BackupError;
pub use lock::{DatastoreGuard, DatastoreLock};
pub use manager::{ArchiveHandle, BackupManager};
pub use restore::{RestoreOutcome, RestorePhase};
pub use retention::DeleteReport;
pub use snapshot::{IntegrityStatus, Snapshot, SnapshotMetadata, SnapshotName};
pub use verifier::Verification;
