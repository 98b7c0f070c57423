//! Snapshot administration.

pub mod service;

pub use service::{
    ArchiveDownload, BackupService, RESTART_NOTICE, RestoreReport, VerificationReport,
};
