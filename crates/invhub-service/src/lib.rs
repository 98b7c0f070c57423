//! # invhub-service
//!
//! Service layer for InvHub administration. Services bind the acting
//! administrator to backup engine calls and convert engine errors into
//! `AppError` for the API and CLI.

pub mod backup;
pub mod context;

pub use backup::{ArchiveDownload, BackupService, RESTART_NOTICE, RestoreReport, VerificationReport};
pub use context::AdminContext;
