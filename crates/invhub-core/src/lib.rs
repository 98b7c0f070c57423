//! # invhub-core
//!
//! Core crate for InvHub. Contains the configuration schema and the
//! unified error system shared by the backup engine, service, API, and CLI.
//!
//! This crate has **no** internal dependencies on other InvHub crates.

pub mod config;
pub mod error;
pub mod result;

pub use error::AppError;
pub use result::AppResult;
