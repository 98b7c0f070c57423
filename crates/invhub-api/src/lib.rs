//! # invhub-api
//!
//! HTTP admin API for InvHub backups built on Axum.
//!
//! Exposes snapshot creation, listing, verification, download, restore, and
//! deletion under `/api/admin/backups`, plus a liveness probe. Provides the
//! admin actor extractor, middleware (CORS, compression, request logging),
//! and the mapping from `AppError` to HTTP responses.

pub mod dto;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use router::build_router;
pub use state::AppState;
