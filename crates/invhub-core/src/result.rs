//! Convenience result type alias for InvHub.

use crate::error::AppError;

/// A specialized `Result` type for InvHub operations.
pub type AppResult<T> = Result<T, AppError>;
