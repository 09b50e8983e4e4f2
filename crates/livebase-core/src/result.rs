//! Convenience result type alias for Livebase.

use crate::error::AppError;

/// A specialized `Result` type for Livebase operations.
pub type AppResult<T> = Result<T, AppError>;
