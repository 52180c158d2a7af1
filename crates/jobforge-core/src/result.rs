//! Result alias shared by every JobForge crate.

use crate::error::AppError;

/// `Result` specialized to [`AppError`], used by the store, the engine and
/// the server binary alike.
pub type AppResult<T> = Result<T, AppError>;
