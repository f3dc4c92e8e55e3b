use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or answered with a hard failure.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Human-readable description of the failing operation.
        message: String,
        /// Backend-specific cause.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A compare-and-update collided with a concurrent write. Safe to retry
    /// from a fresh read.
    #[error("concurrent write conflict on room `{code}`")]
    Conflict {
        /// Code of the room whose bundle was modified underneath the writer.
        code: String,
    },
    /// The addressed room does not exist.
    #[error("room `{code}` not found")]
    NotFound {
        /// Code of the missing room.
        code: String,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a conflict error for the given room code.
    pub fn conflict(code: impl Into<String>) -> Self {
        StorageError::Conflict { code: code.into() }
    }

    /// Construct a not-found error for the given room code.
    pub fn not_found(code: impl Into<String>) -> Self {
        StorageError::NotFound { code: code.into() }
    }
}
