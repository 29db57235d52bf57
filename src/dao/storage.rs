use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A row with the same unique key already exists.
    #[error("a row already exists for `{key}`")]
    UniqueViolation { key: String },
    /// The stored row no longer matches the expected prior state.
    #[error("conditional write rejected for `{key}`")]
    Conflict { key: String },
    /// The row to update does not exist.
    #[error("no row found for `{key}`")]
    NotFound { key: String },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    pub fn unique_violation(key: impl Into<String>) -> Self {
        StorageError::UniqueViolation { key: key.into() }
    }

    pub fn conflict(key: impl Into<String>) -> Self {
        StorageError::Conflict { key: key.into() }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        StorageError::NotFound { key: key.into() }
    }

    /// Whether the error reflects a transport or backend outage rather than a
    /// rejected write.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable { .. })
    }
}
