//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Boxed error type used to carry backend-native failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Storage and upload errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No backend rule matched the construction input. Fatal.
    #[error("Unrecognized backend: {0}")]
    UnrecognizedBackend(String),

    /// A validator failed with an error (distinct from a rejection).
    #[error("Validation error: {0}")]
    Validation(#[from] crate::ValidationError),

    /// A transfer failed. The backend-native error is preserved as the
    /// source so callers can downcast and branch on it.
    #[error("Transfer failed: {source}")]
    Transfer {
        /// The originating backend error, unwrapped and unretried.
        #[source]
        source: BoxError,
    },

    /// A delete failed. Not-found is never reported through this variant.
    #[error("Delete failed: {source}")]
    Delete {
        /// The originating backend error.
        #[source]
        source: BoxError,
    },

    /// A backend answered but its response was unusable.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Multipart parsing error.
    #[error("Multipart error: {0}")]
    Multipart(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Wrap a backend-native transfer failure.
    pub fn transfer(source: impl Into<BoxError>) -> Self {
        Self::Transfer {
            source: source.into(),
        }
    }

    /// Wrap a backend-native delete failure.
    pub fn delete(source: impl Into<BoxError>) -> Self {
        Self::Delete {
            source: source.into(),
        }
    }

    /// Check if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Convert to HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Multipart(_) => 400,
            Self::UnrecognizedBackend(_) | Self::Config(_) => 500,
            _ => 502,
        }
    }
}

impl From<multer::Error> for StorageError {
    fn from(err: multer::Error) -> Self {
        Self::Multipart(err.to_string())
    }
}
