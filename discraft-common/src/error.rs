//! Error types for Discraft.

use thiserror::Error;

/// Result type alias using the Discraft error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for Discraft.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed settings, circular language fallback, missing language files
    #[error("Configuration error: {0}")]
    Config(String),

    /// Already registered, link already in progress, duplicate command label
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid input or request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Backing store call failed
    #[error("Store error: {0}")]
    Store(String),

    /// Backing store temporarily unavailable (busy, locked)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if this is a conflict error.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::WithContext { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    /// Check if the failure is transient and the call may be retried once.
    ///
    /// Timeouts are not transient: the timed-out call may still complete.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::StoreUnavailable(_) => true,
            Self::WithContext { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Conflict(_) => 409,
            Self::InvalidInput(_) => 400,
            Self::StoreUnavailable(_) => 503,
            Self::Timeout => 504,
            Self::WithContext { source, .. } => source.status_code(),
            _ => 500,
        }
    }
}

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}
