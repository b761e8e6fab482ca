//! Error types and result aliases for Lokr operations.
//!
//! Provides a unified error type that covers every failure the vault core can
//! surface to its callers, with actionable messages.

use thiserror::Error;

/// Unified error type for all Lokr operations
#[derive(Error, Debug)]
pub enum LokrError {
    // Validation errors
    #[error("Invalid file size: {size} bytes (files must not be empty)")]
    InvalidSize { size: u64 },

    #[error("Content type mismatch: declared '{declared}', detected '{detected}'")]
    MimeMismatch { declared: String, detected: String },

    #[error("Invalid value for '{field}': {reason}")]
    Validation { field: String, reason: String },

    // Quota errors
    #[error("Quota exceeded for user '{user}': requested {requested} bytes, {available} bytes available")]
    QuotaExceeded {
        user: String,
        requested: u64,
        available: u64,
    },

    // Lookup and authorization errors
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Forbidden: {action} access to {resource}")]
    Forbidden { action: String, resource: String },

    #[error("Already exists: {resource}")]
    AlreadyExists { resource: String },

    // Storage errors
    #[error("Storage failure: {message}")]
    StorageFailure {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Consistency failure: {message}")]
    ConsistencyFailure { message: String },

    // Config errors
    #[error("Failed to parse lokr.toml: {message}")]
    ConfigParse { message: String },

    #[error("Configuration field '{field}' is invalid: {reason}")]
    ConfigValidation { field: String, reason: String },

    // IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for Lokr operations
pub type LokrResult<T> = Result<T, LokrError>;

impl LokrError {
    /// Create a storage failure wrapping any underlying error
    pub fn storage<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::StorageFailure {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an IO error from std::io::Error
    pub fn io(message: String, source: std::io::Error) -> Self {
        Self::Io { message, source }
    }

    /// Create a not-found error for the given resource description
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a forbidden error
    pub fn forbidden(action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::Forbidden {
            action: action.into(),
            resource: resource.into(),
        }
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Validation failures: bad size, bad MIME, bad field
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LokrError::InvalidSize { .. } | LokrError::MimeMismatch { .. } | LokrError::Validation { .. }
        )
    }

    /// Check if this error is recoverable by retrying the operation
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LokrError::StorageFailure { .. } | LokrError::Io { .. })
    }

    /// Get a user-friendly suggestion for fixing this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            LokrError::InvalidSize { .. } => Some("Empty files cannot be stored"),
            LokrError::MimeMismatch { .. } => {
                Some("Declare the content type that matches the file's actual contents")
            },
            LokrError::QuotaExceeded { .. } => {
                Some("Delete files you no longer need or ask for a larger quota")
            },
            LokrError::Forbidden { .. } => {
                Some("Ask the file owner to share the file with the required permission")
            },
            LokrError::StorageFailure { .. } => {
                Some("The storage backend may be unavailable; try again shortly")
            },
            LokrError::ConsistencyFailure { .. } => Some("Run 'lokr reconcile' to repair metadata"),
            LokrError::ConfigValidation { .. } | LokrError::ConfigParse { .. } => {
                Some("Check lokr.toml and LOKR_* environment variables")
            },
            _ => None,
        }
    }
}
