//! Error types for flowgate.
//!
//! Errors are classified by kind, not by concrete type: the retry executor
//! only asks an error for its [`ErrorCategory`] when deciding whether another
//! attempt is worth making.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for flowgate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// flowgate error types.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation error: {0}")]
    Operation(String),

    #[error("Batch cancelled")]
    Cancelled,

    #[error("Item {index} failed: {source}")]
    ItemFailed {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Shorthand for a runtime fault that is expected to clear on retry.
    pub fn transient(msg: impl Into<String>) -> Self {
        Error::Transient(msg.into())
    }

    /// Shorthand for a failure that retrying cannot fix.
    pub fn operation(msg: impl Into<String>) -> Self {
        Error::Operation(msg.into())
    }

    /// Get the error code for machine parsing.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Timeout(_) => "TIMEOUT",
            Error::Io(_) => "IO_ERROR",
            Error::Transient(_) => "TRANSIENT_ERROR",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Operation(_) => "OPERATION_ERROR",
            Error::Cancelled => "CANCELLED",
            Error::ItemFailed { .. } => "ITEM_FAILED",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Toml(_) => "TOML_ERROR",
        }
    }

    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Timeout(_) | Error::Io(_) | Error::Transient(_) => ErrorCategory::Transient,
            Error::InvalidRequest(_) | Error::Config(_) | Error::Toml(_) => {
                ErrorCategory::ClientError
            }
            Error::Cancelled => ErrorCategory::Cancelled,
            Error::Operation(_) | Error::ItemFailed { .. } | Error::Internal(_) => {
                ErrorCategory::Permanent
            }
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

/// Error categories used to drive retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Timeout or I/O/runtime fault - may succeed on retry.
    Transient,
    /// Invalid request or configuration.
    /// Do not retry without fixing the request.
    ClientError,
    /// Unclassified failure - surfaced without consuming retry budget.
    Permanent,
    /// The caller cancelled the work.
    Cancelled,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::ClientError => write!(f, "client_error"),
            ErrorCategory::Permanent => write!(f, "permanent"),
            ErrorCategory::Cancelled => write!(f, "cancelled"),
        }
    }
}
