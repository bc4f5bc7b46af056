//! Error types for the promptly core library.

use thiserror::Error;

/// Top-level error type for core operations.
#[derive(Error, Debug)]
pub enum PromptlyError {
    /// Configuration could not be parsed or violates an invariant.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller-supplied data failed validation.
    #[error("Invalid input: {field}: {reason}")]
    InvalidInput {
        /// Which input field was rejected.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PromptlyError {
    /// Shorthand for an [`PromptlyError::InvalidInput`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, PromptlyError>;
