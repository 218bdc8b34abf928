//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur when constructing domain values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The application handle cannot be used to name OS resources
    #[error("Invalid application handle {handle:?}: {reason}")]
    InvalidHandle { handle: String, reason: String },

    /// Message handles must not be empty
    #[error("Message handle must not be empty")]
    EmptyMessageHandle,
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
