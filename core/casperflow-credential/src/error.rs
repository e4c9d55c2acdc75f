//! Error types for the credential module.

use thiserror::Error;

/// Credential-specific errors.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Token does not have the shape of an API key.
    #[error("malformed API key: {0}")]
    MalformedKey(String),

    /// The OS random source failed.
    #[error("entropy source failed: {0}")]
    Entropy(String),
}

/// Result type for credential operations.
pub type CredentialResult<T> = Result<T, CredentialError>;
