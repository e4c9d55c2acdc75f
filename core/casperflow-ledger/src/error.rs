//! Ledger client error types.

use thiserror::Error;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur while building or submitting deploys.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Key material cannot produce a valid signature.
    #[error("signing failed: {0}")]
    SigningFailure(String),

    /// A signature does not verify against the deploy hash and signer.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Deploy contents are inconsistent (e.g. hash does not match body).
    #[error("invalid deploy: {0}")]
    InvalidDeploy(String),

    /// No endpoint gave a definite answer.
    #[error("ledger unreachable: {0}")]
    Unreachable(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
