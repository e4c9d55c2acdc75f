//! Store error types.

use casperflow_types::SubscriptionState;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by [`SubscriptionStore`](crate::SubscriptionStore) backends.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("subscription not found: {0}")]
    NotFound(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: SubscriptionState,
        to: SubscriptionState,
    },

    /// The API key is already stored. Carries the redacted key.
    #[error("duplicate api key: {0}")]
    DuplicateKey(String),

    /// Another record already tracks this transaction.
    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(String),

    /// The record already has a different renewal awaiting settlement.
    #[error("renewal already in flight: {0}")]
    RenewalInFlight(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("storage error: {0}")]
    Storage(String),
}
