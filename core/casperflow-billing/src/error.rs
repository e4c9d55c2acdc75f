//! Billing error types.

use casperflow_credential::CredentialError;
use casperflow_ledger::{LedgerError, RejectionReason};
use casperflow_store::StoreError;
use casperflow_types::SubscriptionState;
use thiserror::Error;

/// Result type for billing operations.
pub type BillingResult<T> = Result<T, BillingError>;

/// Errors surfaced by settlement, verification and reconciliation.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("malformed API key: {0}")]
    MalformedKey(String),

    #[error("subscription not found: {0}")]
    NotFound(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: SubscriptionState,
        to: SubscriptionState,
    },

    #[error("signing failed: {0}")]
    SigningFailure(String),

    /// The ledger definitively refused the transaction.
    #[error("transaction rejected: {0}")]
    TerminalRejection(RejectionReason),

    /// No endpoint gave a definite answer. Safe to retry with the same nonce.
    #[error("ledger unreachable: {0}")]
    Unreachable(String),

    #[error("plan not found: {0}")]
    PlanNotFound(String),

    #[error("plan is deprecated: {0}")]
    PlanDeprecated(String),

    /// A record with the same key or transaction already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl BillingError {
    /// Returns true if retrying the same operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

impl From<CredentialError> for BillingError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::MalformedKey(msg) => Self::MalformedKey(msg),
            CredentialError::Entropy(msg) => Self::KeyGeneration(msg),
        }
    }
}

impl From<StoreError> for BillingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
            StoreError::DuplicateKey(_)
            | StoreError::DuplicateTransaction(_)
            | StoreError::RenewalInFlight(_) => {
                Self::Conflict(e.to_string())
            }
            StoreError::InvalidRecord(msg) => Self::InvalidInput(msg),
            StoreError::Storage(msg) => Self::Storage(msg),
        }
    }
}

impl From<LedgerError> for BillingError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::SigningFailure(msg) | LedgerError::InvalidSignature(msg) => {
                Self::SigningFailure(msg)
            }
            LedgerError::Unreachable(msg) => Self::Unreachable(msg),
            other => Self::Ledger(other.to_string()),
        }
    }
}

impl From<casperflow_types::Error> for BillingError {
    fn from(e: casperflow_types::Error) -> Self {
        Self::InvalidInput(e.to_string())
    }
}
