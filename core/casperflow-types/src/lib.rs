//! Core type definitions for CasperFlow settlement.
//!
//! This crate defines the types shared by every layer of the settlement core:
//! - Wallet identities (tagged public keys, Casper hex encoding)
//! - On-chain amounts in motes
//! - Subscription plans and billing periods
//! - Subscription requests, states, and records
//! - A clock abstraction so expiry checks can be driven from tests
//!
//! Nothing here performs I/O.

pub mod clock;
mod amount;
mod identity;
mod plan;
mod subscription;

pub use amount::{Motes, MOTES_PER_CSPR};
pub use clock::{Clock, FixedClock, SystemClock};
pub use identity::{Identity, KeyAlgorithm};
pub use plan::{BillingPeriod, NewPlan, Plan, PlanId, SECONDS_PER_DAY};
pub use subscription::{SubscriptionRecord, SubscriptionRequest, SubscriptionState};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("invalid subscription state: {0}")]
    InvalidState(String),
}
