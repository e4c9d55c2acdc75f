//! API key verification on the merchant's hot path.
//!
//! Verification reads the store only. It never talks to the ledger and
//! never writes: an active record past its expiry reads as expired without
//! being rewritten.

use crate::error::BillingResult;
use casperflow_credential::ParsedKey;
use casperflow_store::SubscriptionStore;
use casperflow_types::{Clock, Identity, PlanId, SubscriptionState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Why a well-formed key does not grant access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    NotFound,
    Pending,
    Expired,
    Revoked,
    Failed,
}

impl DenialReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Pending => "pending",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of verifying a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<PlanId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Verification {
    fn denied(reason: DenialReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            plan_id: None,
            subscriber: None,
            expires_at: None,
        }
    }
}

/// Answers "is this key entitled right now?".
pub struct VerificationService {
    store: Arc<dyn SubscriptionStore>,
    clock: Arc<dyn Clock>,
}

impl VerificationService {
    pub fn new(store: Arc<dyn SubscriptionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Verifies a presented token.
    ///
    /// # Errors
    ///
    /// `MalformedKey` if the token fails format checks (no store lookup
    /// happens), or `Storage` if the store cannot be read.
    pub fn verify(&self, token: &str) -> BillingResult<Verification> {
        let key = ParsedKey::parse(token)?;
        let Some(record) = self.store.get(key.as_str())? else {
            debug!(key = %key.redacted(), "verification: unknown key");
            return Ok(Verification::denied(DenialReason::NotFound));
        };

        let reason = match record.effective_state(self.clock.now()) {
            SubscriptionState::Active => None,
            SubscriptionState::Pending => Some(DenialReason::Pending),
            SubscriptionState::Expired => Some(DenialReason::Expired),
            SubscriptionState::Revoked => Some(DenialReason::Revoked),
            SubscriptionState::Failed => Some(DenialReason::Failed),
        };
        debug!(key = %key.redacted(), valid = reason.is_none(), "verification");

        Ok(Verification {
            valid: reason.is_none(),
            reason,
            plan_id: Some(record.plan_id),
            subscriber: Some(record.subscriber),
            expires_at: record.expires_at,
        })
    }
}
