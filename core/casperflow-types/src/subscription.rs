//! Subscription requests and records.

use crate::{Error, Identity, PlanId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An unsigned intent to subscribe. The nonce makes resubmission idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub subscriber: Identity,
    pub plan_id: PlanId,
    pub requested_at: DateTime<Utc>,
    pub nonce: u64,
}

impl SubscriptionRequest {
    #[must_use]
    pub fn new(subscriber: Identity, plan_id: PlanId, nonce: u64) -> Self {
        Self {
            subscriber,
            plan_id,
            requested_at: Utc::now(),
            nonce,
        }
    }
}

/// Lifecycle state of a subscription record.
///
/// `Pending -> Active -> Expired`, `Pending | Active -> Revoked`, and
/// `Pending -> Failed` when the ledger reports the transaction failed.
/// `Expired`, `Revoked` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    Pending,
    Active,
    Expired,
    Revoked,
    Failed,
}

impl SubscriptionState {
    /// Returns true if no transition out of this state is allowed.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Revoked | Self::Failed)
    }

    /// Returns true if the state machine permits `self -> to`.
    #[must_use]
    pub const fn can_transition_to(&self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Active)
                | (Self::Pending, Self::Failed)
                | (Self::Active, Self::Expired)
                | (Self::Pending, Self::Revoked)
                | (Self::Active, Self::Revoked)
        )
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "revoked" => Ok(Self::Revoked),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidState(other.to_string())),
        }
    }
}

/// The stored state of one subscription, keyed by API key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub api_key: String,
    pub subscriber: Identity,
    pub plan_id: PlanId,
    pub state: SubscriptionState,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Transaction of an in-flight renewal, cleared once it settles.
    #[serde(default)]
    pub renewal_transaction_id: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// A freshly submitted subscription awaiting ledger confirmation.
    #[must_use]
    pub fn pending(
        api_key: impl Into<String>,
        subscriber: Identity,
        plan_id: PlanId,
        transaction_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            subscriber,
            plan_id,
            state: SubscriptionState::Pending,
            activated_at: None,
            expires_at: None,
            transaction_id,
            renewal_transaction_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if the record is stored as active but its expiry has
    /// passed at `now`.
    #[must_use]
    pub fn is_lapsed_at(&self, now: DateTime<Utc>) -> bool {
        self.state == SubscriptionState::Active && self.expires_at.is_none_or(|exp| now >= exp)
    }

    /// The state as seen at `now`, applying lazy expiry. Never mutates.
    #[must_use]
    pub fn effective_state(&self, now: DateTime<Utc>) -> SubscriptionState {
        if self.is_lapsed_at(now) {
            SubscriptionState::Expired
        } else {
            self.state
        }
    }

    /// Key prefix safe to write to logs.
    #[must_use]
    pub fn redacted_key(&self) -> String {
        let visible: String = self.api_key.chars().take(10).collect();
        format!("{visible}…")
    }
}

impl fmt::Debug for SubscriptionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRecord")
            .field("api_key", &self.redacted_key())
            .field("subscriber", &self.subscriber.short(4))
            .field("plan_id", &self.plan_id)
            .field("state", &self.state)
            .field("activated_at", &self.activated_at)
            .field("expires_at", &self.expires_at)
            .field("transaction_id", &self.transaction_id)
            .field("renewal_transaction_id", &self.renewal_transaction_id)
            .field("failure_reason", &self.failure_reason)
            .finish()
    }
}
