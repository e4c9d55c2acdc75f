//! Record addressing and state transitions shared by every backend.

use crate::error::{StoreError, StoreResult};
use casperflow_types::{SubscriptionRecord, SubscriptionState};
use chrono::{DateTime, Utc};
use std::fmt;

/// Addresses a record by API key or by its subscription transaction.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum RecordRef<'a> {
    ApiKey(&'a str),
    Transaction(&'a str),
}

impl fmt::Debug for RecordRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for RecordRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(key) => {
                let visible: String = key.chars().take(10).collect();
                write!(f, "key {visible}…")
            }
            Self::Transaction(tx) => write!(f, "tx {tx}"),
        }
    }
}

/// A requested state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub to: SubscriptionState,
    /// When the change happened; becomes `updated_at`.
    pub at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Transition {
    fn to(to: SubscriptionState, at: DateTime<Utc>) -> Self {
        Self {
            to,
            at,
            activated_at: None,
            expires_at: None,
            failure_reason: None,
        }
    }

    /// `Pending -> Active` with the confirmed validity window.
    #[must_use]
    pub fn activate(activated_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            activated_at: Some(activated_at),
            expires_at: Some(expires_at),
            ..Self::to(SubscriptionState::Active, activated_at)
        }
    }

    /// `Pending -> Failed`.
    #[must_use]
    pub fn fail(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            failure_reason: Some(reason.into()),
            ..Self::to(SubscriptionState::Failed, at)
        }
    }

    /// `Active -> Expired`.
    #[must_use]
    pub fn expire(at: DateTime<Utc>) -> Self {
        Self::to(SubscriptionState::Expired, at)
    }

    /// `Pending | Active -> Revoked`.
    #[must_use]
    pub fn revoke(at: DateTime<Utc>) -> Self {
        Self::to(SubscriptionState::Revoked, at)
    }

    /// Checks the state machine and applies the change in place.
    pub(crate) fn apply(&self, record: &mut SubscriptionRecord) -> StoreResult<()> {
        if !record.state.can_transition_to(self.to) {
            return Err(StoreError::InvalidTransition {
                from: record.state,
                to: self.to,
            });
        }

        match self.to {
            SubscriptionState::Active => {
                let expires_at = self.expires_at.ok_or_else(|| {
                    StoreError::InvalidRecord("activation requires an expiry".to_string())
                })?;
                let activated_at = self.activated_at.unwrap_or(self.at);
                if expires_at <= activated_at {
                    return Err(StoreError::InvalidRecord(
                        "expiry must be after activation".to_string(),
                    ));
                }
                record.activated_at = Some(activated_at);
                record.expires_at = Some(expires_at);
            }
            SubscriptionState::Failed | SubscriptionState::Revoked => {
                if self.failure_reason.is_some() {
                    record.failure_reason.clone_from(&self.failure_reason);
                }
                record.renewal_transaction_id = None;
            }
            SubscriptionState::Expired | SubscriptionState::Pending => {}
        }

        record.state = self.to;
        record.updated_at = self.at;
        Ok(())
    }
}

/// Moves an active record's expiry forward and settles any pending renewal.
pub(crate) fn apply_extend(
    record: &mut SubscriptionRecord,
    expires_at: DateTime<Utc>,
    at: DateTime<Utc>,
) -> StoreResult<()> {
    require_active(record)?;
    if record.expires_at.is_some_and(|current| expires_at <= current) {
        return Err(StoreError::InvalidRecord(
            "renewed expiry must be later than the current one".to_string(),
        ));
    }
    record.expires_at = Some(expires_at);
    record.renewal_transaction_id = None;
    record.updated_at = at;
    Ok(())
}

/// Records an in-flight renewal transaction on an active record. A record
/// carries at most one; recording the same id again is a no-op.
pub(crate) fn apply_renewal(
    record: &mut SubscriptionRecord,
    transaction_id: &str,
    at: DateTime<Utc>,
) -> StoreResult<()> {
    require_active(record)?;
    match record.renewal_transaction_id.as_deref() {
        Some(current) if current == transaction_id => return Ok(()),
        Some(current) => return Err(StoreError::RenewalInFlight(current.to_string())),
        None => {}
    }
    record.renewal_transaction_id = Some(transaction_id.to_string());
    record.updated_at = at;
    Ok(())
}

/// Drops a renewal the ledger refused. The record keeps its current term.
pub(crate) fn apply_cancel_renewal(
    record: &mut SubscriptionRecord,
    transaction_id: &str,
    at: DateTime<Utc>,
) -> StoreResult<()> {
    if record.renewal_transaction_id.as_deref() != Some(transaction_id) {
        return Err(StoreError::NotFound(format!("renewal {transaction_id}")));
    }
    record.renewal_transaction_id = None;
    record.updated_at = at;
    Ok(())
}

fn require_active(record: &SubscriptionRecord) -> StoreResult<()> {
    if record.state == SubscriptionState::Active {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            from: record.state,
            to: SubscriptionState::Active,
        })
    }
}

/// Validates a record before first insertion.
pub(crate) fn check_pending(record: &SubscriptionRecord) -> StoreResult<()> {
    if record.state != SubscriptionState::Pending {
        return Err(StoreError::InvalidRecord(format!(
            "new records must be pending, got {}",
            record.state
        )));
    }
    if record.api_key.is_empty() {
        return Err(StoreError::InvalidRecord("empty api key".to_string()));
    }
    Ok(())
}
