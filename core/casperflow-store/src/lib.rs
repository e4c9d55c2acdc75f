//! Subscription state storage.
//!
//! Records are keyed by API key and also reachable through the ledger
//! transaction that created (or is renewing) them. State changes go
//! through [`SubscriptionStore::transition`], which enforces:
//!
//! ```text
//! Pending -> Active -> Expired
//! Pending -> Failed
//! Pending | Active -> Revoked
//! ```
//!
//! Two backends ship: [`MemoryStore`] and [`SqliteStore`].

mod error;
mod memory;
mod sqlite;
mod transition;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use transition::{RecordRef, Transition};

use casperflow_types::{Identity, SubscriptionRecord, SubscriptionState};
use chrono::{DateTime, Utc};

/// Storage for subscription records. Every method is linearizable per
/// record.
pub trait SubscriptionStore: Send + Sync {
    /// Inserts a new pending record.
    ///
    /// Fails with `DuplicateKey` if the API key exists and
    /// `DuplicateTransaction` if another record tracks the same transaction.
    fn put_pending(&self, record: SubscriptionRecord) -> StoreResult<()>;

    /// Applies a state transition, returning the updated record.
    fn transition(
        &self,
        target: RecordRef<'_>,
        transition: Transition,
    ) -> StoreResult<SubscriptionRecord>;

    /// Moves an active record's expiry forward and clears its pending
    /// renewal. The new expiry must be later than the current one.
    fn extend(
        &self,
        api_key: &str,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<SubscriptionRecord>;

    /// Tags an active record with an in-flight renewal transaction.
    ///
    /// Fails with `RenewalInFlight` if the record already carries a
    /// different renewal, and `DuplicateTransaction` if another record
    /// tracks `transaction_id`.
    fn begin_renewal(
        &self,
        api_key: &str,
        transaction_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<SubscriptionRecord>;

    /// Clears an in-flight renewal that failed on chain.
    fn cancel_renewal(
        &self,
        api_key: &str,
        transaction_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<SubscriptionRecord>;

    fn get(&self, api_key: &str) -> StoreResult<Option<SubscriptionRecord>>;

    /// Looks up by subscription or renewal transaction id.
    fn find_by_transaction(&self, transaction_id: &str) -> StoreResult<Option<SubscriptionRecord>>;

    /// Records whose stored state is `state`, oldest first.
    fn list_by_state(&self, state: SubscriptionState) -> StoreResult<Vec<SubscriptionRecord>>;

    fn list_by_subscriber(&self, subscriber: &Identity) -> StoreResult<Vec<SubscriptionRecord>>;
}
