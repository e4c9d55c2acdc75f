//! In-memory store.
//!
//! The index lives under one `RwLock`; every record sits behind its own
//! `Mutex`, so transitions on different subscriptions never contend and two
//! transitions on the same subscription are serialized.

use crate::error::{StoreError, StoreResult};
use crate::transition::{
    RecordRef, Transition, apply_cancel_renewal, apply_extend, apply_renewal, check_pending,
};
use crate::SubscriptionStore;
use casperflow_types::{Identity, SubscriptionRecord, SubscriptionState};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::debug;

type Slot = Arc<Mutex<SubscriptionRecord>>;

#[derive(Default)]
struct Index {
    by_key: HashMap<String, Slot>,
    /// Subscription and renewal transaction ids to API key.
    by_tx: HashMap<String, String>,
}

/// Process-local subscription store.
#[derive(Default)]
pub struct MemoryStore {
    index: RwLock<Index>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.index.read().map(|i| i.by_key.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, target: RecordRef<'_>) -> StoreResult<Slot> {
        let index = self.index.read().map_err(|_| poisoned())?;
        let key = match target {
            RecordRef::ApiKey(key) => key,
            RecordRef::Transaction(tx) => index
                .by_tx
                .get(tx)
                .map(String::as_str)
                .ok_or_else(|| StoreError::NotFound(target.to_string()))?,
        };
        index
            .by_key
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(target.to_string()))
    }

    fn update(
        &self,
        target: RecordRef<'_>,
        change: impl FnOnce(&mut SubscriptionRecord) -> StoreResult<()>,
    ) -> StoreResult<SubscriptionRecord> {
        let slot = self.slot(target)?;
        let mut record = lock(&slot)?;
        if !matches_target(&record, target) {
            return Err(StoreError::NotFound(target.to_string()));
        }
        // Apply to a copy so a rejected change leaves the record untouched.
        let mut next = record.clone();
        change(&mut next)?;
        let settled = record
            .renewal_transaction_id
            .clone()
            .filter(|tx| !matches_target(&next, RecordRef::Transaction(tx)));
        *record = next;
        let updated = record.clone();
        drop(record);

        if let Some(tx) = settled {
            self.forget_transaction(&tx, &slot)?;
        }
        Ok(updated)
    }

    /// Drops a settled renewal id from the tx index unless its record took
    /// it up again in the meantime.
    fn forget_transaction(&self, tx: &str, slot: &Slot) -> StoreResult<()> {
        let mut index = self.index.write().map_err(|_| poisoned())?;
        let record = lock(slot)?;
        let owned = index.by_tx.get(tx).is_some_and(|owner| *owner == record.api_key);
        if owned && !matches_target(&record, RecordRef::Transaction(tx)) {
            index.by_tx.remove(tx);
            debug!(key = %record.redacted_key(), "released settled renewal id");
        }
        Ok(())
    }

    /// Number of transaction ids the index resolves.
    pub fn tracked_transactions(&self) -> usize {
        self.index.read().map(|i| i.by_tx.len()).unwrap_or_default()
    }

    fn collect(&self, keep: impl Fn(&SubscriptionRecord) -> bool) -> StoreResult<Vec<SubscriptionRecord>> {
        let slots: Vec<Slot> = {
            let index = self.index.read().map_err(|_| poisoned())?;
            index.by_key.values().cloned().collect()
        };
        let mut out = Vec::new();
        for slot in slots {
            let record = lock(&slot)?;
            if keep(&record) {
                out.push(record.clone());
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.api_key.cmp(&b.api_key)));
        Ok(out)
    }
}

/// The tx index can briefly lag a settled renewal; only live ids count.
fn matches_target(record: &SubscriptionRecord, target: RecordRef<'_>) -> bool {
    match target {
        RecordRef::ApiKey(_) => true,
        RecordRef::Transaction(tx) => {
            record.transaction_id.as_deref() == Some(tx)
                || record.renewal_transaction_id.as_deref() == Some(tx)
        }
    }
}

fn lock(slot: &Slot) -> StoreResult<MutexGuard<'_, SubscriptionRecord>> {
    slot.lock().map_err(|_| poisoned())
}

fn poisoned() -> StoreError {
    StoreError::Storage("lock poisoned".to_string())
}

impl SubscriptionStore for MemoryStore {
    fn put_pending(&self, record: SubscriptionRecord) -> StoreResult<()> {
        check_pending(&record)?;
        let mut index = self.index.write().map_err(|_| poisoned())?;
        if index.by_key.contains_key(&record.api_key) {
            return Err(StoreError::DuplicateKey(record.redacted_key()));
        }
        if let Some(tx) = &record.transaction_id {
            if index.by_tx.contains_key(tx) {
                return Err(StoreError::DuplicateTransaction(tx.clone()));
            }
            index.by_tx.insert(tx.clone(), record.api_key.clone());
        }
        debug!(key = %record.redacted_key(), plan = %record.plan_id, "stored pending subscription");
        index
            .by_key
            .insert(record.api_key.clone(), Arc::new(Mutex::new(record)));
        Ok(())
    }

    fn transition(
        &self,
        target: RecordRef<'_>,
        transition: Transition,
    ) -> StoreResult<SubscriptionRecord> {
        let record = self.update(target, |r| transition.apply(r))?;
        debug!(%target, to = %record.state, "subscription transitioned");
        Ok(record)
    }

    fn extend(
        &self,
        api_key: &str,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<SubscriptionRecord> {
        self.update(RecordRef::ApiKey(api_key), |r| apply_extend(r, expires_at, at))
    }

    fn begin_renewal(
        &self,
        api_key: &str,
        transaction_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<SubscriptionRecord> {
        // Hold the index write lock so the tx mapping and record agree.
        let mut index = self.index.write().map_err(|_| poisoned())?;
        if let Some(owner) = index.by_tx.get(transaction_id) {
            if owner != api_key {
                return Err(StoreError::DuplicateTransaction(transaction_id.to_string()));
            }
        }
        let slot = index
            .by_key
            .get(api_key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(RecordRef::ApiKey(api_key).to_string()))?;
        let mut record = lock(&slot)?;
        let mut next = record.clone();
        apply_renewal(&mut next, transaction_id, at)?;
        *record = next;
        index
            .by_tx
            .insert(transaction_id.to_string(), api_key.to_string());
        Ok(record.clone())
    }

    fn cancel_renewal(
        &self,
        api_key: &str,
        transaction_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<SubscriptionRecord> {
        self.update(RecordRef::ApiKey(api_key), |r| {
            apply_cancel_renewal(r, transaction_id, at)
        })
    }

    fn get(&self, api_key: &str) -> StoreResult<Option<SubscriptionRecord>> {
        match self.slot(RecordRef::ApiKey(api_key)) {
            Ok(slot) => Ok(Some(lock(&slot)?.clone())),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn find_by_transaction(&self, transaction_id: &str) -> StoreResult<Option<SubscriptionRecord>> {
        let target = RecordRef::Transaction(transaction_id);
        match self.slot(target) {
            Ok(slot) => {
                let record = lock(&slot)?;
                Ok(matches_target(&record, target).then(|| record.clone()))
            }
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list_by_state(&self, state: SubscriptionState) -> StoreResult<Vec<SubscriptionRecord>> {
        self.collect(|r| r.state == state)
    }

    fn list_by_subscriber(&self, subscriber: &Identity) -> StoreResult<Vec<SubscriptionRecord>> {
        self.collect(|r| &r.subscriber == subscriber)
    }
}
