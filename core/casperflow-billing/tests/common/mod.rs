//! Shared fixtures for billing tests.

#![allow(dead_code)]

use casperflow_billing::{PlanCatalog, SettlementOrchestrator, VerificationService};
use casperflow_ledger::mock::MockLedgerRpc;
use casperflow_ledger::{LedgerClient, LedgerConfig, SignerKeys};
use casperflow_store::{
    MemoryStore, RecordRef, StoreResult, SubscriptionStore, Transition,
};
use casperflow_types::{
    FixedClock, Identity, PlanId, SubscriptionRecord, SubscriptionRequest, SubscriptionState,
};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

pub const NODE: &str = "node";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
}

pub fn subscriber_keys() -> SignerKeys {
    SignerKeys::ed25519_from_seed([
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24,
        25, 26, 27, 28, 29, 30, 31, 32,
    ])
}

pub fn merchant_keys() -> SignerKeys {
    SignerKeys::ed25519_from_seed([7; 32])
}

pub fn subscriber() -> Identity {
    subscriber_keys().identity().unwrap()
}

pub fn merchant() -> Identity {
    merchant_keys().identity().unwrap()
}

pub fn pro_plan() -> PlanId {
    PlanId::parse("plan_demo_pro").unwrap()
}

pub fn request(nonce: u64) -> SubscriptionRequest {
    SubscriptionRequest {
        subscriber: subscriber(),
        plan_id: pro_plan(),
        requested_at: t0(),
        nonce,
    }
}

pub struct Fixture {
    pub orchestrator: Arc<SettlementOrchestrator>,
    pub verifier: VerificationService,
    pub store: Arc<MemoryStore>,
    pub catalog: Arc<PlanCatalog>,
    pub clock: Arc<FixedClock>,
}

/// Orchestrator over a scripted transport with one endpoint, `NODE`.
pub fn fixture(rpc: Arc<MockLedgerRpc>) -> Fixture {
    let config = LedgerConfig {
        endpoints: vec![NODE.to_string()],
        ..Default::default()
    };
    fixture_with_client(LedgerClient::with_rpc(config, rpc).unwrap())
}

pub fn fixture_with_client(client: LedgerClient) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(FixedClock::new(t0()));
    let catalog = Arc::new(PlanCatalog::with_demo_plans(merchant(), t0()).unwrap());
    let orchestrator = Arc::new(SettlementOrchestrator::new(
        Arc::new(client),
        store.clone(),
        catalog.clone(),
        clock.clone(),
    ));
    let verifier = VerificationService::new(store.clone(), clock.clone());
    Fixture {
        orchestrator,
        verifier,
        store,
        catalog,
        clock,
    }
}

/// Transaction id the fixture's ledger client computes for a request.
pub fn tx_id(fixture: &Fixture, nonce: u64) -> String {
    fixture
        .orchestrator
        .ledger()
        .build(&request(nonce), &subscriber_keys())
        .unwrap()
        .transaction_id()
}

/// Wraps a store, counting `get` calls and noting the thread of every call.
pub struct CountingStore {
    inner: MemoryStore,
    gets: AtomicUsize,
    threads: Mutex<Vec<ThreadId>>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            gets: AtomicUsize::new(0),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Total calls of any kind.
    pub fn calls(&self) -> usize {
        self.threads.lock().unwrap().len()
    }

    /// Calls made from `thread`.
    pub fn calls_on(&self, thread: ThreadId) -> usize {
        self.threads
            .lock()
            .unwrap()
            .iter()
            .filter(|t| **t == thread)
            .count()
    }

    fn seen(&self) {
        self.threads.lock().unwrap().push(thread::current().id());
    }
}

impl SubscriptionStore for CountingStore {
    fn put_pending(&self, record: SubscriptionRecord) -> StoreResult<()> {
        self.seen();
        self.inner.put_pending(record)
    }

    fn transition(
        &self,
        target: RecordRef<'_>,
        transition: Transition,
    ) -> StoreResult<SubscriptionRecord> {
        self.seen();
        self.inner.transition(target, transition)
    }

    fn extend(
        &self,
        api_key: &str,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<SubscriptionRecord> {
        self.seen();
        self.inner.extend(api_key, expires_at, at)
    }

    fn begin_renewal(
        &self,
        api_key: &str,
        transaction_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<SubscriptionRecord> {
        self.seen();
        self.inner.begin_renewal(api_key, transaction_id, at)
    }

    fn cancel_renewal(
        &self,
        api_key: &str,
        transaction_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<SubscriptionRecord> {
        self.seen();
        self.inner.cancel_renewal(api_key, transaction_id, at)
    }

    fn get(&self, api_key: &str) -> StoreResult<Option<SubscriptionRecord>> {
        self.seen();
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(api_key)
    }

    fn find_by_transaction(&self, transaction_id: &str) -> StoreResult<Option<SubscriptionRecord>> {
        self.seen();
        self.inner.find_by_transaction(transaction_id)
    }

    fn list_by_state(&self, state: SubscriptionState) -> StoreResult<Vec<SubscriptionRecord>> {
        self.seen();
        self.inner.list_by_state(state)
    }

    fn list_by_subscriber(&self, subscriber: &Identity) -> StoreResult<Vec<SubscriptionRecord>> {
        self.seen();
        self.inner.list_by_subscriber(subscriber)
    }
}
