//! Shared fixtures for gateway tests.

#![allow(dead_code)]

use casperflow_billing::{PlanCatalog, SettlementOrchestrator, VerificationService};
use casperflow_gateway::{AppState, build_router};
use casperflow_ledger::mock::{MockLedgerRpc, MockReply};
use casperflow_ledger::{LedgerClient, LedgerConfig, SignerKeys};
use casperflow_store::{MemoryStore, RecordRef, StoreResult, SubscriptionStore, Transition};
use casperflow_types::{
    FixedClock, Identity, PlanId, SubscriptionRecord, SubscriptionRequest, SubscriptionState,
};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const NODE: &str = "node";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
}

pub fn subscriber_keys() -> SignerKeys {
    SignerKeys::ed25519_from_seed([3; 32])
}

pub fn subscriber() -> Identity {
    subscriber_keys().identity().unwrap()
}

pub fn merchant() -> Identity {
    SignerKeys::ed25519_from_seed([7; 32]).identity().unwrap()
}

pub fn request(nonce: u64) -> SubscriptionRequest {
    SubscriptionRequest {
        subscriber: subscriber(),
        plan_id: PlanId::parse("plan_demo_pro").unwrap(),
        requested_at: t0(),
        nonce,
    }
}

pub struct TestServer {
    pub base: String,
    pub state: Arc<AppState>,
    pub store: Arc<CountingStore>,
    pub clock: Arc<FixedClock>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

/// Spins up the API on an OS-assigned port over a ledger that accepts
/// everything.
pub async fn spawn_test_server() -> TestServer {
    let rpc = Arc::new(MockLedgerRpc::new());
    rpc.script(NODE, MockReply::Accept);
    let config = LedgerConfig {
        endpoints: vec![NODE.to_string()],
        ..Default::default()
    };
    let ledger = LedgerClient::with_rpc(config, rpc).unwrap();

    let store = Arc::new(CountingStore::new());
    let clock = Arc::new(FixedClock::new(t0()));
    let catalog = Arc::new(PlanCatalog::with_demo_plans(merchant(), t0()).unwrap());
    let orchestrator = Arc::new(SettlementOrchestrator::new(
        Arc::new(ledger),
        store.clone(),
        catalog,
        clock.clone(),
    ));
    let verifier = VerificationService::new(store.clone(), clock.clone());
    let state = Arc::new(AppState::new(orchestrator, verifier, "testnet"));

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        state,
        store,
        clock,
    }
}

/// Wraps a store and counts `get` calls.
pub struct CountingStore {
    inner: MemoryStore,
    gets: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            gets: AtomicUsize::new(0),
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

impl SubscriptionStore for CountingStore {
    fn put_pending(&self, record: SubscriptionRecord) -> StoreResult<()> {
        self.inner.put_pending(record)
    }

    fn transition(
        &self,
        target: RecordRef<'_>,
        transition: Transition,
    ) -> StoreResult<SubscriptionRecord> {
        self.inner.transition(target, transition)
    }

    fn extend(
        &self,
        api_key: &str,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<SubscriptionRecord> {
        self.inner.extend(api_key, expires_at, at)
    }

    fn begin_renewal(
        &self,
        api_key: &str,
        transaction_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<SubscriptionRecord> {
        self.inner.begin_renewal(api_key, transaction_id, at)
    }

    fn cancel_renewal(
        &self,
        api_key: &str,
        transaction_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<SubscriptionRecord> {
        self.inner.cancel_renewal(api_key, transaction_id, at)
    }

    fn get(&self, api_key: &str) -> StoreResult<Option<SubscriptionRecord>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(api_key)
    }

    fn find_by_transaction(&self, transaction_id: &str) -> StoreResult<Option<SubscriptionRecord>> {
        self.inner.find_by_transaction(transaction_id)
    }

    fn list_by_state(&self, state: SubscriptionState) -> StoreResult<Vec<SubscriptionRecord>> {
        self.inner.list_by_state(state)
    }

    fn list_by_subscriber(&self, subscriber: &Identity) -> StoreResult<Vec<SubscriptionRecord>> {
        self.inner.list_by_subscriber(subscriber)
    }
}
