mod common;

use casperflow_billing::{
    BillingError, DenialReason, PlanCatalog, Reconciler, SettlementOrchestrator, blocking,
};
use casperflow_credential::ApiKey;
use casperflow_ledger::mock::{MockLedgerRpc, MockReply};
use casperflow_ledger::{FailureCause, LedgerClient, LedgerConfig};
use casperflow_store::SubscriptionStore;
use casperflow_types::{BillingPeriod, FixedClock, Motes, NewPlan, SubscriptionState};
use chrono::Duration;
use common::{
    CountingStore, NODE, fixture, fixture_with_client, merchant, merchant_keys, pro_plan,
    request, subscriber, subscriber_keys, t0, tx_id,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn scripted(replies: &[MockReply]) -> Arc<MockLedgerRpc> {
    let rpc = Arc::new(MockLedgerRpc::new());
    for reply in replies {
        rpc.script(NODE, reply.clone());
    }
    rpc
}

// ── Subscribe over real HTTP failover ───────────────────────────

#[tokio::test]
async fn two_endpoints_time_out_third_accepts_then_confirm() {
    let slow_a = MockServer::start().await;
    let slow_b = MockServer::start().await;
    let good = MockServer::start().await;

    let config = LedgerConfig {
        endpoints: vec![
            format!("{}/rpc", slow_a.uri()),
            format!("{}/rpc", slow_b.uri()),
            format!("{}/rpc", good.uri()),
        ],
        per_attempt_timeout_ms: 300,
        total_deadline_ms: 10_000,
        ..Default::default()
    };
    let f = fixture_with_client(LedgerClient::new(config).unwrap());
    let tx = tx_id(&f, 1);

    let accepted = ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": { "deploy_hash": tx }
    }));
    for slow in [&slow_a, &slow_b] {
        Mock::given(method("POST"))
            .respond_with(accepted.clone().set_delay(std::time::Duration::from_secs(5)))
            .mount(slow)
            .await;
    }
    Mock::given(method("POST"))
        .respond_with(accepted)
        .expect(1)
        .mount(&good)
        .await;

    let key = f
        .orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap();
    let pending = f.store.get(key.as_str()).unwrap().unwrap();
    assert_eq!(pending.state, SubscriptionState::Pending);
    assert_eq!(pending.transaction_id.as_deref(), Some(tx.as_str()));

    let confirmed_at = t0() + Duration::minutes(2);
    let record = f.orchestrator.confirm_for_plan(&tx, confirmed_at).unwrap();
    assert_eq!(record.state, SubscriptionState::Active);
    assert_eq!(record.activated_at, Some(confirmed_at));
    assert_eq!(record.expires_at, Some(confirmed_at + Duration::seconds(2_592_000)));
}

// ── Idempotence ─────────────────────────────────────────────────

#[tokio::test]
async fn resubmitting_same_request_returns_same_key() {
    let rpc = scripted(&[MockReply::Accept]);
    let f = fixture(rpc.clone());

    let first = f
        .orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap();
    let mut retry = request(1);
    retry.requested_at = t0() + Duration::seconds(30);
    let second = f
        .orchestrator
        .subscribe(&retry, &subscriber_keys())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(rpc.calls_to(NODE), 1);
    assert_eq!(f.store.len(), 1);
}

#[tokio::test]
async fn retry_after_unreachable_ledger_records_one_subscription() {
    let rpc = scripted(&[
        MockReply::Fail(FailureCause::Connect("refused".to_string())),
        MockReply::Accept,
    ]);
    let f = fixture(rpc.clone());

    let err = f
        .orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Unreachable(_)));
    assert!(f.store.is_empty());

    let key = f
        .orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap();
    let again = f
        .orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap();
    assert_eq!(key, again);
    assert_eq!(rpc.calls_to(NODE), 2);

    let record = f.orchestrator.confirm_for_plan(&tx_id(&f, 1), t0()).unwrap();
    assert_eq!(record.api_key, key.as_str());
    assert_eq!(record.state, SubscriptionState::Active);
    assert_eq!(f.store.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_requests_share_one_key() {
    let f = fixture(scripted(&[MockReply::Accept]));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let orchestrator = Arc::clone(&f.orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .subscribe(&request(1), &subscriber_keys())
                    .await
            })
        })
        .collect();
    let mut keys = Vec::new();
    for handle in handles {
        keys.push(handle.await.unwrap().unwrap());
    }

    assert!(keys.iter().all(|k| *k == keys[0]));
    assert_eq!(f.store.len(), 1);
    let record = f.orchestrator.confirm_for_plan(&tx_id(&f, 1), t0()).unwrap();
    assert_eq!(record.api_key, keys[0].as_str());
}

#[tokio::test]
async fn new_nonce_is_a_new_subscription() {
    let f = fixture(scripted(&[MockReply::Accept]));
    let a = f
        .orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap();
    let b = f
        .orchestrator
        .subscribe(&request(2), &subscriber_keys())
        .await
        .unwrap();
    assert_ne!(a, b);
    assert_eq!(f.store.list_by_subscriber(&subscriber()).unwrap().len(), 2);
}

// ── Failures leave no record ────────────────────────────────────

#[tokio::test]
async fn terminal_rejection_stores_nothing() {
    let f = fixture(scripted(&[MockReply::Reject {
        code: Some(-32008),
        message: "Invalid deploy: insufficient balance".to_string(),
    }]));

    let err = f
        .orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::TerminalRejection(_)));
    assert!(!err.is_retryable());
    assert!(f.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn unreachable_ledger_stores_nothing() {
    let f = fixture(scripted(&[MockReply::Fail(FailureCause::Connect(
        "refused".to_string(),
    ))]));

    let err = f
        .orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Unreachable(_)));
    assert!(err.is_retryable());
    assert!(f.store.is_empty());
}

#[tokio::test]
async fn plan_checks_happen_before_submission() {
    let rpc = scripted(&[MockReply::Accept]);
    let f = fixture(rpc.clone());

    let mut unknown = request(1);
    unknown.plan_id = casperflow_types::PlanId::parse("plan_missing").unwrap();
    assert!(matches!(
        f.orchestrator.subscribe(&unknown, &subscriber_keys()).await,
        Err(BillingError::PlanNotFound(_))
    ));

    f.catalog.deprecate(&pro_plan()).unwrap();
    assert!(matches!(
        f.orchestrator.subscribe(&request(1), &subscriber_keys()).await,
        Err(BillingError::PlanDeprecated(_))
    ));
    assert_eq!(rpc.calls().len(), 0);
}

#[tokio::test]
async fn wrong_signer_is_signing_failure() {
    let rpc = scripted(&[MockReply::Accept]);
    let f = fixture(rpc.clone());
    let err = f
        .orchestrator
        .subscribe(&request(1), &merchant_keys())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::SigningFailure(_)));
    assert_eq!(rpc.calls().len(), 0);
}

// ── Confirm / fail / revoke ─────────────────────────────────────

#[tokio::test]
async fn failed_transaction_never_activates() {
    let f = fixture(scripted(&[MockReply::Accept]));
    f.orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap();
    let tx = tx_id(&f, 1);

    let failed = f.orchestrator.fail(&tx, "User error: 2").unwrap();
    assert_eq!(failed.state, SubscriptionState::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("User error: 2"));

    let err = f.orchestrator.confirm_for_plan(&tx, t0()).unwrap_err();
    assert!(matches!(
        err,
        BillingError::InvalidTransition {
            from: SubscriptionState::Failed,
            to: SubscriptionState::Active
        }
    ));
}

#[tokio::test]
async fn confirm_twice_is_rejected() {
    let f = fixture(scripted(&[MockReply::Accept]));
    f.orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap();
    let tx = tx_id(&f, 1);
    f.orchestrator.confirm_for_plan(&tx, t0()).unwrap();
    assert!(matches!(
        f.orchestrator.confirm(&tx, t0(), t0() + Duration::days(1)),
        Err(BillingError::InvalidTransition { .. })
    ));
}

#[test]
fn unknown_transaction_is_not_found() {
    let f = fixture(scripted(&[]));
    assert!(matches!(
        f.orchestrator.confirm_for_plan("deadbeef", t0()),
        Err(BillingError::NotFound(_))
    ));
    assert!(matches!(
        f.orchestrator.fail("deadbeef", "x"),
        Err(BillingError::NotFound(_))
    ));
}

#[tokio::test]
async fn revoke_active_subscription() {
    let f = fixture(scripted(&[MockReply::Accept]));
    let key = f
        .orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap();
    f.orchestrator.confirm_for_plan(&tx_id(&f, 1), t0()).unwrap();

    let revoked = f.orchestrator.revoke(key.as_str()).unwrap();
    assert_eq!(revoked.state, SubscriptionState::Revoked);
    assert!(matches!(
        f.orchestrator.revoke("not-a-key"),
        Err(BillingError::MalformedKey(_))
    ));
}

// ── Renewal ─────────────────────────────────────────────────────

#[tokio::test]
async fn renewal_extends_from_current_expiry() {
    let f = fixture(scripted(&[MockReply::Accept]));
    let key = f
        .orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap();
    let active = f.orchestrator.confirm_for_plan(&tx_id(&f, 1), t0()).unwrap();
    let first_expiry = active.expires_at.unwrap();

    let renewal_tx = f
        .orchestrator
        .renew(key.as_str(), &subscriber_keys(), 2)
        .await
        .unwrap();
    assert_eq!(
        f.store.get(key.as_str()).unwrap().unwrap().renewal_transaction_id,
        Some(renewal_tx.clone())
    );

    // Confirmed early: the new term stacks on the current one.
    let renewed = f
        .orchestrator
        .confirm_for_plan(&renewal_tx, t0() + Duration::days(10))
        .unwrap();
    assert_eq!(renewed.expires_at, Some(first_expiry + Duration::days(30)));
    assert_eq!(renewed.renewal_transaction_id, None);
}

#[tokio::test]
async fn late_renewal_starts_from_confirmation() {
    let f = fixture(scripted(&[MockReply::Accept]));
    let key = f
        .orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap();
    f.orchestrator.confirm_for_plan(&tx_id(&f, 1), t0()).unwrap();
    let renewal_tx = f
        .orchestrator
        .renew(key.as_str(), &subscriber_keys(), 2)
        .await
        .unwrap();

    let late = t0() + Duration::days(45);
    let renewed = f.orchestrator.confirm_for_plan(&renewal_tx, late).unwrap();
    assert_eq!(renewed.expires_at, Some(late + Duration::days(30)));
}

#[tokio::test]
async fn failed_renewal_keeps_current_term() {
    let f = fixture(scripted(&[MockReply::Accept]));
    let key = f
        .orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap();
    let active = f.orchestrator.confirm_for_plan(&tx_id(&f, 1), t0()).unwrap();
    let renewal_tx = f
        .orchestrator
        .renew(key.as_str(), &subscriber_keys(), 2)
        .await
        .unwrap();

    let record = f.orchestrator.fail(&renewal_tx, "out of gas").unwrap();
    assert_eq!(record.state, SubscriptionState::Active);
    assert_eq!(record.expires_at, active.expires_at);
    assert_eq!(record.renewal_transaction_id, None);
    assert_eq!(f.verifier.verify(key.as_str()).unwrap().reason, None);
}

#[tokio::test]
async fn second_renewal_refused_while_first_in_flight() {
    let rpc = scripted(&[MockReply::Accept]);
    let f = fixture(rpc.clone());
    let key = f
        .orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap();
    let active = f.orchestrator.confirm_for_plan(&tx_id(&f, 1), t0()).unwrap();
    let first = f
        .orchestrator
        .renew(key.as_str(), &subscriber_keys(), 2)
        .await
        .unwrap();
    let submitted = rpc.calls_to(NODE);

    let err = f
        .orchestrator
        .renew(key.as_str(), &subscriber_keys(), 3)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Conflict(_)));
    assert_eq!(rpc.calls_to(NODE), submitted);
    assert_eq!(
        f.store.get(key.as_str()).unwrap().unwrap().renewal_transaction_id,
        Some(first.clone())
    );

    // The in-flight renewal itself is still idempotent.
    let again = f
        .orchestrator
        .renew(key.as_str(), &subscriber_keys(), 2)
        .await
        .unwrap();
    assert_eq!(again, first);
    assert_eq!(rpc.calls_to(NODE), submitted);

    let renewed = f
        .orchestrator
        .confirm_for_plan(&first, t0() + Duration::days(5))
        .unwrap();
    assert_eq!(
        renewed.expires_at,
        Some(active.expires_at.unwrap() + Duration::days(30))
    );

    // Settled, so the next renewal goes through.
    let next = f
        .orchestrator
        .renew(key.as_str(), &subscriber_keys(), 3)
        .await
        .unwrap();
    assert_ne!(next, first);
}

#[tokio::test]
async fn explicit_expiry_settles_renewal() {
    let f = fixture(scripted(&[MockReply::Accept]));
    let key = f
        .orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap();
    f.orchestrator.confirm_for_plan(&tx_id(&f, 1), t0()).unwrap();
    let renewal_tx = f
        .orchestrator
        .renew(key.as_str(), &subscriber_keys(), 2)
        .await
        .unwrap();

    let until = t0() + Duration::days(90);
    let renewed = f
        .orchestrator
        .confirm(&renewal_tx, t0() + Duration::days(1), until)
        .unwrap();
    assert_eq!(renewed.state, SubscriptionState::Active);
    assert_eq!(renewed.expires_at, Some(until));
    assert_eq!(renewed.renewal_transaction_id, None);
    assert_eq!(renewed.activated_at, Some(t0()));
}

#[tokio::test]
async fn pending_subscription_cannot_renew() {
    let f = fixture(scripted(&[MockReply::Accept]));
    let key = f
        .orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap();
    assert!(matches!(
        f.orchestrator.renew(key.as_str(), &subscriber_keys(), 2).await,
        Err(BillingError::InvalidTransition { .. })
    ));
}

// ── Plans ───────────────────────────────────────────────────────

#[tokio::test]
async fn merchant_creates_and_deprecates_plan() {
    let f = fixture(scripted(&[MockReply::Accept]));
    let (plan, tx) = f
        .orchestrator
        .create_plan(
            &merchant_keys(),
            NewPlan {
                name: "Metered".to_string(),
                description: None,
                base_price: Motes::from_cspr(5).unwrap(),
                usage_price: Motes::new(1_000),
                billing_period: BillingPeriod::Weekly,
                trial_days: 3,
            },
            1,
        )
        .await
        .unwrap();
    assert_eq!(tx.len(), 64);
    assert_eq!(plan.merchant, merchant());
    assert_eq!(plan.billing_period_secs, 604_800);
    assert_eq!(f.catalog.get(&plan.id).unwrap(), Some(plan.clone()));

    let err = f
        .orchestrator
        .deprecate_plan(&subscriber_keys(), &plan.id, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::SigningFailure(_)));

    let deprecated = f
        .orchestrator
        .deprecate_plan(&merchant_keys(), &plan.id, 2)
        .await
        .unwrap();
    assert!(deprecated.deprecated);
}

#[tokio::test]
async fn deprecated_plan_honors_existing_subscriptions() {
    let f = fixture(scripted(&[MockReply::Accept]));
    let key = f
        .orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap();
    f.orchestrator.confirm_for_plan(&tx_id(&f, 1), t0()).unwrap();
    f.orchestrator
        .deprecate_plan(&merchant_keys(), &pro_plan(), 9)
        .await
        .unwrap();

    assert!(f.verifier.verify(key.as_str()).unwrap().valid);
    assert!(matches!(
        f.orchestrator.subscribe(&request(2), &subscriber_keys()).await,
        Err(BillingError::PlanDeprecated(_))
    ));
}

// ── Externally confirmed registrations ──────────────────────────

#[test]
fn register_confirmed_by_plan_name() {
    let f = fixture(scripted(&[]));
    let key = ApiKey::issue(&subscriber(), &pro_plan()).unwrap();
    let expires = t0() + Duration::days(30);

    let record = f
        .orchestrator
        .register_confirmed(key.as_str(), "Pro API", expires, subscriber())
        .unwrap();
    assert_eq!(record.state, SubscriptionState::Active);
    assert_eq!(record.plan_id, pro_plan());
    assert_eq!(record.expires_at, Some(expires));
    assert!(f.verifier.verify(key.as_str()).unwrap().valid);

    assert!(matches!(
        f.orchestrator
            .register_confirmed(key.as_str(), "Pro API", expires, subscriber()),
        Err(BillingError::Conflict(_))
    ));
}

#[test]
fn register_confirmed_validates_input() {
    let f = fixture(scripted(&[]));
    let key = ApiKey::issue(&subscriber(), &pro_plan()).unwrap();

    assert!(matches!(
        f.orchestrator
            .register_confirmed("cf_sk_short", "Pro API", t0() + Duration::days(1), subscriber()),
        Err(BillingError::MalformedKey(_))
    ));
    assert!(matches!(
        f.orchestrator
            .register_confirmed(key.as_str(), "Gold", t0() + Duration::days(1), subscriber()),
        Err(BillingError::PlanNotFound(_))
    ));
    assert!(matches!(
        f.orchestrator
            .register_confirmed(key.as_str(), "Pro API", t0() - Duration::days(1), subscriber()),
        Err(BillingError::InvalidInput(_))
    ));
    assert_eq!(
        f.verifier.verify(key.as_str()).unwrap().reason,
        Some(DenialReason::NotFound)
    );
}

// ── Runtime ─────────────────────────────────────────────────────

#[tokio::test]
async fn store_calls_run_off_the_runtime_thread() {
    let store = Arc::new(CountingStore::new());
    let config = LedgerConfig {
        endpoints: vec![NODE.to_string()],
        ..Default::default()
    };
    let client = LedgerClient::with_rpc(config, scripted(&[MockReply::Accept])).unwrap();
    let orchestrator = Arc::new(SettlementOrchestrator::new(
        Arc::new(client),
        store.clone(),
        Arc::new(PlanCatalog::with_demo_plans(merchant(), t0()).unwrap()),
        Arc::new(FixedClock::new(t0())),
    ));

    let key = orchestrator
        .subscribe(&request(1), &subscriber_keys())
        .await
        .unwrap();
    let tx = orchestrator
        .ledger()
        .build(&request(1), &subscriber_keys())
        .unwrap()
        .transaction_id();
    let settling = Arc::clone(&orchestrator);
    blocking(move || settling.confirm_for_plan(&tx, t0()))
        .await
        .unwrap();
    orchestrator
        .renew(key.as_str(), &subscriber_keys(), 2)
        .await
        .unwrap();
    Reconciler::new(orchestrator).run_once().await.unwrap();

    assert!(store.calls() >= 6);
    assert_eq!(store.calls_on(thread::current().id()), 0);
}
