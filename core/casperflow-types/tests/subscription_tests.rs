use casperflow_types::{Identity, PlanId, SubscriptionRecord, SubscriptionState};
use chrono::{Duration, TimeZone, Utc};
use std::str::FromStr;

const ALL: [SubscriptionState; 5] = [
    SubscriptionState::Pending,
    SubscriptionState::Active,
    SubscriptionState::Expired,
    SubscriptionState::Revoked,
    SubscriptionState::Failed,
];

fn record() -> SubscriptionRecord {
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    SubscriptionRecord::pending(
        format!("cf_sk_{}", "a".repeat(48)),
        Identity::from_ed25519([1u8; 32]),
        PlanId::parse("plan_demo_pro").unwrap(),
        Some("deadbeef".to_string()),
        now,
    )
}

// ── State machine ────────────────────────────────────────────────

#[test]
fn forward_transitions_allowed() {
    use SubscriptionState::*;
    assert!(Pending.can_transition_to(Active));
    assert!(Pending.can_transition_to(Failed));
    assert!(Pending.can_transition_to(Revoked));
    assert!(Active.can_transition_to(Expired));
    assert!(Active.can_transition_to(Revoked));
}

#[test]
fn nothing_leaves_terminal_states() {
    for from in ALL.into_iter().filter(SubscriptionState::is_terminal) {
        for to in ALL {
            assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
        }
    }
}

#[test]
fn backward_transitions_rejected() {
    use SubscriptionState::*;
    assert!(!Active.can_transition_to(Pending));
    assert!(!Expired.can_transition_to(Active));
    assert!(!Pending.can_transition_to(Expired));
    assert!(!Active.can_transition_to(Active));
}

#[test]
fn state_string_roundtrip() {
    for state in ALL {
        assert_eq!(SubscriptionState::from_str(state.as_str()).unwrap(), state);
    }
    assert!(SubscriptionState::from_str("cancelled").is_err());
}

// ── Lazy expiry ──────────────────────────────────────────────────

#[test]
fn active_record_lapses_at_expiry() {
    let mut rec = record();
    let activated = rec.created_at;
    rec.state = SubscriptionState::Active;
    rec.activated_at = Some(activated);
    rec.expires_at = Some(activated + Duration::days(30));

    assert_eq!(rec.effective_state(activated + Duration::days(29)), SubscriptionState::Active);
    assert_eq!(rec.effective_state(activated + Duration::days(30)), SubscriptionState::Expired);
    // Stored state is untouched.
    assert_eq!(rec.state, SubscriptionState::Active);
}

#[test]
fn pending_record_never_lapses() {
    let rec = record();
    assert_eq!(
        rec.effective_state(rec.created_at + Duration::days(365)),
        SubscriptionState::Pending
    );
}

// ── Redaction ────────────────────────────────────────────────────

#[test]
fn debug_never_prints_full_key() {
    let rec = record();
    let debug = format!("{rec:?}");
    assert!(!debug.contains(&rec.api_key));
    assert!(debug.contains("cf_sk_aaaa"));
}

#[test]
fn serde_keeps_full_key_for_storage() {
    let rec = record();
    let json = serde_json::to_string(&rec).unwrap();
    let back: SubscriptionRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, rec);
}
