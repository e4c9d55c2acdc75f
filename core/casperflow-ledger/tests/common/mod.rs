//! Shared test helpers for ledger tests.

#![allow(dead_code)]

use casperflow_ledger::{LedgerConfig, SignerKeys};
use casperflow_types::{Identity, PlanId, SubscriptionRequest};
use chrono::{TimeZone, Utc};

/// Deterministic Ed25519 seed.
pub const SEED: [u8; 32] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25,
    26, 27, 28, 29, 30, 31, 32,
];

pub fn test_signer() -> SignerKeys {
    SignerKeys::ed25519_from_seed(SEED)
}

pub fn other_signer() -> SignerKeys {
    SignerKeys::ed25519_from_seed([9; 32])
}

pub fn test_identity() -> Identity {
    test_signer().identity().unwrap()
}

pub fn test_request(nonce: u64) -> SubscriptionRequest {
    SubscriptionRequest {
        subscriber: test_identity(),
        plan_id: PlanId::parse("plan_demo_pro").unwrap(),
        requested_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
        nonce,
    }
}

pub fn test_config(endpoints: Vec<String>) -> LedgerConfig {
    LedgerConfig {
        endpoints,
        ..Default::default()
    }
}
