//! Ledger client configuration.

use crate::error::{LedgerError, LedgerResult};
use casperflow_types::Motes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Public testnet RPC endpoint.
pub const TESTNET_RPC: &str = "https://node.testnet.casper.network/rpc";

/// Hash of the deployed `SubscriptionManager` contract on testnet.
pub const SUBSCRIPTION_MANAGER_HASH: &str =
    "55fb73955a3e736cd516af0956057a2c55f986d1b3a421b403294a2c288d2143";

/// Where and how to submit deploys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Network name baked into every deploy header (`casper`, `casper-test`).
    pub chain_name: String,
    /// Candidate RPC endpoints, tried in order.
    pub endpoints: Vec<String>,
    /// Hex hash of the subscription contract that session calls target.
    pub contract_hash: String,
    /// Upper bound for a single endpoint attempt (ms).
    pub per_attempt_timeout_ms: u64,
    /// Upper bound for a whole submission across endpoints (ms).
    pub total_deadline_ms: u64,
    pub gas_price: u64,
    /// Deploy time-to-live (ms).
    pub ttl_ms: u64,
    /// Gas payment for contract calls.
    pub call_payment: Motes,
    /// Gas payment for installing contract wasm.
    pub module_payment: Motes,
    /// Block explorer base URL, used for operator-facing links.
    pub explorer_url: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            chain_name: "casper-test".to_string(),
            endpoints: vec![TESTNET_RPC.to_string()],
            contract_hash: SUBSCRIPTION_MANAGER_HASH.to_string(),
            per_attempt_timeout_ms: 15_000,
            total_deadline_ms: 60_000,
            gas_price: 1,
            ttl_ms: 30 * 60 * 1000,
            call_payment: Motes::new(5_000_000_000),
            module_payment: Motes::new(100_000_000_000),
            explorer_url: "https://testnet.cspr.live".to_string(),
        }
    }
}

impl LedgerConfig {
    #[must_use]
    pub fn per_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.per_attempt_timeout_ms)
    }

    #[must_use]
    pub fn total_deadline(&self) -> Duration {
        Duration::from_millis(self.total_deadline_ms)
    }

    /// Explorer link for a submitted deploy.
    #[must_use]
    pub fn explorer_deploy_url(&self, deploy_hash: &str) -> String {
        format!("{}/deploy/{deploy_hash}", self.explorer_url.trim_end_matches('/'))
    }

    /// Decoded contract hash.
    pub fn contract_hash_bytes(&self) -> LedgerResult<[u8; 32]> {
        let bytes = hex::decode(&self.contract_hash)
            .map_err(|e| LedgerError::Config(format!("contract hash is not hex: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| LedgerError::Config("contract hash must be 32 bytes".to_string()))
    }

    /// Checks the configuration before any deploy is built.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.chain_name.is_empty() {
            return Err(LedgerError::Config("chain name must not be empty".to_string()));
        }
        for endpoint in &self.endpoints {
            let url = reqwest::Url::parse(endpoint)
                .map_err(|e| LedgerError::Config(format!("bad endpoint {endpoint}: {e}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(LedgerError::Config(format!(
                    "endpoint must be http(s): {endpoint}"
                )));
            }
        }
        if self.per_attempt_timeout_ms == 0 || self.total_deadline_ms == 0 {
            return Err(LedgerError::Config("timeouts must be positive".to_string()));
        }
        self.contract_hash_bytes()?;
        Ok(())
    }
}
