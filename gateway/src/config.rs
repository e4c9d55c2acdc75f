//! Gateway configuration.
//!
//! Loaded from an optional JSON file; every field has a default, so an empty
//! object (or no file at all) runs against the public testnet with an
//! in-memory store.

use crate::error::{GatewayError, GatewayResult};
use casperflow_ledger::LedgerConfig;
use casperflow_types::Identity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the HTTP API binds to.
    pub bind: String,
    pub port: u16,
    /// Network label reported by the API (`testnet`, `mainnet`).
    pub network: String,
    /// SQLite database file. `None` keeps subscriptions in memory.
    pub database: Option<PathBuf>,
    /// Merchant public key (tagged hex) that owns the demo plans.
    pub merchant: Option<String>,
    /// Seed the catalog with the demo plans at startup.
    pub demo_plans: bool,
    /// Seconds between reconciliation passes. Zero disables the poller.
    pub reconcile_interval_secs: u64,
    pub ledger: LedgerConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
            network: "testnet".to_string(),
            database: None,
            merchant: None,
            demo_plans: true,
            reconcile_interval_secs: 60,
            ledger: LedgerConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Reads a JSON config file.
    pub fn load(path: &Path) -> GatewayResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| GatewayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| GatewayError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path` if given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> GatewayResult<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    /// Replaces the ledger endpoints when any are given.
    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        if !nodes.is_empty() {
            self.ledger.endpoints = nodes;
        }
        self
    }

    /// Parsed merchant identity, if one is configured.
    pub fn merchant_identity(&self) -> GatewayResult<Option<Identity>> {
        self.merchant
            .as_deref()
            .map(|hex| {
                Identity::parse(hex)
                    .map_err(|e| GatewayError::Config(format!("merchant public key: {e}")))
            })
            .transpose()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.network.trim().is_empty() {
            return Err(GatewayError::Config("network must not be empty".to_string()));
        }
        self.merchant_identity()?;
        self.ledger.validate()?;
        Ok(())
    }
}
