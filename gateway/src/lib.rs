//! HTTP API and tooling for CasperFlow.
//!
//! Routes:
//! - `GET /verify?apiKey=` and `POST /verify`: key verification and
//!   registration of subscriptions confirmed elsewhere.
//! - `GET /plans`, `GET /plans/{planId}`: the plan catalog.
//! - `POST /reconcile/confirm`, `POST /reconcile/fail`: settlement webhook.

pub mod api;
pub mod config;
pub mod error;
pub mod install;

pub use config::GatewayConfig;
pub use error::{ApiError, ApiResult, GatewayError, GatewayResult};
pub use install::{InstallReceipt, install_contract};

use axum::{
    Router,
    routing::{get, post},
};
use casperflow_billing::{PlanCatalog, SettlementOrchestrator, VerificationService};
use casperflow_ledger::LedgerClient;
use casperflow_store::{MemoryStore, SqliteStore, SubscriptionStore};
use casperflow_types::{Clock, SystemClock};
use std::sync::Arc;
use tracing::{info, warn};

/// Services shared by every handler. Store-backed calls run on the
/// blocking pool, so both services are shared by `Arc`.
pub struct AppState {
    pub orchestrator: Arc<SettlementOrchestrator>,
    pub verifier: Arc<VerificationService>,
    /// Network label echoed in responses.
    pub network: String,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<SettlementOrchestrator>,
        verifier: VerificationService,
        network: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            verifier: Arc::new(verifier),
            network: network.into(),
        }
    }

    /// Wires the store, catalog and ledger client described by `config`.
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let store: Arc<dyn SubscriptionStore> = match &config.database {
            Some(path) => {
                info!(path = %path.display(), "opening subscription database");
                Arc::new(SqliteStore::open(path)?)
            }
            None => {
                warn!("no database configured, subscriptions are kept in memory");
                Arc::new(MemoryStore::new())
            }
        };
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let catalog = match (config.demo_plans, config.merchant_identity()?) {
            (true, Some(merchant)) => PlanCatalog::with_demo_plans(merchant, clock.now())?,
            (true, None) => {
                warn!("demo plans need a merchant public key, starting with an empty catalog");
                PlanCatalog::new()
            }
            (false, _) => PlanCatalog::new(),
        };

        let ledger = LedgerClient::new(config.ledger.clone())?;
        let orchestrator = Arc::new(SettlementOrchestrator::new(
            Arc::new(ledger),
            store.clone(),
            Arc::new(catalog),
            clock.clone(),
        ));
        let verifier = VerificationService::new(store, clock);
        Ok(Self::new(orchestrator, verifier, config.network.clone()))
    }

    #[must_use]
    pub fn catalog(&self) -> &PlanCatalog {
        self.orchestrator.catalog()
    }

    #[must_use]
    pub fn contract_hash(&self) -> &str {
        &self.orchestrator.ledger().config().contract_hash
    }
}

/// Builds the HTTP API router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/verify", get(api::verify_key).post(api::register_key))
        .route("/plans", get(api::list_plans))
        .route("/plans/{planId}", get(api::get_plan))
        .route("/reconcile/confirm", post(api::confirm_transaction))
        .route("/reconcile/fail", post(api::fail_transaction))
        .with_state(state)
}
