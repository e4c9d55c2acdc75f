//! Ledger reconciliation.
//!
//! Polls the ledger for every transaction the store is still waiting on and
//! settles it through the orchestrator. Meant to be run periodically or on
//! demand; it holds no state between runs.

use crate::error::{BillingError, BillingResult};
use crate::orchestrator::{SettlementOrchestrator, blocking};
use casperflow_ledger::DeployStatus;
use casperflow_store::{RecordRef, Transition};
use casperflow_types::{SubscriptionRecord, SubscriptionState};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub confirmed: usize,
    pub renewed: usize,
    pub failed: usize,
    pub still_pending: usize,
    /// Records whose status could not be fetched this pass.
    pub unreachable: usize,
    /// Active records past expiry, written as expired.
    pub expired: usize,
}

pub struct Reconciler {
    orchestrator: Arc<SettlementOrchestrator>,
}

impl Reconciler {
    pub fn new(orchestrator: Arc<SettlementOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// One pass over pending subscriptions, in-flight renewals, and lapsed
    /// active records.
    pub async fn run_once(&self) -> BillingResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for record in self.list(SubscriptionState::Pending).await? {
            let Some(tx) = record.transaction_id.as_deref() else {
                continue;
            };
            self.settle(tx, false, &mut report).await;
        }

        for record in self.list(SubscriptionState::Active).await? {
            if let Some(tx) = record.renewal_transaction_id.as_deref() {
                self.settle(tx, true, &mut report).await;
                continue;
            }
            let now = self.orchestrator.now();
            if record.is_lapsed_at(now) {
                let orchestrator = Arc::clone(&self.orchestrator);
                let key = record.api_key.clone();
                let expired = blocking(move || {
                    Ok(orchestrator
                        .store()
                        .transition(RecordRef::ApiKey(&key), Transition::expire(now))?)
                })
                .await;
                match expired {
                    Ok(_) => report.expired += 1,
                    Err(e) => debug!(key = %record.redacted_key(), error = %e, "skip expiry"),
                }
            }
        }

        info!(?report, "reconciliation pass complete");
        Ok(report)
    }

    async fn list(&self, state: SubscriptionState) -> BillingResult<Vec<SubscriptionRecord>> {
        let orchestrator = Arc::clone(&self.orchestrator);
        blocking(move || Ok(orchestrator.store().list_by_state(state)?)).await
    }

    async fn settle(&self, tx: &str, renewal: bool, report: &mut ReconcileReport) {
        let status = match self.orchestrator.ledger().deploy_status(tx).await {
            Ok(status) => status,
            Err(e) => {
                warn!(tx, error = %e, "could not fetch deploy status");
                report.unreachable += 1;
                return;
            }
        };

        let orchestrator = Arc::clone(&self.orchestrator);
        let id = tx.to_string();
        let result = match status {
            DeployStatus::Pending => {
                report.still_pending += 1;
                return;
            }
            DeployStatus::Executed { .. } => {
                let now = orchestrator.now();
                blocking(move || orchestrator.confirm_for_plan(&id, now))
                    .await
                    .map(|_| {
                        if renewal {
                            report.renewed += 1;
                        } else {
                            report.confirmed += 1;
                        }
                    })
            }
            DeployStatus::Failed { message, .. } => {
                blocking(move || orchestrator.fail(&id, &message))
                    .await
                    .map(|_| report.failed += 1)
            }
        };

        // A webhook may have settled the record since it was listed.
        if let Err(e) = result {
            match e {
                BillingError::InvalidTransition { .. } | BillingError::NotFound(_) => {
                    debug!(tx, error = %e, "already settled");
                }
                other => warn!(tx, error = %other, "failed to settle transaction"),
            }
        }
    }
}
