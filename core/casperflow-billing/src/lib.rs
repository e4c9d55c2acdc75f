//! Subscription settlement for CasperFlow.
//!
//! - [`SettlementOrchestrator`]: subscribe, confirm, fail, renew, revoke,
//!   and plan management, writing subscription records only after the
//!   ledger has spoken.
//! - [`VerificationService`]: read-only key verification with lazy expiry.
//! - [`Reconciler`]: polls the ledger for transactions still in flight.
//! - [`PlanCatalog`]: the plans this deployment sells.

pub mod catalog;
pub mod error;
pub mod orchestrator;
pub mod reconcile;
pub mod verify;

pub use catalog::{PlanCatalog, demo_plans};
pub use error::{BillingError, BillingResult};
pub use orchestrator::{SettlementOrchestrator, blocking};
pub use reconcile::{ReconcileReport, Reconciler};
pub use verify::{DenialReason, Verification, VerificationService};
