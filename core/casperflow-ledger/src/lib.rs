//! Ledger client for CasperFlow subscriptions.
//!
//! Builds deterministic, signed deploys against the `SubscriptionManager`
//! contract and submits them over JSON-RPC with endpoint failover:
//!
//! - The first endpoint to accept wins.
//! - A terminal rejection stops immediately.
//! - Timeouts, connection errors and transient rejections move on to the
//!   next endpoint, all within one overall deadline.

pub mod config;
pub mod deploy;
pub mod error;
pub mod rpc;
pub mod submit;

pub use config::{LedgerConfig, SUBSCRIPTION_MANAGER_HASH, TESTNET_RPC};
pub use deploy::{
    Approval, ArgValue, Deploy, DeployBuilder, DeployHeader, DeployIntent, ExecutableItem,
    NamedArg, SignedTransaction, SignerKeys, UnsignedDeploy,
};
pub use error::{LedgerError, LedgerResult};
pub use rpc::{
    DeployStatus, FailureCause, HttpLedgerRpc, LedgerRpc, RpcErrorBody, RpcReply, mock,
};
pub use submit::{
    EndpointFailure, LedgerClient, RejectionKind, RejectionReason, SubmissionOutcome,
};
