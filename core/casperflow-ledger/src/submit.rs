//! Failover submission across ledger endpoints.

use crate::config::LedgerConfig;
use crate::deploy::{DeployBuilder, DeployIntent, SignedTransaction, SignerKeys};
use crate::error::{LedgerError, LedgerResult};
use crate::rpc::{DeployStatus, FailureCause, HttpLedgerRpc, LedgerRpc, RpcErrorBody, RpcReply};
use casperflow_types::SubscriptionRequest;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

/// JSON-RPC "invalid params".
const INVALID_PARAMS: i64 = -32602;

const TERMINAL_MARKERS: &[&str] = &[
    "invalid signature",
    "invalid approval",
    "insufficient",
    "invalid deploy",
    "expired",
    "unknown account",
    "no such account",
    "account not found",
];

const DUPLICATE_MARKERS: &[&str] = &["duplicate", "already"];

/// How a node's rejection should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Resending anywhere will not help.
    Terminal,
    /// Another endpoint may accept.
    Transient,
    /// The ledger already holds this deploy.
    Duplicate,
}

/// A node's refusal of a deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionReason {
    pub code: Option<i64>,
    pub message: String,
    pub terminal: bool,
}

impl RejectionReason {
    /// Classifies an RPC error body.
    #[must_use]
    pub fn classify(error: &RpcErrorBody) -> RejectionKind {
        let message = error.message.to_ascii_lowercase();
        if error.code == Some(INVALID_PARAMS)
            || TERMINAL_MARKERS.iter().any(|m| message.contains(m))
        {
            RejectionKind::Terminal
        } else if DUPLICATE_MARKERS.iter().any(|m| message.contains(m)) {
            RejectionKind::Duplicate
        } else {
            RejectionKind::Transient
        }
    }

    fn from_rpc(error: RpcErrorBody, terminal: bool) -> Self {
        Self {
            code: error.code,
            message: error.message,
            terminal,
        }
    }

    fn local(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            terminal: true,
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// One endpoint that gave no definite answer.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointFailure {
    pub endpoint: String,
    pub cause: FailureCause,
}

impl fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.endpoint, self.cause)
    }
}

/// Result of a failover submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// Some endpoint accepted; carries the transaction id (deploy hash).
    Accepted(String),
    /// A definite terminal refusal.
    Rejected(RejectionReason),
    /// Every attempted endpoint failed, or the deadline ran out.
    Unreachable(Vec<EndpointFailure>),
}

impl SubmissionOutcome {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Builds, signs and submits deploys.
pub struct LedgerClient {
    rpc: Arc<dyn LedgerRpc>,
    builder: DeployBuilder,
    config: LedgerConfig,
}

impl LedgerClient {
    /// HTTP client for the configured endpoints.
    pub fn new(config: LedgerConfig) -> LedgerResult<Self> {
        config.validate()?;
        Self::with_rpc(config, Arc::new(HttpLedgerRpc::new()?))
    }

    /// Client over a custom transport.
    pub fn with_rpc(config: LedgerConfig, rpc: Arc<dyn LedgerRpc>) -> LedgerResult<Self> {
        let builder = DeployBuilder::from_config(&config)?;
        Ok(Self {
            rpc,
            builder,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    #[must_use]
    pub fn builder(&self) -> &DeployBuilder {
        &self.builder
    }

    /// Builds and signs a subscription deploy.
    pub fn build(
        &self,
        request: &SubscriptionRequest,
        signer: &SignerKeys,
    ) -> LedgerResult<SignedTransaction> {
        self.builder.build(request, signer)
    }

    /// Builds and signs an arbitrary intent.
    pub fn build_intent(
        &self,
        intent: DeployIntent,
        signer: &SignerKeys,
    ) -> LedgerResult<SignedTransaction> {
        self.builder.build_intent(intent, signer)
    }

    /// Submits to the configured endpoints with the configured limits.
    pub async fn submit(&self, tx: &SignedTransaction) -> SubmissionOutcome {
        self.submit_to(
            tx,
            &self.config.endpoints,
            self.config.per_attempt_timeout(),
            self.config.total_deadline(),
        )
        .await
    }

    /// Tries `endpoints` in order until one gives a definite answer.
    ///
    /// A transaction whose signature does not verify is rejected without
    /// any network I/O. Each attempt is bounded by the smaller of
    /// `per_attempt` and what is left of `deadline`.
    pub async fn submit_to(
        &self,
        tx: &SignedTransaction,
        endpoints: &[String],
        per_attempt: Duration,
        deadline: Duration,
    ) -> SubmissionOutcome {
        let tx_id = tx.transaction_id();
        if let Err(e) = tx.verify() {
            warn!(tx = %tx_id, error = %e, "refusing to submit unverifiable deploy");
            return SubmissionOutcome::Rejected(RejectionReason::local(e.to_string()));
        }

        let started = Instant::now();
        let mut failures = Vec::new();

        for endpoint in endpoints {
            let remaining = deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                debug!(tx = %tx_id, "submission deadline reached");
                break;
            }
            let budget = per_attempt.min(remaining);
            debug!(tx = %tx_id, endpoint, ?budget, "submitting deploy");

            let cause = match timeout(budget, self.rpc.put_deploy(endpoint, tx.deploy())).await {
                Err(_) if budget < per_attempt => FailureCause::DeadlineExceeded,
                Err(_) => FailureCause::Timeout,
                Ok(Err(cause)) => cause,
                Ok(Ok(RpcReply::Ok(hash))) if hash == tx_id => {
                    info!(tx = %tx_id, endpoint, "deploy accepted");
                    return SubmissionOutcome::Accepted(tx_id);
                }
                Ok(Ok(RpcReply::Ok(hash))) => {
                    FailureCause::Malformed(format!("node reported deploy hash {hash}"))
                }
                Ok(Ok(RpcReply::Error(error))) => match RejectionReason::classify(&error) {
                    RejectionKind::Duplicate => {
                        info!(tx = %tx_id, endpoint, "deploy already known to ledger");
                        return SubmissionOutcome::Accepted(tx_id);
                    }
                    RejectionKind::Terminal => {
                        let reason = RejectionReason::from_rpc(error, true);
                        warn!(tx = %tx_id, endpoint, %reason, "deploy rejected");
                        return SubmissionOutcome::Rejected(reason);
                    }
                    RejectionKind::Transient => {
                        FailureCause::Rejected(RejectionReason::from_rpc(error, false))
                    }
                },
            };

            warn!(tx = %tx_id, endpoint, %cause, "endpoint failed, trying next");
            failures.push(EndpointFailure {
                endpoint: endpoint.clone(),
                cause,
            });
        }

        warn!(tx = %tx_id, attempts = failures.len(), "no endpoint accepted the deploy");
        SubmissionOutcome::Unreachable(failures)
    }

    /// Execution status from the configured endpoints.
    pub async fn deploy_status(&self, deploy_hash: &str) -> LedgerResult<DeployStatus> {
        self.deploy_status_from(&self.config.endpoints, deploy_hash)
            .await
    }

    /// Execution status; the first endpoint with a definite answer wins.
    pub async fn deploy_status_from(
        &self,
        endpoints: &[String],
        deploy_hash: &str,
    ) -> LedgerResult<DeployStatus> {
        let per_attempt = self.config.per_attempt_timeout();
        let mut failures = Vec::new();

        for endpoint in endpoints {
            let cause = match timeout(per_attempt, self.rpc.get_deploy(endpoint, deploy_hash)).await
            {
                Ok(Ok(RpcReply::Ok(status))) => {
                    debug!(deploy = deploy_hash, endpoint, ?status, "deploy status");
                    return Ok(status);
                }
                Ok(Ok(RpcReply::Error(error))) => FailureCause::Rejected(
                    RejectionReason::from_rpc(error, false),
                ),
                Ok(Err(cause)) => cause,
                Err(_) => FailureCause::Timeout,
            };
            failures.push(
                EndpointFailure {
                    endpoint: endpoint.clone(),
                    cause,
                }
                .to_string(),
            );
        }

        Err(LedgerError::Unreachable(if failures.is_empty() {
            "no endpoints configured".to_string()
        } else {
            failures.join("; ")
        }))
    }
}
