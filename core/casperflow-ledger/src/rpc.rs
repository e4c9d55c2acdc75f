//! JSON-RPC transport to ledger nodes.
//!
//! The transport only moves bytes and sorts out what came back. Deciding
//! whether to try another endpoint is the submitter's job.

use crate::deploy::Deploy;
use crate::error::LedgerResult;
use crate::submit::RejectionReason;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub const METHOD_PUT_DEPLOY: &str = "account_put_deploy";
pub const METHOD_GET_DEPLOY: &str = "info_get_deploy";

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a, P> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: P,
}

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    #[serde(default)]
    pub code: Option<i64>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A well-formed answer from a node: a result or an RPC-level error.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcReply<T> {
    Ok(T),
    Error(RpcErrorBody),
}

/// Why an endpoint produced no definite answer.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureCause {
    /// The attempt exceeded its per-attempt timeout.
    Timeout,
    /// The overall deadline ran out during this attempt.
    DeadlineExceeded,
    /// Could not connect or the connection broke.
    Connect(String),
    /// Non-2xx HTTP status.
    HttpStatus(u16),
    /// The body was not a usable JSON-RPC response.
    Malformed(String),
    /// The node answered with a transient rejection.
    Rejected(RejectionReason),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timed out"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
            Self::Connect(e) => write!(f, "connection failed: {e}"),
            Self::HttpStatus(status) => write!(f, "HTTP {status}"),
            Self::Malformed(e) => write!(f, "malformed response: {e}"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

/// Execution status of a submitted deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeployStatus {
    /// Known to the node but not yet executed in a block.
    Pending,
    Executed { block_hash: String },
    Failed { block_hash: String, message: String },
}

impl DeployStatus {
    /// Parses the `result` of `info_get_deploy`.
    pub fn from_result(result: &Value) -> Result<Self, FailureCause> {
        let Some(results) = result.get("execution_results") else {
            return Err(FailureCause::Malformed("missing execution_results".to_string()));
        };
        let Some(first) = results.as_array().and_then(|r| r.first()) else {
            return Ok(Self::Pending);
        };

        let block_hash = first
            .get("block_hash")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let outcome = first
            .get("result")
            .ok_or_else(|| FailureCause::Malformed("missing execution result".to_string()))?;

        if outcome.get("Success").is_some() {
            Ok(Self::Executed { block_hash })
        } else if let Some(failure) = outcome.get("Failure") {
            let message = failure
                .get("error_message")
                .and_then(Value::as_str)
                .unwrap_or("execution failed")
                .to_string();
            Ok(Self::Failed {
                block_hash,
                message,
            })
        } else {
            Err(FailureCause::Malformed("unknown execution result".to_string()))
        }
    }
}

/// One ledger node call, addressed to a specific endpoint.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// `account_put_deploy`; `Ok` carries the deploy hash the node reported.
    async fn put_deploy(
        &self,
        endpoint: &str,
        deploy: &Deploy,
    ) -> Result<RpcReply<String>, FailureCause>;

    /// `info_get_deploy` for a deploy hash.
    async fn get_deploy(
        &self,
        endpoint: &str,
        deploy_hash: &str,
    ) -> Result<RpcReply<DeployStatus>, FailureCause>;
}

/// reqwest-backed transport.
pub struct HttpLedgerRpc {
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpLedgerRpc {
    pub fn new() -> LedgerResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("casperflow/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client))
    }

    /// Uses an existing client, e.g. one with custom TLS or proxies.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
    ) -> Result<RpcReply<Value>, FailureCause> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .client
            .post(endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FailureCause::Timeout
                } else {
                    FailureCause::Connect(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            debug!(endpoint, %status, method, "non-success status from ledger node");
            return Err(FailureCause::HttpStatus(status.as_u16()));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| FailureCause::Malformed(e.to_string()))?;
        into_reply(body)
    }
}

fn into_reply(body: RpcResponse) -> Result<RpcReply<Value>, FailureCause> {
    if let Some(error) = body.error {
        return Ok(RpcReply::Error(error));
    }
    let result = body
        .result
        .ok_or_else(|| FailureCause::Malformed("neither result nor error".to_string()))?;

    // Some gateways nest the error inside `result`.
    if let Some(nested) = result.get("error") {
        let error: RpcErrorBody = serde_json::from_value(nested.clone())
            .map_err(|e| FailureCause::Malformed(e.to_string()))?;
        return Ok(RpcReply::Error(error));
    }
    Ok(RpcReply::Ok(result))
}

#[async_trait]
impl LedgerRpc for HttpLedgerRpc {
    async fn put_deploy(
        &self,
        endpoint: &str,
        deploy: &Deploy,
    ) -> Result<RpcReply<String>, FailureCause> {
        match self
            .call(endpoint, METHOD_PUT_DEPLOY, json!({ "deploy": deploy }))
            .await?
        {
            RpcReply::Ok(result) => result
                .get("deploy_hash")
                .and_then(Value::as_str)
                .map(|hash| RpcReply::Ok(hash.to_string()))
                .ok_or_else(|| FailureCause::Malformed("missing deploy_hash".to_string())),
            RpcReply::Error(error) => Ok(RpcReply::Error(error)),
        }
    }

    async fn get_deploy(
        &self,
        endpoint: &str,
        deploy_hash: &str,
    ) -> Result<RpcReply<DeployStatus>, FailureCause> {
        match self
            .call(endpoint, METHOD_GET_DEPLOY, json!({ "deploy_hash": deploy_hash }))
            .await?
        {
            RpcReply::Ok(result) => DeployStatus::from_result(&result).map(RpcReply::Ok),
            RpcReply::Error(error) => Ok(RpcReply::Error(error)),
        }
    }
}

/// Scripted in-process transport for tests.
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    /// What an endpoint does when called.
    #[derive(Debug, Clone)]
    pub enum MockReply {
        /// Accepts, echoing the deploy's own hash.
        Accept,
        /// Answers with an RPC error.
        Reject { code: Option<i64>, message: String },
        /// Fails without an answer.
        Fail(FailureCause),
        /// Never answers within any sane timeout.
        Hang,
        /// Answers `info_get_deploy` with a status.
        Status(DeployStatus),
    }

    /// A recorded call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct MockCall {
        pub endpoint: String,
        pub method: &'static str,
        pub deploy_hash: String,
    }

    /// Replies are scripted per endpoint and consumed in order; the last
    /// reply for an endpoint repeats. Unscripted endpoints fail to connect.
    #[derive(Debug, Default)]
    pub struct MockLedgerRpc {
        scripts: Mutex<HashMap<String, VecDeque<MockReply>>>,
        calls: Mutex<Vec<MockCall>>,
    }

    impl MockLedgerRpc {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues a reply for an endpoint.
        pub fn script(&self, endpoint: impl Into<String>, reply: MockReply) -> &Self {
            self.scripts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(endpoint.into())
                .or_default()
                .push_back(reply);
            self
        }

        /// All calls made so far, in order.
        pub fn calls(&self) -> Vec<MockCall> {
            self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        /// Number of calls made to one endpoint.
        pub fn calls_to(&self, endpoint: &str) -> usize {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|c| c.endpoint == endpoint)
                .count()
        }

        fn next_reply(&self, endpoint: &str, method: &'static str, hash: &str) -> Option<MockReply> {
            self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(MockCall {
                endpoint: endpoint.to_string(),
                method,
                deploy_hash: hash.to_string(),
            });
            let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
            let queue = scripts.get_mut(endpoint)?;
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        }

        async fn resolve<T>(
            reply: Option<MockReply>,
            ok: impl FnOnce(MockReply) -> Result<RpcReply<T>, FailureCause>,
        ) -> Result<RpcReply<T>, FailureCause> {
            match reply {
                None => Err(FailureCause::Connect("connection refused".to_string())),
                Some(MockReply::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(FailureCause::Timeout)
                }
                Some(MockReply::Fail(cause)) => Err(cause),
                Some(MockReply::Reject { code, message }) => Ok(RpcReply::Error(RpcErrorBody {
                    code,
                    message,
                    data: None,
                })),
                Some(other) => ok(other),
            }
        }
    }

    #[async_trait]
    impl LedgerRpc for MockLedgerRpc {
        async fn put_deploy(
            &self,
            endpoint: &str,
            deploy: &Deploy,
        ) -> Result<RpcReply<String>, FailureCause> {
            let reply = self.next_reply(endpoint, METHOD_PUT_DEPLOY, &deploy.hash);
            Self::resolve(reply, |r| match r {
                MockReply::Accept => Ok(RpcReply::Ok(deploy.hash.clone())),
                _ => Err(FailureCause::Malformed("unexpected scripted reply".to_string())),
            })
            .await
        }

        async fn get_deploy(
            &self,
            endpoint: &str,
            deploy_hash: &str,
        ) -> Result<RpcReply<DeployStatus>, FailureCause> {
            let reply = self.next_reply(endpoint, METHOD_GET_DEPLOY, deploy_hash);
            Self::resolve(reply, |r| match r {
                MockReply::Status(status) => Ok(RpcReply::Ok(status)),
                MockReply::Accept => Ok(RpcReply::Ok(DeployStatus::Pending)),
                _ => Err(FailureCause::Malformed("unexpected scripted reply".to_string())),
            })
            .await
        }
    }
}
