//! Contract installation (`casperflow deploy`).

use crate::error::{GatewayError, GatewayResult};
use casperflow_ledger::{LedgerClient, SignerKeys, SubmissionOutcome};
use chrono::{DateTime, Utc};
use tracing::info;

const WASM_MAGIC: &[u8] = b"\0asm";

/// A submitted installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReceipt {
    pub deploy_hash: String,
    pub account: String,
    pub explorer_url: String,
}

/// Signs a module-bytes deploy carrying `wasm` and submits it.
///
/// # Errors
///
/// `Config` if `wasm` is not a wasm module, `Ledger` if the key cannot
/// sign, `Rejected` or `Unreachable` if no node took the deploy.
pub async fn install_contract(
    client: &LedgerClient,
    signer: &SignerKeys,
    wasm: Vec<u8>,
    at: DateTime<Utc>,
) -> GatewayResult<InstallReceipt> {
    if !wasm.starts_with(WASM_MAGIC) {
        return Err(GatewayError::Config("contract file is not a wasm module".to_string()));
    }
    let account = signer.identity()?;
    let size = wasm.len();
    let intent = client.builder().module_intent(&account, wasm, at);
    let tx = client.build_intent(intent, signer)?;
    info!(tx = %tx.transaction_id(), account = %account.short(8), size, "submitting contract");

    match client.submit(&tx).await {
        SubmissionOutcome::Accepted(deploy_hash) => Ok(InstallReceipt {
            explorer_url: client.config().explorer_deploy_url(&deploy_hash),
            account: account.to_hex(),
            deploy_hash,
        }),
        SubmissionOutcome::Rejected(reason) => Err(GatewayError::Rejected(reason.to_string())),
        SubmissionOutcome::Unreachable(failures) => Err(GatewayError::Unreachable(
            failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )),
    }
}
