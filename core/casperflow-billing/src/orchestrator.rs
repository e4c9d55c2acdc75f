//! Settlement orchestration.
//!
//! The orchestrator is the only writer of subscription records. A record is
//! written `Pending` only after the ledger accepted the transaction, and
//! promoted to `Active` only after the ledger confirmed it. No store lock is
//! held across a ledger call, and async paths reach the store through the
//! blocking pool.

use crate::catalog::PlanCatalog;
use crate::error::{BillingError, BillingResult};
use casperflow_credential::{ApiKey, ParsedKey};
use casperflow_ledger::{LedgerClient, SignedTransaction, SignerKeys, SubmissionOutcome};
use casperflow_store::{RecordRef, StoreError, StoreResult, SubscriptionStore, Transition};
use casperflow_types::{
    Clock, Identity, NewPlan, Plan, PlanId, SubscriptionRecord, SubscriptionRequest,
    SubscriptionState,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attempts at finding an unused API key before giving up.
const KEY_ATTEMPTS: usize = 3;

/// Coordinates the credential codec, ledger client and store.
pub struct SettlementOrchestrator {
    ledger: Arc<LedgerClient>,
    store: Arc<dyn SubscriptionStore>,
    catalog: Arc<PlanCatalog>,
    clock: Arc<dyn Clock>,
}

impl SettlementOrchestrator {
    pub fn new(
        ledger: Arc<LedgerClient>,
        store: Arc<dyn SubscriptionStore>,
        catalog: Arc<PlanCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            store,
            catalog,
            clock,
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &LedgerClient {
        &self.ledger
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<PlanCatalog> {
        &self.catalog
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ── Subscriptions ────────────────────────────────────────────

    /// Pays for a plan on chain and returns the subscriber's API key.
    ///
    /// Resubmitting the same request (same subscriber, plan and nonce)
    /// returns the key already issued for it without a second charge.
    ///
    /// # Errors
    ///
    /// `PlanNotFound`/`PlanDeprecated` before anything is signed;
    /// `SigningFailure` if the keys cannot sign for the subscriber;
    /// `TerminalRejection` or `Unreachable` from the ledger, in which case
    /// nothing is stored.
    pub async fn subscribe(
        &self,
        request: &SubscriptionRequest,
        signer: &SignerKeys,
    ) -> BillingResult<ApiKey> {
        self.catalog.require_open(&request.plan_id)?;

        let mut key = ApiKey::issue(&request.subscriber, &request.plan_id)?;
        let tx = self.ledger.build(request, signer)?;
        let tx_id = tx.transaction_id();

        let lookup = tx_id.clone();
        if let Some(existing) = self.on_store(move |s| s.find_by_transaction(&lookup)).await? {
            info!(tx = %tx_id, key = %existing.redacted_key(), "subscription already recorded");
            return stored_key(&existing);
        }

        self.submit(&tx).await?;

        for attempt in 1..=KEY_ATTEMPTS {
            let record = SubscriptionRecord::pending(
                key.as_str(),
                request.subscriber.clone(),
                request.plan_id.clone(),
                Some(tx_id.clone()),
                self.clock.now(),
            );
            match self.on_store(move |s| s.put_pending(record)).await {
                Ok(()) => {
                    info!(tx = %tx_id, key = %key, plan = %request.plan_id, "subscription pending");
                    return Ok(key);
                }
                Err(StoreError::DuplicateKey(_)) if attempt < KEY_ATTEMPTS => {
                    warn!(attempt, "api key collision, issuing another");
                    key = ApiKey::issue(&request.subscriber, &request.plan_id)?;
                }
                Err(StoreError::DuplicateTransaction(_)) => {
                    // A concurrent identical request stored first.
                    let lookup = tx_id.clone();
                    let existing = self
                        .on_store(move |s| s.find_by_transaction(&lookup))
                        .await?
                        .ok_or_else(|| BillingError::NotFound(tx_id.clone()))?;
                    return stored_key(&existing);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(BillingError::Conflict("could not allocate a unique api key".to_string()))
    }

    /// Settles a confirmed transaction with an explicit expiry: a pending
    /// subscription becomes active, an in-flight renewal extends the term.
    pub fn confirm(
        &self,
        transaction_id: &str,
        confirmed_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> BillingResult<SubscriptionRecord> {
        let record = self.find_by_transaction(transaction_id)?;
        self.settle(&record, transaction_id, confirmed_at, expires_at)
    }

    /// Confirms a subscription or renewal transaction, deriving the expiry
    /// from the plan's billing period.
    pub fn confirm_for_plan(
        &self,
        transaction_id: &str,
        confirmed_at: DateTime<Utc>,
    ) -> BillingResult<SubscriptionRecord> {
        let record = self.find_by_transaction(transaction_id)?;
        let plan = self
            .catalog
            .get(&record.plan_id)?
            .ok_or_else(|| BillingError::PlanNotFound(record.plan_id.to_string()))?;

        let starts_at = if is_renewal(&record, transaction_id) {
            record
                .expires_at
                .map_or(confirmed_at, |current| current.max(confirmed_at))
        } else {
            confirmed_at
        };
        self.settle(&record, transaction_id, confirmed_at, starts_at + plan.billing_period())
    }

    /// Records that the ledger failed a transaction. A failed subscription
    /// never becomes active; a failed renewal leaves the current term alone.
    pub fn fail(&self, transaction_id: &str, reason: &str) -> BillingResult<SubscriptionRecord> {
        let now = self.clock.now();
        let record = self.find_by_transaction(transaction_id)?;

        if is_renewal(&record, transaction_id) {
            warn!(tx = transaction_id, reason, "renewal failed");
            return Ok(self.store.cancel_renewal(&record.api_key, transaction_id, now)?);
        }

        let failed = self.store.transition(
            RecordRef::Transaction(transaction_id),
            Transition::fail(reason, now),
        )?;
        warn!(tx = transaction_id, key = %failed.redacted_key(), reason, "subscription failed");
        Ok(failed)
    }

    /// Revokes a key immediately.
    pub fn revoke(&self, api_key: &str) -> BillingResult<SubscriptionRecord> {
        let key = ParsedKey::parse(api_key)?;
        let record = self
            .store
            .transition(RecordRef::ApiKey(key.as_str()), Transition::revoke(self.clock.now()))?;
        info!(key = %key.redacted(), "subscription revoked");
        Ok(record)
    }

    /// Submits a renewal for an active subscription. The new term starts
    /// once the renewal is confirmed.
    ///
    /// Returns the renewal transaction id. Resubmitting the renewal already
    /// in flight returns its id; a different renewal is refused with
    /// `Conflict` until the first one settles.
    pub async fn renew(
        &self,
        api_key: &str,
        signer: &SignerKeys,
        nonce: u64,
    ) -> BillingResult<String> {
        let key = ParsedKey::parse(api_key)?;
        let lookup = key.as_str().to_string();
        let record = self
            .on_store(move |s| s.get(&lookup))
            .await?
            .ok_or_else(|| BillingError::NotFound(key.redacted()))?;
        if record.state != SubscriptionState::Active {
            return Err(BillingError::InvalidTransition {
                from: record.state,
                to: SubscriptionState::Active,
            });
        }
        self.catalog.require_open(&record.plan_id)?;

        let now = self.clock.now();
        let intent = self
            .ledger
            .builder()
            .renew_intent(&record.subscriber, &record.plan_id, nonce, now);
        let unsigned = self.ledger.builder().prepare(intent);
        let tx_id = unsigned.transaction_id();
        if let Some(current) = record
            .renewal_transaction_id
            .as_deref()
            .filter(|current| *current != tx_id.as_str())
        {
            return Err(BillingError::Conflict(format!(
                "renewal {current} is still in flight"
            )));
        }

        let tx = unsigned.sign(signer)?;
        if record.renewal_transaction_id.is_some() {
            debug!(tx = %tx_id, "renewal already submitted");
            return Ok(tx_id);
        }

        self.submit(&tx).await?;
        let (owner, renewal) = (key.as_str().to_string(), tx_id.clone());
        self.on_store(move |s| s.begin_renewal(&owner, &renewal, now))
            .await?;
        info!(tx = %tx_id, key = %key.redacted(), "renewal pending");
        Ok(tx_id)
    }

    /// Registers a subscription that was paid for and confirmed elsewhere
    /// (e.g. by a wallet-driven frontend), making the key valid until
    /// `expires_at`.
    pub fn register_confirmed(
        &self,
        api_key: &str,
        plan: &str,
        expires_at: DateTime<Utc>,
        subscriber: Identity,
    ) -> BillingResult<SubscriptionRecord> {
        let key = ParsedKey::parse(api_key)?;
        let plan = self
            .catalog
            .find(plan)?
            .ok_or_else(|| BillingError::PlanNotFound(plan.to_string()))?;
        let now = self.clock.now();
        if expires_at <= now {
            return Err(BillingError::InvalidInput("expiry must be in the future".to_string()));
        }

        self.store.put_pending(SubscriptionRecord::pending(
            key.as_str(),
            subscriber,
            plan.id.clone(),
            None,
            now,
        ))?;
        let record = self.store.transition(
            RecordRef::ApiKey(key.as_str()),
            Transition::activate(now, expires_at),
        )?;
        info!(key = %key.redacted(), plan = %plan.id, %expires_at, "registered confirmed subscription");
        Ok(record)
    }

    // ── Plans ────────────────────────────────────────────────────

    /// Creates a plan on chain, then adds it to the catalog.
    ///
    /// Returns the plan and its creation transaction id.
    pub async fn create_plan(
        &self,
        merchant: &SignerKeys,
        input: NewPlan,
        nonce: u64,
    ) -> BillingResult<(Plan, String)> {
        let now = self.clock.now();
        let plan = Plan::create(PlanId::new(), merchant.identity()?, input, now)?;
        let intent = self.ledger.builder().create_plan_intent(&plan, nonce, now);
        let tx = self.ledger.build_intent(intent, merchant)?;

        self.submit(&tx).await?;
        self.catalog.insert(plan.clone())?;
        Ok((plan, tx.transaction_id()))
    }

    /// Deactivates a plan on chain and marks it deprecated.
    pub async fn deprecate_plan(
        &self,
        merchant: &SignerKeys,
        plan_id: &PlanId,
        nonce: u64,
    ) -> BillingResult<Plan> {
        let plan = self
            .catalog
            .get(plan_id)?
            .ok_or_else(|| BillingError::PlanNotFound(plan_id.to_string()))?;
        if merchant.identity()? != plan.merchant {
            return Err(BillingError::SigningFailure(
                "signer is not the plan's merchant".to_string(),
            ));
        }
        if plan.deprecated {
            return Ok(plan);
        }

        let intent = self.ledger.builder().deactivate_plan_intent(
            &plan.merchant,
            plan_id,
            nonce,
            self.clock.now(),
        );
        let tx = self.ledger.build_intent(intent, merchant)?;
        self.submit(&tx).await?;
        self.catalog.deprecate(plan_id)
    }

    // ── Helpers ──────────────────────────────────────────────────

    async fn submit(&self, tx: &SignedTransaction) -> BillingResult<()> {
        match self.ledger.submit(tx).await {
            SubmissionOutcome::Accepted(_) => Ok(()),
            SubmissionOutcome::Rejected(reason) => Err(BillingError::TerminalRejection(reason)),
            SubmissionOutcome::Unreachable(failures) => Err(BillingError::Unreachable(
                failures
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )),
        }
    }

    fn settle(
        &self,
        record: &SubscriptionRecord,
        transaction_id: &str,
        confirmed_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> BillingResult<SubscriptionRecord> {
        if is_renewal(record, transaction_id) {
            let renewed = self.store.extend(&record.api_key, expires_at, confirmed_at)?;
            info!(tx = transaction_id, key = %renewed.redacted_key(), %expires_at, "subscription renewed");
            return Ok(renewed);
        }

        let active = self.store.transition(
            RecordRef::Transaction(transaction_id),
            Transition::activate(confirmed_at, expires_at),
        )?;
        info!(tx = transaction_id, key = %active.redacted_key(), %expires_at, "subscription active");
        Ok(active)
    }

    /// Runs a store call on the blocking pool.
    async fn on_store<T, F>(&self, call: F) -> StoreResult<T>
    where
        F: FnOnce(&dyn SubscriptionStore) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || call(store.as_ref()))
            .await
            .map_err(|e| StoreError::Storage(format!("store task failed: {e}")))?
    }

    fn find_by_transaction(&self, transaction_id: &str) -> BillingResult<SubscriptionRecord> {
        self.store
            .find_by_transaction(transaction_id)?
            .ok_or_else(|| BillingError::NotFound(format!("tx {transaction_id}")))
    }
}

/// Runs synchronous store-backed work (verification, settlement) on the
/// blocking pool.
///
/// # Errors
///
/// Whatever `work` returns, or `Storage` if the task panicked.
pub async fn blocking<T, F>(work: F) -> BillingResult<T>
where
    F: FnOnce() -> BillingResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| BillingError::Storage(format!("blocking task failed: {e}")))?
}

fn is_renewal(record: &SubscriptionRecord, transaction_id: &str) -> bool {
    record.renewal_transaction_id.as_deref() == Some(transaction_id)
}

fn stored_key(record: &SubscriptionRecord) -> BillingResult<ApiKey> {
    Ok(ParsedKey::parse(&record.api_key)?.into())
}
