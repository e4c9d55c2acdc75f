//! HTTP handlers.

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use casperflow_billing::{BillingError, Verification, blocking};
use casperflow_types::{BillingPeriod, Identity, Motes, Plan, SubscriptionRecord, SubscriptionState};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

// ── Verification ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyQuery {
    pub api_key: Option<String>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_name: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at_human: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

impl VerifyResponse {
    fn rejected(error: &'static str) -> (StatusCode, Json<Self>) {
        (
            StatusCode::BAD_REQUEST,
            Json(Self {
                error: Some(error),
                ..Self::default()
            }),
        )
    }
}

/// `GET /verify?apiKey=`
///
/// Malformed keys are refused with 400 before the store is consulted.
pub async fn verify_key(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> ApiResult<(StatusCode, Json<VerifyResponse>)> {
    let Some(token) = query.api_key.filter(|k| !k.is_empty()) else {
        return Ok(VerifyResponse::rejected("Missing apiKey parameter"));
    };

    let verifier = Arc::clone(&state.verifier);
    let verification = match blocking(move || verifier.verify(&token)).await {
        Ok(v) => v,
        Err(BillingError::MalformedKey(reason)) => {
            debug!(%reason, "rejected malformed api key");
            return Ok(VerifyResponse::rejected("Invalid API key format"));
        }
        Err(e) => return Err(e.into()),
    };

    Ok((StatusCode::OK, Json(verify_response(&state, verification)?)))
}

fn verify_response(state: &AppState, v: Verification) -> ApiResult<VerifyResponse> {
    let plan_name = match &v.plan_id {
        Some(id) => state.catalog().get(id)?.map(|plan| plan.name),
        None => None,
    };
    Ok(VerifyResponse {
        valid: v.valid,
        plan_id: v.plan_id.map(String::from),
        plan_name,
        expires_at: v.expires_at.map(|at| at.timestamp_millis()),
        expires_at_human: v.expires_at.map(iso8601),
        reason: v.reason.map(|r| r.as_str()),
        error: None,
        network: Some(state.network.clone()),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub api_key: Option<String>,
    /// Plan name or id.
    pub plan_name: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub expires_at: Option<i64>,
    /// Tagged hex public key of the subscriber.
    pub subscriber_wallet: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

/// `POST /verify`: registers a subscription confirmed outside this service.
pub async fn register_key(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let (Some(api_key), Some(plan), Some(expires_at), Some(wallet)) = (
        body.api_key,
        body.plan_name,
        body.expires_at,
        body.subscriber_wallet,
    ) else {
        return Err(ApiError::BadRequest(
            "Missing required fields: apiKey, planName, expiresAt, subscriberWallet".to_string(),
        ));
    };

    let expires_at = from_millis(expires_at, "expiresAt")?;
    let subscriber = Identity::parse(&wallet)
        .map_err(|e| ApiError::BadRequest(format!("invalid subscriberWallet: {e}")))?;

    let orchestrator = Arc::clone(&state.orchestrator);
    let record = blocking(move || {
        orchestrator.register_confirmed(&api_key, &plan, expires_at, subscriber)
    })
    .await?;
    info!(key = %record.redacted_key(), plan = %record.plan_id, "api key registered");

    Ok(Json(MessageResponse {
        success: true,
        message: "API key registered successfully".to_string(),
    }))
}

// ── Plans ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanView {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Display price, e.g. `50.00 CSPR`.
    pub price: String,
    pub price_motes: Motes,
    pub usage_price_motes: Motes,
    pub period: String,
    pub period_seconds: u64,
    pub trial_days: u32,
    pub deprecated: bool,
    pub merchant: String,
    pub contract_hash: String,
}

impl PlanView {
    fn new(plan: Plan, contract_hash: &str) -> Self {
        Self {
            period: BillingPeriod::from_secs(plan.billing_period_secs).label(),
            period_seconds: plan.billing_period_secs,
            price: plan.base_price.format_cspr(2),
            price_motes: plan.base_price,
            usage_price_motes: plan.usage_price,
            trial_days: plan.trial_days,
            deprecated: plan.deprecated,
            merchant: plan.merchant.to_hex(),
            contract_hash: contract_hash.to_string(),
            id: plan.id.into(),
            name: plan.name,
            description: plan.description,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlansResponse {
    pub success: bool,
    pub network: String,
    pub contract_hash: String,
    pub plans: Vec<PlanView>,
    pub total_plans: usize,
}

/// `GET /plans`
pub async fn list_plans(State(state): State<Arc<AppState>>) -> ApiResult<Json<PlansResponse>> {
    let contract_hash = state.contract_hash();
    let plans: Vec<PlanView> = state
        .catalog()
        .list()?
        .into_iter()
        .map(|plan| PlanView::new(plan, contract_hash))
        .collect();

    Ok(Json(PlansResponse {
        success: true,
        network: state.network.clone(),
        contract_hash: contract_hash.to_string(),
        total_plans: plans.len(),
        plans,
    }))
}

/// `GET /plans/{planId}`, by id or by name.
pub async fn get_plan(
    State(state): State<Arc<AppState>>,
    Path(plan_id): Path<String>,
) -> ApiResult<Json<PlanView>> {
    let plan = state
        .catalog()
        .find(&plan_id)?
        .ok_or_else(|| ApiError::NotFound("Plan not found".to_string()))?;
    Ok(Json(PlanView::new(plan, state.contract_hash())))
}

// ── Reconciliation webhook ───────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub transaction_id: String,
    /// Milliseconds since the Unix epoch; defaults to now.
    #[serde(default)]
    pub confirmed_at: Option<i64>,
    /// Milliseconds since the Unix epoch; defaults to one billing period
    /// after confirmation.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailRequest {
    pub transaction_id: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResponse {
    pub success: bool,
    pub state: SubscriptionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl From<SubscriptionRecord> for SettlementResponse {
    fn from(record: SubscriptionRecord) -> Self {
        Self {
            success: true,
            state: record.state,
            expires_at: record.expires_at.map(|at| at.timestamp_millis()),
        }
    }
}

/// `POST /reconcile/confirm`
pub async fn confirm_transaction(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ConfirmRequest>, JsonRejection>,
) -> ApiResult<Json<SettlementResponse>> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let orchestrator = Arc::clone(&state.orchestrator);
    let confirmed_at = match body.confirmed_at {
        Some(ms) => from_millis(ms, "confirmedAt")?,
        None => orchestrator.now(),
    };

    let expires_at = match body.expires_at {
        Some(ms) => {
            let expires_at = from_millis(ms, "expiresAt")?;
            if expires_at <= confirmed_at {
                return Err(ApiError::BadRequest(
                    "expiresAt must be after confirmedAt".to_string(),
                ));
            }
            Some(expires_at)
        }
        None => None,
    };

    let tx = body.transaction_id;
    let record = blocking(move || match expires_at {
        Some(expires_at) => orchestrator.confirm(&tx, confirmed_at, expires_at),
        None => orchestrator.confirm_for_plan(&tx, confirmed_at),
    })
    .await?;
    Ok(Json(record.into()))
}

/// `POST /reconcile/fail`
pub async fn fail_transaction(
    State(state): State<Arc<AppState>>,
    body: Result<Json<FailRequest>, JsonRejection>,
) -> ApiResult<Json<SettlementResponse>> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let orchestrator = Arc::clone(&state.orchestrator);
    let record =
        blocking(move || orchestrator.fail(&body.transaction_id, &body.reason)).await?;
    Ok(Json(record.into()))
}

// ── Helpers ──────────────────────────────────────────────────────

fn from_millis(ms: i64, field: &str) -> ApiResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| ApiError::BadRequest(format!("{field} is out of range")))
}

fn iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
