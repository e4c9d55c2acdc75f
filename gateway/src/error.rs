//! Gateway error types and their HTTP mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use casperflow_billing::BillingError;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::error;

/// Errors raised while loading gateway configuration or wiring services.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("deploy rejected: {0}")]
    Rejected(String),

    #[error("no ledger endpoint accepted the deploy: {0}")]
    Unreachable(String),

    #[error(transparent)]
    Ledger(#[from] casperflow_ledger::LedgerError),

    #[error(transparent)]
    Store(#[from] casperflow_store::StoreError),

    #[error(transparent)]
    Billing(#[from] BillingError),
}

/// Result type for gateway setup.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Billing(#[from] BillingError),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Billing(e) => match e {
                BillingError::MalformedKey(_) => (StatusCode::BAD_REQUEST, "MALFORMED_KEY"),
                BillingError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
                BillingError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                BillingError::PlanNotFound(_) => (StatusCode::NOT_FOUND, "PLAN_NOT_FOUND"),
                BillingError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "INVALID_TRANSITION")
                }
                BillingError::PlanDeprecated(_) => (StatusCode::CONFLICT, "PLAN_DEPRECATED"),
                BillingError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
                BillingError::SigningFailure(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "SIGNING_FAILURE")
                }
                BillingError::TerminalRejection(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "LEDGER_REJECTED")
                }
                BillingError::Unreachable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "LEDGER_UNREACHABLE")
                }
                BillingError::KeyGeneration(_)
                | BillingError::Ledger(_)
                | BillingError::Storage(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        if status.is_server_error() {
            error!(code, error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: self.to_string(),
            code,
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for HTTP handlers.
pub type ApiResult<T> = Result<T, ApiError>;
