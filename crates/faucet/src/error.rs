//! Error types for the faucet service

use crate::ledger::Scope;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Faucet service errors
#[derive(Error, Debug)]
pub enum FaucetError {
    /// Missing or malformed user input. The message is shown to the user as is.
    #[error("{0}")]
    Validation(String),

    #[error("{reason}")]
    RateLimited { scope: Scope, reason: String },

    #[error("Insufficient funds in faucet")]
    InsufficientFunds,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Record encoding error: {0}")]
    CodecError(#[from] bincode::Error),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Transfer submission did not finish within {0} seconds")]
    SubmissionTimedOut(u64),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl FaucetError {
    /// Errors raised by the claim ledger. These fail the request closed and
    /// are never shown to the user verbatim.
    pub fn is_storage(&self) -> bool {
        matches!(self, FaucetError::DatabaseError(_) | FaucetError::CodecError(_))
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            FaucetError::Validation(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            FaucetError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            FaucetError::InsufficientFunds => (StatusCode::SERVICE_UNAVAILABLE, "INSUFFICIENT_FUNDS"),
            FaucetError::RpcError(_) => (StatusCode::BAD_GATEWAY, "RPC_ERROR"),
            FaucetError::SubmissionTimedOut(_) => (StatusCode::GATEWAY_TIMEOUT, "SUBMISSION_TIMED_OUT"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        // Storage and internal details stay in the server log.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self);
            "Request failed. Please try again.".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": error_code,
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));

        (status, body).into_response()
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;
