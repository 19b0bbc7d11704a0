//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::models::state::StateError;
use crate::services::mailer::MailError;

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and error code.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed. Details are logged, never returned.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// API key or shared secret is missing, invalid, or inactive (401).
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Authenticated, but not allowed to use this endpoint (403).
    #[error("Forbidden")]
    Forbidden,

    /// Resource does not exist or belongs to another tenant (404).
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Request body or parameters are invalid (400).
    #[error("Invalid request")]
    InvalidRequest(String),

    /// Operation conflicts with the resource's current state (409).
    #[error("Conflict")]
    Conflict(String),

    /// Lifecycle transition not allowed from the current state (409).
    #[error(transparent)]
    InvalidState(#[from] StateError),

    /// Tenant has no current subscription (403).
    #[error("An active subscription is required")]
    SubscriptionRequired,

    /// Operation would exceed the tenant's plan (403).
    #[error("Plan limit exceeded")]
    PlanLimitExceeded(String),

    /// The SMTP relay refused the message or could not be reached (502).
    #[error(transparent)]
    Mail(#[from] MailError),
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                "invalid_api_key",
                self.to_string(),
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string()),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::Conflict(ref msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::InvalidState(ref err) => {
                (StatusCode::CONFLICT, "invalid_state", err.to_string())
            }
            AppError::SubscriptionRequired => (
                StatusCode::FORBIDDEN,
                "subscription_required",
                self.to_string(),
            ),
            AppError::PlanLimitExceeded(ref msg) => {
                (StatusCode::FORBIDDEN, "plan_limit_exceeded", msg.clone())
            }
            AppError::Mail(ref err) => match err {
                MailError::InvalidAddress(_) | MailError::InvalidMessage(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_message", err.to_string())
                }
                _ => (StatusCode::BAD_GATEWAY, "mail_delivery_failed", err.to_string()),
            },
            AppError::Database(ref err) => {
                tracing::error!(error = %err, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
