//! SMTP account handlers.
//!
//! Passwords are accepted on create/update and never returned.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::smtp_account::{ConnectionTestResponse, SmtpAccountRequest, SmtpAccountResponse},
    services::{mailer::MailerFactory, smtp_service},
};

/// `POST /api/v1/smtp-accounts`
///
/// Returns 201 Created. Counts against the plan's `max_smtp_accounts`.
pub async fn create_smtp_account(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<SmtpAccountRequest>,
) -> Result<impl IntoResponse, AppError> {
    let account = smtp_service::create_account(&pool, &auth, request).await?;
    Ok((StatusCode::CREATED, Json(SmtpAccountResponse::from(account))))
}

pub async fn list_smtp_accounts(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<SmtpAccountResponse>>, AppError> {
    let accounts = smtp_service::list_accounts(&pool, auth.user_id).await?;
    Ok(Json(accounts.into_iter().map(Into::into).collect()))
}

pub async fn get_smtp_account(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<SmtpAccountResponse>, AppError> {
    let account = smtp_service::get_owned(&pool, auth.user_id, id).await?;
    Ok(Json(account.into()))
}

pub async fn update_smtp_account(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<SmtpAccountRequest>,
) -> Result<Json<SmtpAccountResponse>, AppError> {
    let account = smtp_service::update_account(&pool, auth.user_id, id, request).await?;
    Ok(Json(account.into()))
}

/// `DELETE /api/v1/smtp-accounts/{id}`
///
/// 409 while a campaign that is not finished still uses the account.
pub async fn delete_smtp_account(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    smtp_service::delete_account(&pool, auth.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Check connectivity and credentials of a stored account.
///
/// # Endpoint
///
/// `POST /api/v1/smtp-accounts/{id}/test`
///
/// # Response (200 OK)
///
/// ```json
/// { "success": false, "error": "permanent delivery failure: 535 5.7.8 authentication failed" }
/// ```
pub async fn test_smtp_account(
    State(pool): State<DbPool>,
    State(mailers): State<Arc<dyn MailerFactory>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionTestResponse>, AppError> {
    let result = smtp_service::test_account(&pool, &mailers, auth.user_id, id).await?;
    Ok(Json(result))
}
