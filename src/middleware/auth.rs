//! Authentication middleware.
//!
//! - `auth_middleware`: tenant API key from `Authorization: Bearer <key>`
//! - `require_admin`: layered after `auth_middleware` on admin routes
//! - `shared_secret_middleware`: static secret guarding the send-email relay

use std::sync::Arc;

use crate::{
    config::Config,
    db::DbPool,
    error::AppError,
    models::{api_key::hash_api_key, user::UserRole},
};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Header carrying the relay secret.
pub const SHARED_SECRET_HEADER: &str = "x-api-secret";

/// Authentication context attached to authenticated requests.
///
/// Inserted into the request extensions; handlers extract it with
/// `Extension<AuthContext>` and scope every query to `user_id`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Tenant that owns the presented key
    pub user_id: Uuid,

    pub email: String,

    pub role: UserRole,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[derive(sqlx::FromRow)]
struct KeyOwner {
    user_id: Uuid,
    email: String,
    #[sqlx(try_from = "String")]
    role: UserRole,
}

/// API key authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <key>` header from request
/// 2. Hash the `<key>` using SHA-256
/// 3. Find an active key whose owner is an active user
/// 4. If found: inject `AuthContext` into request, call next handler
/// 5. If not found: return 401 Unauthorized error
pub async fn auth_middleware(
    State(pool): State<DbPool>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let api_key = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::InvalidApiKey)?;

    let key_hash = hash_api_key(api_key);

    let owner = sqlx::query_as::<_, KeyOwner>(
        r#"
        SELECT u.id AS user_id, u.email, u.role
        FROM api_keys k
        JOIN users u ON u.id = k.user_id
        WHERE k.key_hash = $1 AND k.is_active = true AND u.is_active = true
        "#,
    )
    .bind(&key_hash)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::InvalidApiKey)?;

    request.extensions_mut().insert(AuthContext {
        user_id: owner.user_id,
        email: owner.email,
        role: owner.role,
    });

    Ok(next.run(request).await)
}

/// Reject non-admin callers with 403.
///
/// Must run after `auth_middleware`; a missing context is treated as
/// unauthenticated.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    let auth = request
        .extensions()
        .get::<AuthContext>()
        .ok_or(AppError::InvalidApiKey)?;

    if !auth.is_admin() {
        return Err(AppError::Forbidden);
    }

    Ok(next.run(request).await)
}

/// Compare secrets through their digests so the comparison time does not
/// depend on how many leading bytes match.
fn secrets_match(provided: &str, expected: &str) -> bool {
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Shared-secret guard for `POST /api/send-email`.
pub async fn shared_secret_middleware(
    State(config): State<Arc<Config>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provided = request
        .headers()
        .get(SHARED_SECRET_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::InvalidApiKey)?;

    if config.send_email_secret.is_empty() || !secrets_match(provided, &config.send_email_secret)
    {
        tracing::warn!("rejected send-email request with bad secret");
        return Err(AppError::InvalidApiKey);
    }

    Ok(next.run(request).await)
}
