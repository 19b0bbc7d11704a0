//! User profile, API key and admin user-management handlers.
//!
//! - GET  /api/v1/me
//! - POST /api/v1/me/api-key
//! - POST /api/v1/admin/users
//! - GET  /api/v1/admin/users
//! - POST /api/v1/admin/users/{id}/deactivate

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
    models::user::{CreateUserRequest, IssuedKeyResponse, MeResponse, UserResponse},
    services::user_service,
};

/// Profile of the caller with their subscription and current usage.
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "user": { "id": "...", "email": "ann@example.com", "role": "user", ... },
///   "subscription": {
///     "plan_name": "Starter",
///     "status": "active",
///     "ends_at": "2025-05-01T00:00:00Z",
///     ...
///   },
///   "usage": { "campaigns": 2, "recipients": 140, "smtp_accounts": 1, "emails_this_month": 380, "emails_queued": 0 }
/// }
/// ```
pub async fn me(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<MeResponse>, AppError> {
    let me = user_service::me(&pool, auth.user_id).await?;
    Ok(Json(me))
}

/// Rotate the caller's API key. Every previous key stops working; the new
/// key is returned once.
pub async fn rotate_api_key(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<IssuedKeyResponse>, AppError> {
    let issued = user_service::rotate_api_key(&pool, auth.user_id).await?;
    Ok(Json(issued))
}

/// Create a user (admin only).
///
/// # Request Body
///
/// ```json
/// { "email": "ann@example.com", "display_name": "Ann", "role": "user" }
/// ```
///
/// # Response
///
/// 201 Created with the user and its API key. The key is not retrievable
/// later.
pub async fn create_user(
    State(pool): State<DbPool>,
    Json(request): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let issued = user_service::create_user(&pool, request).await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

pub async fn list_users(State(pool): State<DbPool>) -> Result<Json<Vec<UserResponse>>, AppError> {
    let users = user_service::list_users(&pool).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// Deactivate a user (admin only). Admins cannot deactivate themselves.
pub async fn deactivate_user(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserResponse>, AppError> {
    if id == auth.user_id {
        return Err(AppError::InvalidRequest(
            "You cannot deactivate your own account".to_string(),
        ));
    }
    let user = user_service::deactivate_user(&pool, id).await?;
    tracing::info!(user_id = %id, by = %auth.email, "user deactivated");
    Ok(Json(user.into()))
}
