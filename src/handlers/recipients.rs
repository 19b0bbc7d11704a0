//! Recipient list and recipient handlers.

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
    models::recipient::{
        AddRecipientsRequest, AddRecipientsResponse, Recipient, RecipientList,
        RecipientListRequest, RecipientListSummary,
    },
    services::recipient_service,
};

pub async fn create_list(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<RecipientListRequest>,
) -> Result<impl IntoResponse, AppError> {
    let list = recipient_service::create_list(&pool, auth.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(list)))
}

pub async fn list_lists(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<RecipientListSummary>>, AppError> {
    Ok(Json(recipient_service::list_lists(&pool, auth.user_id).await?))
}

pub async fn get_list(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<RecipientListSummary>, AppError> {
    Ok(Json(
        recipient_service::get_list(&pool, auth.user_id, id).await?,
    ))
}

pub async fn update_list(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<RecipientListRequest>,
) -> Result<Json<RecipientList>, AppError> {
    Ok(Json(
        recipient_service::update_list(&pool, auth.user_id, id, request).await?,
    ))
}

pub async fn delete_list(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    recipient_service::delete_list(&pool, auth.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Bulk-add recipients to a list.
///
/// # Endpoint
///
/// `POST /api/v1/recipient-lists/{id}/recipients`
///
/// # Request Body
///
/// ```json
/// {
///   "recipients": [
///     { "email": "Ann@Example.com", "name": "Ann" },
///     { "email": "bob@example.com" },
///     { "email": "not-an-email" }
///   ]
/// }
/// ```
///
/// # Response (200 OK)
///
/// ```json
/// { "added": 2, "skipped_duplicates": 0, "invalid": ["not-an-email"] }
/// ```
///
/// Addresses are stored trimmed and lowercased. Addresses already in the
/// list, or repeated within the request, are counted in
/// `skipped_duplicates`. The batch counts against `max_recipients`.
pub async fn add_recipients(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<AddRecipientsRequest>,
) -> Result<Json<AddRecipientsResponse>, AppError> {
    let result = recipient_service::add_recipients(&pool, &auth, id, request.recipients).await?;
    Ok(Json(result))
}

pub async fn list_recipients(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Recipient>>, AppError> {
    Ok(Json(
        recipient_service::list_recipients(&pool, auth.user_id, id).await?,
    ))
}

pub async fn delete_recipient(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path((list_id, recipient_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    recipient_service::delete_recipient(&pool, auth.user_id, list_id, recipient_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/v1/recipient-lists/{id}/recipients/{recipient_id}/unsubscribe`
///
/// Unsubscribed recipients stay in the list and are skipped by every
/// campaign from now on, including ones already sending.
pub async fn unsubscribe_recipient(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path((list_id, recipient_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Recipient>, AppError> {
    Ok(Json(
        recipient_service::unsubscribe_recipient(&pool, auth.user_id, list_id, recipient_id)
            .await?,
    ))
}
