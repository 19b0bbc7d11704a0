//! Sales-lead handlers.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::lead::{Lead, LeadListQuery, LeadRequest, PipelineStage, StageChangeRequest},
    services::lead_service,
};

pub async fn create_lead(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<LeadRequest>,
) -> Result<impl IntoResponse, AppError> {
    let lead = lead_service::create_lead(&pool, auth.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(lead)))
}

/// `GET /api/v1/leads?stage=qualified`
pub async fn list_leads(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<LeadListQuery>,
) -> Result<Json<Vec<Lead>>, AppError> {
    Ok(Json(
        lead_service::list_leads(&pool, auth.user_id, query.stage).await?,
    ))
}

pub async fn get_lead(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Lead>, AppError> {
    Ok(Json(lead_service::get_lead(&pool, auth.user_id, id).await?))
}

pub async fn update_lead(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<LeadRequest>,
) -> Result<Json<Lead>, AppError> {
    Ok(Json(
        lead_service::update_lead(&pool, auth.user_id, id, request).await?,
    ))
}

pub async fn delete_lead(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    lead_service::delete_lead(&pool, auth.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Move a lead to another stage.
///
/// # Endpoint
///
/// `POST /api/v1/leads/{id}/stage` with `{"stage": "proposal"}`
///
/// Won and lost leads can only be reopened to `new`; anything else is 409.
pub async fn change_stage(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<StageChangeRequest>,
) -> Result<Json<Lead>, AppError> {
    Ok(Json(
        lead_service::change_stage(&pool, auth.user_id, id, request.stage).await?,
    ))
}

/// `GET /api/v1/leads/pipeline`: count and value per stage, every stage
/// listed in order.
pub async fn pipeline(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<PipelineStage>>, AppError> {
    Ok(Json(lead_service::pipeline(&pool, auth.user_id).await?))
}
