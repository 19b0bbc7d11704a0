//! Plan catalogue handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::plan::{Plan, PlanRequest},
    services::plan_service,
};

/// `GET /api/v1/plans`: plans open for purchase.
pub async fn list_plans(State(pool): State<DbPool>) -> Result<Json<Vec<Plan>>, AppError> {
    Ok(Json(plan_service::list_active_plans(&pool).await?))
}

/// `POST /api/v1/admin/plans`
pub async fn create_plan(
    State(pool): State<DbPool>,
    Json(request): Json<PlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    let plan = plan_service::create_plan(&pool, request).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

/// `PUT /api/v1/admin/plans/{id}`
pub async fn update_plan(
    State(pool): State<DbPool>,
    Path(id): Path<Uuid>,
    Json(request): Json<PlanRequest>,
) -> Result<Json<Plan>, AppError> {
    Ok(Json(plan_service::update_plan(&pool, id, request).await?))
}

/// `DELETE /api/v1/admin/plans/{id}`: soft delete.
pub async fn delete_plan(
    State(pool): State<DbPool>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    plan_service::deactivate_plan(&pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
