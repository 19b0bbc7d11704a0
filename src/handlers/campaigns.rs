//! Campaign handlers.
//!
//! This module implements the campaign API:
//! - CRUD under /api/v1/campaigns
//! - lifecycle actions: send, schedule, pause, resume, cancel
//! - GET /api/v1/campaigns/{id}/report
//!
//! Lifecycle actions only change the campaign status (and, for `send`,
//! queue its deliveries). Messages go out from the background dispatcher.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::campaign::{
        Campaign, CampaignEvent, CampaignReport, CampaignRequest, CampaignStatus, ScheduleRequest,
    },
    services::campaign_service,
};

#[derive(Debug, Deserialize)]
pub struct CampaignListQuery {
    pub status: Option<CampaignStatus>,
}

/// Create a campaign.
///
/// # Endpoint
///
/// `POST /api/v1/campaigns`
///
/// # Request Body
///
/// ```json
/// {
///   "name": "Spring launch",
///   "subject": "Hi {{name}}",
///   "body_html": "<p>Hello {{name}}</p>",
///   "body_text": "Hello {{name}}",
///   "recipient_list_id": "550e8400-e29b-41d4-a716-446655440000",
///   "smtp_account_id": "660e8400-e29b-41d4-a716-446655440001",
///   "delay_seconds": 2,
///   "speed_limit_per_hour": 500
/// }
/// ```
///
/// # Response
///
/// - **201 Created**: the campaign in `draft`, or `scheduled` when
///   `scheduled_at` was given
/// - **400**: validation failure
/// - **403**: no subscription or `max_campaigns` reached
/// - **404**: list or SMTP account not owned by the caller
pub async fn create_campaign(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CampaignRequest>,
) -> Result<impl IntoResponse, AppError> {
    let campaign = campaign_service::create_campaign(&pool, &auth, request).await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

/// `GET /api/v1/campaigns?status=sending`
pub async fn list_campaigns(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<CampaignListQuery>,
) -> Result<Json<Vec<Campaign>>, AppError> {
    Ok(Json(
        campaign_service::list_campaigns(&pool, auth.user_id, query.status).await?,
    ))
}

pub async fn get_campaign(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(
        campaign_service::get_owned(&pool, auth.user_id, id).await?,
    ))
}

/// `PUT /api/v1/campaigns/{id}`: only while `draft` or `scheduled`.
pub async fn update_campaign(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<CampaignRequest>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(
        campaign_service::update_campaign(&pool, auth.user_id, id, request).await?,
    ))
}

pub async fn delete_campaign(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    campaign_service::delete_campaign(&pool, auth.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start sending a campaign now.
///
/// # Endpoint
///
/// `POST /api/v1/campaigns/{id}/send`
///
/// Queues one delivery per subscribed recipient of the campaign's list and
/// moves the campaign to `sending`.
///
/// # Response
///
/// - **200 OK**: the campaign, status `sending`
/// - **400**: the list has no subscribed recipients
/// - **403**: the send would exceed the monthly email limit
/// - **409**: the campaign is not `draft` or `scheduled`
pub async fn send_campaign(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(
        campaign_service::start_campaign(&pool, &auth, id).await?,
    ))
}

/// `POST /api/v1/campaigns/{id}/schedule` with `{"scheduled_at": "..."}`.
pub async fn schedule_campaign(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(
        campaign_service::schedule_campaign(&pool, auth.user_id, id, request.scheduled_at)
            .await?,
    ))
}

pub async fn pause_campaign(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(
        campaign_service::control_campaign(&pool, auth.user_id, id, CampaignEvent::Pause).await?,
    ))
}

pub async fn resume_campaign(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(
        campaign_service::control_campaign(&pool, auth.user_id, id, CampaignEvent::Resume).await?,
    ))
}

/// Cancel a campaign. Deliveries not yet sent stay `pending` in the report.
pub async fn cancel_campaign(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(
        campaign_service::control_campaign(&pool, auth.user_id, id, CampaignEvent::Cancel).await?,
    ))
}

/// Delivery statistics of a campaign.
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "campaign_id": "...",
///   "status": "completed",
///   "total": 120,
///   "pending": 0,
///   "sent": 118,
///   "failed": 2,
///   "failures": [
///     { "email": "gone@example.org", "attempts": 1, "last_error": "permanent delivery failure: 550 ..." }
///   ]
/// }
/// ```
pub async fn campaign_report(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignReport>, AppError> {
    Ok(Json(
        campaign_service::campaign_report(&pool, auth.user_id, id).await?,
    ))
}
