//! Payment submission and review handlers.
//!
//! Tenants submit payments against a plan; an admin approves or rejects
//! them. Approval activates or extends the tenant's subscription.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        payment::{CreatePaymentRequest, Payment, PaymentListQuery, ReviewPaymentRequest},
        subscription::Subscription,
    },
    services::payment_service,
};

/// Submit a payment for review.
///
/// # Endpoint
///
/// `POST /api/v1/payments`
///
/// # Request Body
///
/// ```json
/// {
///   "plan_id": "550e8400-e29b-41d4-a716-446655440000",
///   "amount_cents": 1900,
///   "method": "bank_transfer",
///   "reference": "TRX-0042"
/// }
/// ```
///
/// # Response
///
/// - **201 Created**: the payment, status `pending`
/// - **400**: amount below the plan price or missing method
/// - **404**: plan unknown or retired
pub async fn submit_payment(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let payment = payment_service::submit_payment(&pool, auth.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// `GET /api/v1/payments`: the caller's own payments, newest first.
pub async fn list_my_payments(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<Payment>>, AppError> {
    Ok(Json(
        payment_service::list_user_payments(&pool, auth.user_id).await?,
    ))
}

/// `GET /api/v1/admin/payments?status=pending`
pub async fn list_payments(
    State(pool): State<DbPool>,
    Query(query): Query<PaymentListQuery>,
) -> Result<Json<Vec<Payment>>, AppError> {
    Ok(Json(
        payment_service::list_payments(&pool, query.status).await?,
    ))
}

#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    pub payment: Payment,
    pub subscription: Subscription,
}

/// Approve a pending payment.
///
/// # Endpoint
///
/// `POST /api/v1/admin/payments/{id}/approve`
///
/// The body (`{"note": "..."}`) is optional.
///
/// # Response
///
/// - **200 OK**: the approved payment and the resulting subscription
/// - **409**: the payment was already reviewed
pub async fn approve_payment(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    body: Option<Json<ReviewPaymentRequest>>,
) -> Result<Json<ApprovalResponse>, AppError> {
    let note = body.map(|Json(b)| b).unwrap_or_default().note;
    let (payment, subscription) = payment_service::approve_payment(&pool, id, note).await?;
    tracing::info!(payment_id = %id, by = %auth.email, "payment reviewed");
    Ok(Json(ApprovalResponse {
        payment,
        subscription,
    }))
}

/// `POST /api/v1/admin/payments/{id}/reject`
pub async fn reject_payment(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    body: Option<Json<ReviewPaymentRequest>>,
) -> Result<Json<Payment>, AppError> {
    let note = body.map(|Json(b)| b).unwrap_or_default().note;
    let payment = payment_service::reject_payment(&pool, id, note).await?;
    tracing::info!(payment_id = %id, by = %auth.email, "payment reviewed");
    Ok(Json(payment))
}
