//! Subscription plan catalogue.

use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::plan::{Plan, PlanRequest},
};

pub async fn list_active_plans(pool: &DbPool) -> Result<Vec<Plan>, AppError> {
    let plans = sqlx::query_as::<_, Plan>(
        "SELECT * FROM plans WHERE is_active = true ORDER BY price_cents, name",
    )
    .fetch_all(pool)
    .await?;
    Ok(plans)
}

pub async fn create_plan(pool: &DbPool, request: PlanRequest) -> Result<Plan, AppError> {
    request.validate()?;

    let plan = sqlx::query_as::<_, Plan>(
        r#"
        INSERT INTO plans (
            name, description, price_cents, currency, duration_days,
            max_campaigns, max_recipients, max_smtp_accounts, monthly_email_limit
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(request.name.trim())
    .bind(request.description)
    .bind(request.price_cents)
    .bind(request.currency.to_uppercase())
    .bind(request.duration_days)
    .bind(request.max_campaigns)
    .bind(request.max_recipients)
    .bind(request.max_smtp_accounts)
    .bind(request.monthly_email_limit)
    .fetch_one(pool)
    .await?;

    tracing::info!(plan_id = %plan.id, name = %plan.name, "plan created");

    Ok(plan)
}

/// Replace a plan. Running subscriptions pick up the new limits at once;
/// their end dates are unchanged.
pub async fn update_plan(pool: &DbPool, id: Uuid, request: PlanRequest) -> Result<Plan, AppError> {
    request.validate()?;

    sqlx::query_as::<_, Plan>(
        r#"
        UPDATE plans
        SET name = $1, description = $2, price_cents = $3, currency = $4,
            duration_days = $5, max_campaigns = $6, max_recipients = $7,
            max_smtp_accounts = $8, monthly_email_limit = $9, updated_at = NOW()
        WHERE id = $10
        RETURNING *
        "#,
    )
    .bind(request.name.trim())
    .bind(request.description)
    .bind(request.price_cents)
    .bind(request.currency.to_uppercase())
    .bind(request.duration_days)
    .bind(request.max_campaigns)
    .bind(request.max_recipients)
    .bind(request.max_smtp_accounts)
    .bind(request.monthly_email_limit)
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Plan"))
}

/// Retire a plan. Existing subscriptions keep it until they end.
pub async fn deactivate_plan(pool: &DbPool, id: Uuid) -> Result<Plan, AppError> {
    sqlx::query_as::<_, Plan>(
        "UPDATE plans SET is_active = false, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Plan"))
}
