//! Sales-lead pipeline.

use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::lead::{Lead, LeadRequest, LeadStage, PipelineStage, build_pipeline},
};

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn create_lead(
    pool: &DbPool,
    user_id: Uuid,
    request: LeadRequest,
) -> Result<Lead, AppError> {
    request.validate()?;

    let lead = sqlx::query_as::<_, Lead>(
        r#"
        INSERT INTO leads (user_id, name, email, company, phone, stage, value_cents, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(request.name.trim())
    .bind(blank_to_none(request.email).map(|e| e.to_lowercase()))
    .bind(blank_to_none(request.company))
    .bind(blank_to_none(request.phone))
    .bind(request.stage.unwrap_or(LeadStage::New).as_str())
    .bind(request.value_cents)
    .bind(request.notes)
    .fetch_one(pool)
    .await?;
    Ok(lead)
}

pub async fn get_lead(pool: &DbPool, user_id: Uuid, id: Uuid) -> Result<Lead, AppError> {
    sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Lead"))
}

pub async fn list_leads(
    pool: &DbPool,
    user_id: Uuid,
    stage: Option<LeadStage>,
) -> Result<Vec<Lead>, AppError> {
    let leads = sqlx::query_as::<_, Lead>(
        r#"
        SELECT * FROM leads
        WHERE user_id = $1 AND ($2::TEXT IS NULL OR stage = $2)
        ORDER BY updated_at DESC
        "#,
    )
    .bind(user_id)
    .bind(stage.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;
    Ok(leads)
}

/// Update contact details and value. The stage is left alone.
pub async fn update_lead(
    pool: &DbPool,
    user_id: Uuid,
    id: Uuid,
    request: LeadRequest,
) -> Result<Lead, AppError> {
    request.validate()?;

    sqlx::query_as::<_, Lead>(
        r#"
        UPDATE leads
        SET name = $1, email = $2, company = $3, phone = $4, value_cents = $5,
            notes = $6, updated_at = NOW()
        WHERE id = $7 AND user_id = $8
        RETURNING *
        "#,
    )
    .bind(request.name.trim())
    .bind(blank_to_none(request.email).map(|e| e.to_lowercase()))
    .bind(blank_to_none(request.company))
    .bind(blank_to_none(request.phone))
    .bind(request.value_cents)
    .bind(request.notes)
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Lead"))
}

pub async fn delete_lead(pool: &DbPool, user_id: Uuid, id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM leads WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Lead"));
    }
    Ok(())
}

pub async fn change_stage(
    pool: &DbPool,
    user_id: Uuid,
    id: Uuid,
    target: LeadStage,
) -> Result<Lead, AppError> {
    let mut tx = pool.begin().await?;

    let lead = sqlx::query_as::<_, Lead>(
        "SELECT * FROM leads WHERE id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Lead"))?;

    let next = lead.stage.move_to(target)?;

    let lead = sqlx::query_as::<_, Lead>(
        "UPDATE leads SET stage = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
    )
    .bind(next.as_str())
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(lead)
}

pub async fn pipeline(pool: &DbPool, user_id: Uuid) -> Result<Vec<PipelineStage>, AppError> {
    let rows: Vec<(String, i64, i64)> = sqlx::query_as(
        r#"
        SELECT stage, COUNT(*), COALESCE(SUM(value_cents), 0)::BIGINT
        FROM leads
        WHERE user_id = $1
        GROUP BY stage
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(build_pipeline(rows))
}
