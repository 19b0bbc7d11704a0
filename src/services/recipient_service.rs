//! Recipient lists and bulk recipient import.

use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::recipient::{
        AddRecipientsResponse, NewRecipient, Recipient, RecipientList, RecipientListRequest,
        RecipientListSummary, normalize_recipients,
    },
    services::plan_limits::{self, LimitCheck},
};

/// Largest accepted import batch.
pub const MAX_IMPORT_BATCH: usize = 10_000;

async fn ensure_list_owned(pool: &DbPool, user_id: Uuid, list_id: Uuid) -> Result<(), AppError> {
    let owned: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM recipient_lists WHERE id = $1 AND user_id = $2)",
    )
    .bind(list_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    if !owned {
        return Err(AppError::NotFound("Recipient list"));
    }
    Ok(())
}

pub async fn create_list(
    pool: &DbPool,
    user_id: Uuid,
    request: RecipientListRequest,
) -> Result<RecipientList, AppError> {
    request.validate()?;

    let list = sqlx::query_as::<_, RecipientList>(
        "INSERT INTO recipient_lists (user_id, name, description) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(user_id)
    .bind(request.name.trim())
    .bind(request.description)
    .fetch_one(pool)
    .await?;
    Ok(list)
}

const SUMMARY_SELECT: &str = r#"
    SELECT l.id, l.name, l.description, COUNT(r.id) AS recipient_count,
           l.created_at, l.updated_at
    FROM recipient_lists l
    LEFT JOIN recipients r ON r.list_id = l.id
"#;

pub async fn list_lists(
    pool: &DbPool,
    user_id: Uuid,
) -> Result<Vec<RecipientListSummary>, AppError> {
    let lists = sqlx::query_as::<_, RecipientListSummary>(&format!(
        "{SUMMARY_SELECT} WHERE l.user_id = $1 GROUP BY l.id ORDER BY l.created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(lists)
}

pub async fn get_list(
    pool: &DbPool,
    user_id: Uuid,
    list_id: Uuid,
) -> Result<RecipientListSummary, AppError> {
    sqlx::query_as::<_, RecipientListSummary>(&format!(
        "{SUMMARY_SELECT} WHERE l.id = $1 AND l.user_id = $2 GROUP BY l.id"
    ))
    .bind(list_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Recipient list"))
}

pub async fn update_list(
    pool: &DbPool,
    user_id: Uuid,
    list_id: Uuid,
    request: RecipientListRequest,
) -> Result<RecipientList, AppError> {
    request.validate()?;

    sqlx::query_as::<_, RecipientList>(
        r#"
        UPDATE recipient_lists SET name = $1, description = $2, updated_at = NOW()
        WHERE id = $3 AND user_id = $4
        RETURNING *
        "#,
    )
    .bind(request.name.trim())
    .bind(request.description)
    .bind(list_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Recipient list"))
}

/// Lists still used by a live campaign cannot be deleted.
///
/// The list row is locked before the check, so a campaign created against
/// it concurrently waits for this delete and then fails its foreign key.
pub async fn delete_list(pool: &DbPool, user_id: Uuid, list_id: Uuid) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    let locked: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM recipient_lists WHERE id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(list_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;
    if locked.is_none() {
        return Err(AppError::NotFound("Recipient list"));
    }

    let in_use: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM campaigns
            WHERE recipient_list_id = $1
              AND status NOT IN ('completed', 'cancelled', 'failed')
        )
        "#,
    )
    .bind(list_id)
    .fetch_one(&mut *tx)
    .await?;
    if in_use {
        return Err(AppError::Conflict(
            "Recipient list is used by an active campaign".to_string(),
        ));
    }

    // Finished campaigns built on this list go with it.
    sqlx::query("DELETE FROM campaigns WHERE recipient_list_id = $1 AND user_id = $2")
        .bind(list_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM recipient_lists WHERE id = $1")
        .bind(list_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(())
}

/// Import a batch of recipients into a list.
///
/// Invalid addresses are reported back instead of failing the batch. Rows
/// already present in the list are counted as duplicates.
pub async fn add_recipients(
    pool: &DbPool,
    auth: &AuthContext,
    list_id: Uuid,
    batch: Vec<NewRecipient>,
) -> Result<AddRecipientsResponse, AppError> {
    if batch.is_empty() {
        return Err(AppError::InvalidRequest(
            "At least one recipient is required".to_string(),
        ));
    }
    if batch.len() > MAX_IMPORT_BATCH {
        return Err(AppError::InvalidRequest(format!(
            "At most {MAX_IMPORT_BATCH} recipients per request"
        )));
    }
    ensure_list_owned(pool, auth.user_id, list_id).await?;

    let normalized = normalize_recipients(batch);
    let mut skipped = normalized.duplicates;

    if normalized.valid.is_empty() {
        return Ok(AddRecipientsResponse {
            added: 0,
            skipped_duplicates: skipped,
            invalid: normalized.invalid,
        });
    }

    plan_limits::enforce(
        pool,
        auth,
        LimitCheck::NewRecipients(normalized.valid.len() as i64),
    )
    .await?;

    let (emails, names): (Vec<String>, Vec<Option<String>>) = normalized
        .valid
        .into_iter()
        .map(|r| (r.email, r.name))
        .unzip();
    let requested = emails.len() as u64;

    let added = sqlx::query(
        r#"
        INSERT INTO recipients (list_id, email, name)
        SELECT $1, email, name FROM UNNEST($2::TEXT[], $3::TEXT[]) AS t(email, name)
        ON CONFLICT (list_id, email) DO NOTHING
        "#,
    )
    .bind(list_id)
    .bind(&emails)
    .bind(&names)
    .execute(pool)
    .await?
    .rows_affected();

    skipped += requested - added;

    tracing::info!(list_id = %list_id, added, skipped, invalid = normalized.invalid.len(), "recipients imported");

    Ok(AddRecipientsResponse {
        added,
        skipped_duplicates: skipped,
        invalid: normalized.invalid,
    })
}

pub async fn list_recipients(
    pool: &DbPool,
    user_id: Uuid,
    list_id: Uuid,
) -> Result<Vec<Recipient>, AppError> {
    ensure_list_owned(pool, user_id, list_id).await?;

    let recipients = sqlx::query_as::<_, Recipient>(
        "SELECT * FROM recipients WHERE list_id = $1 ORDER BY email",
    )
    .bind(list_id)
    .fetch_all(pool)
    .await?;
    Ok(recipients)
}

pub async fn delete_recipient(
    pool: &DbPool,
    user_id: Uuid,
    list_id: Uuid,
    recipient_id: Uuid,
) -> Result<(), AppError> {
    ensure_list_owned(pool, user_id, list_id).await?;

    let result = sqlx::query("DELETE FROM recipients WHERE id = $1 AND list_id = $2")
        .bind(recipient_id)
        .bind(list_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Recipient"));
    }
    Ok(())
}

/// Unsubscribe a recipient. Deliveries already queued for them are dropped
/// from any campaign that has not sent them yet.
pub async fn unsubscribe_recipient(
    pool: &DbPool,
    user_id: Uuid,
    list_id: Uuid,
    recipient_id: Uuid,
) -> Result<Recipient, AppError> {
    ensure_list_owned(pool, user_id, list_id).await?;

    let mut tx = pool.begin().await?;

    let recipient = sqlx::query_as::<_, Recipient>(
        "UPDATE recipients SET unsubscribed = true WHERE id = $1 AND list_id = $2 RETURNING *",
    )
    .bind(recipient_id)
    .bind(list_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Recipient"))?;

    sqlx::query("DELETE FROM campaign_deliveries WHERE recipient_id = $1 AND status = 'pending'")
        .bind(recipient_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(recipient)
}
