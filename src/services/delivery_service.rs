//! Delivery queue operations used by the dispatcher.
//!
//! A delivery is claimed by flipping it to `sending` under
//! `FOR UPDATE SKIP LOCKED`, so two runners can never hold the same row.
//! Every outcome write also bumps the campaign counters in the same
//! transaction, and a successful send is recorded in `email_usage`.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        campaign::{Campaign, CampaignEvent, CampaignStatus},
        delivery::Delivery,
    },
};

/// Claim the next due pending delivery of a campaign.
pub async fn claim_next_due(
    pool: &DbPool,
    campaign_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<Delivery>, AppError> {
    let delivery = sqlx::query_as::<_, Delivery>(
        r#"
        UPDATE campaign_deliveries
        SET status = 'sending', attempts = attempts + 1
        WHERE id = (
            SELECT id FROM campaign_deliveries
            WHERE campaign_id = $1 AND status = 'pending' AND next_attempt_at <= $2
            ORDER BY next_attempt_at, created_at
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING *
        "#,
    )
    .bind(campaign_id)
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(delivery)
}

pub async fn mark_sent(
    pool: &DbPool,
    delivery: &Delivery,
    message_id: &str,
    at: DateTime<Utc>,
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE campaign_deliveries
        SET status = 'sent', message_id = $1, sent_at = $2, last_error = NULL
        WHERE id = $3
        "#,
    )
    .bind(message_id)
    .bind(at)
    .bind(delivery.id)
    .execute(&mut *tx)
    .await?;

    // The usage row keeps counting toward the monthly quota after the
    // campaign is deleted.
    sqlx::query(
        r#"
        WITH c AS (
            UPDATE campaigns SET sent_count = sent_count + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING id, user_id
        )
        INSERT INTO email_usage (user_id, campaign_id, sent_at)
        SELECT user_id, id, $2 FROM c
        "#,
    )
    .bind(delivery.campaign_id)
    .bind(at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Put the delivery back in the queue for a later attempt.
pub async fn schedule_retry(
    pool: &DbPool,
    delivery: &Delivery,
    error: &str,
    next_attempt_at: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE campaign_deliveries
        SET status = 'pending', last_error = $1, next_attempt_at = $2
        WHERE id = $3
        "#,
    )
    .bind(error)
    .bind(next_attempt_at)
    .bind(delivery.id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Give up on the delivery. It stays in the report with its last error.
pub async fn dead_letter(pool: &DbPool, delivery: &Delivery, error: &str) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE campaign_deliveries SET status = 'failed', last_error = $1 WHERE id = $2")
        .bind(error)
        .bind(delivery.id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "UPDATE campaigns SET failed_count = failed_count + 1, updated_at = NOW() WHERE id = $1",
    )
    .bind(delivery.campaign_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Return a claimed delivery to `pending` without counting the attempt,
/// used when sending stops before the message went out.
pub async fn release(pool: &DbPool, delivery: &Delivery) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE campaign_deliveries SET status = 'pending', attempts = GREATEST(attempts - 1, 0) WHERE id = $1 AND status = 'sending'",
    )
    .bind(delivery.id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Deliveries still waiting, including ones currently claimed.
pub async fn outstanding_count(pool: &DbPool, campaign_id: Uuid) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM campaign_deliveries WHERE campaign_id = $1 AND status IN ('pending', 'sending')",
    )
    .bind(campaign_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn earliest_next_attempt(
    pool: &DbPool,
    campaign_id: Uuid,
) -> Result<Option<DateTime<Utc>>, AppError> {
    let at: Option<DateTime<Utc>> = sqlx::query_scalar(
        "SELECT MIN(next_attempt_at) FROM campaign_deliveries WHERE campaign_id = $1 AND status = 'pending'",
    )
    .bind(campaign_id)
    .fetch_one(pool)
    .await?;
    Ok(at)
}

/// Send times of the campaign within the last hour, for seeding its throttle.
pub async fn recent_sent_times(
    pool: &DbPool,
    campaign_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>, AppError> {
    let times: Vec<DateTime<Utc>> = sqlx::query_scalar(
        r#"
        SELECT sent_at FROM campaign_deliveries
        WHERE campaign_id = $1 AND status = 'sent' AND sent_at > $2
        ORDER BY sent_at
        "#,
    )
    .bind(campaign_id)
    .bind(now - Duration::hours(1))
    .fetch_all(pool)
    .await?;
    Ok(times)
}

/// Current campaign row, without ownership checks.
pub async fn load_campaign(pool: &DbPool, campaign_id: Uuid) -> Result<Campaign, AppError> {
    sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
        .bind(campaign_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Campaign"))
}

pub async fn sending_campaign_ids(pool: &DbPool) -> Result<Vec<Uuid>, AppError> {
    let ids: Vec<Uuid> =
        sqlx::query_scalar("SELECT id FROM campaigns WHERE status = 'sending' ORDER BY started_at")
            .fetch_all(pool)
            .await?;
    Ok(ids)
}

/// Apply `finish` or `fail` to a campaign if it is still sending.
///
/// Returns the new status, or `None` when the campaign had already left
/// `sending` (paused or cancelled meanwhile).
pub async fn close_campaign(
    pool: &DbPool,
    campaign_id: Uuid,
    event: CampaignEvent,
    error: Option<&str>,
) -> Result<Option<CampaignStatus>, AppError> {
    let mut tx = pool.begin().await?;

    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM campaigns WHERE id = $1 FOR UPDATE")
            .bind(campaign_id)
            .fetch_optional(&mut *tx)
            .await?;
    let Some(status) = status else {
        return Ok(None);
    };
    let status = CampaignStatus::try_from(status).map_err(AppError::InvalidRequest)?;
    if status != CampaignStatus::Sending {
        return Ok(None);
    }

    let next = status.transition(event)?;

    sqlx::query(
        r#"
        UPDATE campaigns
        SET status = $1, last_error = COALESCE($2, last_error),
            completed_at = NOW(), updated_at = NOW()
        WHERE id = $3
        "#,
    )
    .bind(next.as_str())
    .bind(error)
    .bind(campaign_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(next))
}

/// Requeue deliveries left `sending` by a process that stopped mid-send.
///
/// Such a message may or may not have reached the relay; it is retried
/// rather than lost, and the attempt is not counted.
pub async fn recover_in_flight(pool: &DbPool) -> Result<u64, AppError> {
    let recovered = sqlx::query(
        "UPDATE campaign_deliveries SET status = 'pending', attempts = GREATEST(attempts - 1, 0) WHERE status = 'sending'",
    )
    .execute(pool)
    .await?
    .rows_affected();
    Ok(recovered)
}
