//! Campaign management and lifecycle control.
//!
//! Status changes lock the campaign row (`FOR UPDATE`) and run the state
//! machine in `models::campaign` before writing, so concurrent requests and
//! the dispatcher never apply conflicting transitions.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::campaign::{
        Campaign, CampaignEvent, CampaignReport, CampaignRequest, CampaignStatus, FailedDelivery,
        validate_schedule,
    },
    services::plan_limits::{self, LimitCheck},
};

/// Failed deliveries listed in a report.
const REPORT_FAILURE_LIMIT: i64 = 100;

pub async fn get_owned(pool: &DbPool, user_id: Uuid, id: Uuid) -> Result<Campaign, AppError> {
    sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Campaign"))
}

async fn lock_owned(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    id: Uuid,
) -> Result<Campaign, AppError> {
    sqlx::query_as::<_, Campaign>(
        "SELECT * FROM campaigns WHERE id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AppError::NotFound("Campaign"))
}

/// The list and SMTP account must both belong to the tenant.
async fn verify_targets(
    pool: &DbPool,
    user_id: Uuid,
    recipient_list_id: Uuid,
    smtp_account_id: Uuid,
) -> Result<(), AppError> {
    let list_ok: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM recipient_lists WHERE id = $1 AND user_id = $2)",
    )
    .bind(recipient_list_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    if !list_ok {
        return Err(AppError::NotFound("Recipient list"));
    }

    let smtp_ok: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM smtp_accounts WHERE id = $1 AND user_id = $2)",
    )
    .bind(smtp_account_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    if !smtp_ok {
        return Err(AppError::NotFound("SMTP account"));
    }

    Ok(())
}

pub async fn create_campaign(
    pool: &DbPool,
    auth: &AuthContext,
    request: CampaignRequest,
) -> Result<Campaign, AppError> {
    request.validate(Utc::now())?;
    plan_limits::enforce(pool, auth, LimitCheck::NewCampaign).await?;
    verify_targets(
        pool,
        auth.user_id,
        request.recipient_list_id,
        request.smtp_account_id,
    )
    .await?;

    let campaign = sqlx::query_as::<_, Campaign>(
        r#"
        INSERT INTO campaigns (
            user_id, name, subject, body_html, body_text,
            recipient_list_id, smtp_account_id, scheduled_at,
            delay_seconds, speed_limit_per_hour, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(auth.user_id)
    .bind(request.name.trim())
    .bind(&request.subject)
    .bind(&request.body_html)
    .bind(&request.body_text)
    .bind(request.recipient_list_id)
    .bind(request.smtp_account_id)
    .bind(request.scheduled_at)
    .bind(request.delay_seconds)
    .bind(request.speed_limit_per_hour)
    .bind(request.initial_status().as_str())
    .fetch_one(pool)
    .await?;

    tracing::info!(campaign_id = %campaign.id, status = %campaign.status, "campaign created");

    Ok(campaign)
}

pub async fn update_campaign(
    pool: &DbPool,
    user_id: Uuid,
    id: Uuid,
    request: CampaignRequest,
) -> Result<Campaign, AppError> {
    request.validate(Utc::now())?;
    verify_targets(pool, user_id, request.recipient_list_id, request.smtp_account_id).await?;

    let mut tx = pool.begin().await?;
    let current = lock_owned(&mut tx, user_id, id).await?;
    if !current.status.is_editable() {
        return Err(AppError::Conflict(format!(
            "Campaign is {} and can no longer be edited",
            current.status
        )));
    }

    let campaign = sqlx::query_as::<_, Campaign>(
        r#"
        UPDATE campaigns
        SET name = $1, subject = $2, body_html = $3, body_text = $4,
            recipient_list_id = $5, smtp_account_id = $6, scheduled_at = $7,
            delay_seconds = $8, speed_limit_per_hour = $9, status = $10,
            updated_at = NOW()
        WHERE id = $11
        RETURNING *
        "#,
    )
    .bind(request.name.trim())
    .bind(&request.subject)
    .bind(&request.body_html)
    .bind(&request.body_text)
    .bind(request.recipient_list_id)
    .bind(request.smtp_account_id)
    .bind(request.scheduled_at)
    .bind(request.delay_seconds)
    .bind(request.speed_limit_per_hour)
    .bind(request.initial_status().as_str())
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(campaign)
}

/// Campaigns that are sending or paused must be cancelled first.
pub async fn delete_campaign(pool: &DbPool, user_id: Uuid, id: Uuid) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    let current = lock_owned(&mut tx, user_id, id).await?;

    if matches!(
        current.status,
        CampaignStatus::Sending | CampaignStatus::Paused
    ) {
        return Err(AppError::Conflict(format!(
            "Campaign is {}; cancel it before deleting",
            current.status
        )));
    }

    sqlx::query("DELETE FROM campaigns WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn list_campaigns(
    pool: &DbPool,
    user_id: Uuid,
    status: Option<CampaignStatus>,
) -> Result<Vec<Campaign>, AppError> {
    let campaigns = sqlx::query_as::<_, Campaign>(
        r#"
        SELECT * FROM campaigns
        WHERE user_id = $1 AND ($2::TEXT IS NULL OR status = $2)
        ORDER BY created_at DESC
        "#,
    )
    .bind(user_id)
    .bind(status.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;
    Ok(campaigns)
}

async fn subscribed_recipient_count(
    conn: &mut PgConnection,
    list_id: Uuid,
) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM recipients WHERE list_id = $1 AND unsubscribed = false",
    )
    .bind(list_id)
    .fetch_one(conn)
    .await?;
    Ok(count)
}

/// Check that the tenant may queue this campaign's recipients.
///
/// Locks the tenant row first, so two campaigns of the same tenant starting
/// at once are checked one after the other and each sees the deliveries the
/// other queued.
async fn check_send_entitlement(
    tx: &mut Transaction<'_, Postgres>,
    campaign: &Campaign,
) -> Result<(), AppError> {
    let is_admin: bool =
        sqlx::query_scalar("SELECT role = 'admin' FROM users WHERE id = $1 FOR NO KEY UPDATE")
            .bind(campaign.user_id)
            .fetch_one(&mut **tx)
            .await?;

    let recipients = subscribed_recipient_count(&mut **tx, campaign.recipient_list_id).await?;
    if recipients == 0 {
        return Err(AppError::InvalidRequest(
            "Recipient list has no subscribed recipients".to_string(),
        ));
    }
    if is_admin {
        return Ok(());
    }

    plan_limits::enforce_for_user(&mut **tx, campaign.user_id, LimitCheck::Send(recipients)).await
}

/// Queue one delivery per subscribed recipient and flip the campaign to
/// `sending`. The caller holds the campaign row lock.
async fn begin_sending(
    tx: &mut Transaction<'_, Postgres>,
    campaign: &Campaign,
) -> Result<Campaign, AppError> {
    let next = campaign.status.transition(CampaignEvent::Start)?;

    let queued = sqlx::query(
        r#"
        INSERT INTO campaign_deliveries (campaign_id, recipient_id, email, name)
        SELECT $1, r.id, r.email, r.name
        FROM recipients r
        WHERE r.list_id = $2 AND r.unsubscribed = false
        ON CONFLICT (campaign_id, recipient_id) DO NOTHING
        "#,
    )
    .bind(campaign.id)
    .bind(campaign.recipient_list_id)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    let updated = sqlx::query_as::<_, Campaign>(
        r#"
        UPDATE campaigns
        SET status = $1, started_at = COALESCE(started_at, NOW()), last_error = NULL,
            updated_at = NOW()
        WHERE id = $2
        RETURNING *
        "#,
    )
    .bind(next.as_str())
    .bind(campaign.id)
    .fetch_one(&mut **tx)
    .await?;

    tracing::info!(campaign_id = %campaign.id, queued, "campaign started");

    Ok(updated)
}

/// Start sending now.
pub async fn start_campaign(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
) -> Result<Campaign, AppError> {
    let mut tx = pool.begin().await?;
    let campaign = lock_owned(&mut tx, auth.user_id, id).await?;
    campaign.status.transition(CampaignEvent::Start)?;

    check_send_entitlement(&mut tx, &campaign).await?;
    let started = begin_sending(&mut tx, &campaign).await?;
    tx.commit().await?;

    Ok(started)
}

pub async fn schedule_campaign(
    pool: &DbPool,
    user_id: Uuid,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<Campaign, AppError> {
    validate_schedule(at, Utc::now())?;

    let mut tx = pool.begin().await?;
    let campaign = lock_owned(&mut tx, user_id, id).await?;
    let next = campaign.status.transition(CampaignEvent::Schedule)?;

    let campaign = sqlx::query_as::<_, Campaign>(
        "UPDATE campaigns SET status = $1, scheduled_at = $2, updated_at = NOW() WHERE id = $3 RETURNING *",
    )
    .bind(next.as_str())
    .bind(at)
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(campaign)
}

/// Apply pause, resume or cancel.
pub async fn control_campaign(
    pool: &DbPool,
    user_id: Uuid,
    id: Uuid,
    event: CampaignEvent,
) -> Result<Campaign, AppError> {
    debug_assert!(matches!(
        event,
        CampaignEvent::Pause | CampaignEvent::Resume | CampaignEvent::Cancel
    ));

    let mut tx = pool.begin().await?;
    let campaign = lock_owned(&mut tx, user_id, id).await?;
    let next = campaign.status.transition(event)?;

    let campaign = sqlx::query_as::<_, Campaign>(
        r#"
        UPDATE campaigns
        SET status = $1,
            completed_at = CASE WHEN $1 = 'cancelled' THEN NOW() ELSE completed_at END,
            updated_at = NOW()
        WHERE id = $2
        RETURNING *
        "#,
    )
    .bind(next.as_str())
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(campaign_id = %id, %event, status = %campaign.status, "campaign control");
    Ok(campaign)
}

pub async fn campaign_report(
    pool: &DbPool,
    user_id: Uuid,
    id: Uuid,
) -> Result<CampaignReport, AppError> {
    let campaign = get_owned(pool, user_id, id).await?;

    let (total, pending, sent, failed): (i64, i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*),
            COUNT(*) FILTER (WHERE status IN ('pending', 'sending')),
            COUNT(*) FILTER (WHERE status = 'sent'),
            COUNT(*) FILTER (WHERE status = 'failed')
        FROM campaign_deliveries
        WHERE campaign_id = $1
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    let failures = sqlx::query_as::<_, FailedDelivery>(
        r#"
        SELECT email, attempts, last_error
        FROM campaign_deliveries
        WHERE campaign_id = $1 AND status = 'failed'
        ORDER BY email
        LIMIT $2
        "#,
    )
    .bind(id)
    .bind(REPORT_FAILURE_LIMIT)
    .fetch_all(pool)
    .await?;

    Ok(CampaignReport {
        campaign_id: campaign.id,
        status: campaign.status,
        total,
        pending,
        sent,
        failed,
        started_at: campaign.started_at,
        completed_at: campaign.completed_at,
        last_error: campaign.last_error,
        failures,
    })
}

/// Move scheduled campaigns whose time has come to `sending`.
///
/// A campaign the tenant's plan no longer covers is failed with the reason
/// instead of being retried on every poll. Any other error leaves it
/// scheduled for the next poll. Returns the started ids.
pub async fn promote_due_scheduled(
    pool: &DbPool,
    now: DateTime<Utc>,
) -> Result<Vec<Uuid>, AppError> {
    let due: Vec<(Uuid, Uuid)> = sqlx::query_as(
        r#"
        SELECT c.id, c.user_id
        FROM campaigns c
        JOIN users u ON u.id = c.user_id
        WHERE c.status = 'scheduled' AND c.scheduled_at <= $1 AND u.is_active = true
        ORDER BY c.scheduled_at
        "#,
    )
    .bind(now)
    .fetch_all(pool)
    .await?;

    let mut started = Vec::new();

    for (id, user_id) in due {
        let mut tx = pool.begin().await?;
        let campaign = match lock_owned(&mut tx, user_id, id).await {
            Ok(campaign) if campaign.status == CampaignStatus::Scheduled => campaign,
            // Deleted or already handled since the due list was read.
            Ok(_) | Err(AppError::NotFound(_)) => continue,
            Err(err) => return Err(err),
        };

        let reason = match check_send_entitlement(&mut tx, &campaign).await {
            Ok(()) => {
                begin_sending(&mut tx, &campaign).await?;
                tx.commit().await?;
                started.push(id);
                continue;
            }
            Err(AppError::PlanLimitExceeded(msg) | AppError::InvalidRequest(msg)) => msg,
            Err(err @ AppError::SubscriptionRequired) => err.to_string(),
            Err(err) => return Err(err),
        };

        let next = campaign.status.transition(CampaignEvent::Fail)?;
        tracing::warn!(campaign_id = %id, reason = %reason, "scheduled campaign not started");
        sqlx::query(
            "UPDATE campaigns SET status = $1, last_error = $2, completed_at = NOW(), updated_at = NOW() WHERE id = $3",
        )
        .bind(next.as_str())
        .bind(reason)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
    }

    Ok(started)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_support;

    const TWO: &[&str] = &["a@example.org", "b@example.org"];

    async fn make_due(pool: &DbPool, id: Uuid) {
        sqlx::query(
            "UPDATE campaigns SET status = 'scheduled', scheduled_at = NOW() - INTERVAL '1 minute' WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn delivery_total(pool: &DbPool, user_id: Uuid) -> i64 {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM campaign_deliveries d JOIN campaigns c ON c.id = d.campaign_id WHERE c.user_id = $1",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test]
    async fn test_start_enqueues_subscribed_recipients(pool: DbPool) {
        let auth = test_support::tenant(&pool).await;
        test_support::subscribe(&pool, auth.user_id, 100).await;
        let smtp = test_support::smtp_account(&pool, auth.user_id).await;
        let list = test_support::list_with(&pool, auth.user_id, TWO).await;
        sqlx::query("UPDATE recipients SET unsubscribed = true WHERE email = 'b@example.org'")
            .execute(&pool)
            .await
            .unwrap();
        let id = test_support::campaign(&pool, auth.user_id, list, smtp).await;

        let started = start_campaign(&pool, &auth, id).await.unwrap();
        assert_eq!(started.status, CampaignStatus::Sending);
        assert!(started.started_at.is_some());

        let deliveries = test_support::deliveries(&pool, id).await;
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].email, "a@example.org");

        assert!(matches!(
            start_campaign(&pool, &auth, id).await,
            Err(AppError::InvalidState(_))
        ));
    }

    #[sqlx::test]
    async fn test_queued_deliveries_count_against_monthly_limit(pool: DbPool) {
        let auth = test_support::tenant(&pool).await;
        test_support::subscribe(&pool, auth.user_id, 2).await;
        let smtp = test_support::smtp_account(&pool, auth.user_id).await;
        let list = test_support::list_with(&pool, auth.user_id, TWO).await;

        let first = test_support::campaign(&pool, auth.user_id, list, smtp).await;
        let second = test_support::campaign(&pool, auth.user_id, list, smtp).await;
        let third = test_support::campaign(&pool, auth.user_id, list, smtp).await;

        start_campaign(&pool, &auth, first).await.unwrap();
        for id in [second, third] {
            assert!(matches!(
                start_campaign(&pool, &auth, id).await,
                Err(AppError::PlanLimitExceeded(_))
            ));
            assert_eq!(
                test_support::campaign_row(&pool, id).await.status,
                CampaignStatus::Draft
            );
        }
        assert_eq!(delivery_total(&pool, auth.user_id).await, 2);

        // Pausing keeps the reservation.
        control_campaign(&pool, auth.user_id, first, CampaignEvent::Pause)
            .await
            .unwrap();
        assert!(matches!(
            start_campaign(&pool, &auth, second).await,
            Err(AppError::PlanLimitExceeded(_))
        ));

        // Cancelling releases it.
        control_campaign(&pool, auth.user_id, first, CampaignEvent::Cancel)
            .await
            .unwrap();
        start_campaign(&pool, &auth, second).await.unwrap();
        assert_eq!(delivery_total(&pool, auth.user_id).await, 4);
    }

    #[sqlx::test]
    async fn test_empty_list_cannot_start(pool: DbPool) {
        let auth = test_support::admin(&pool).await;
        let smtp = test_support::smtp_account(&pool, auth.user_id).await;
        let list = test_support::list_with(&pool, auth.user_id, &[]).await;
        let id = test_support::campaign(&pool, auth.user_id, list, smtp).await;

        assert!(matches!(
            start_campaign(&pool, &auth, id).await,
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[sqlx::test]
    async fn test_due_scheduled_campaign_is_started(pool: DbPool) {
        let auth = test_support::tenant(&pool).await;
        test_support::subscribe(&pool, auth.user_id, 100).await;
        let smtp = test_support::smtp_account(&pool, auth.user_id).await;
        let list = test_support::list_with(&pool, auth.user_id, TWO).await;
        let id = test_support::campaign(&pool, auth.user_id, list, smtp).await;
        make_due(&pool, id).await;

        let started = promote_due_scheduled(&pool, Utc::now()).await.unwrap();
        assert_eq!(started, vec![id]);
        assert_eq!(
            test_support::campaign_row(&pool, id).await.status,
            CampaignStatus::Sending
        );
        assert_eq!(test_support::deliveries(&pool, id).await.len(), 2);
    }

    #[sqlx::test]
    async fn test_due_campaign_without_subscription_fails(pool: DbPool) {
        let auth = test_support::tenant(&pool).await;
        let smtp = test_support::smtp_account(&pool, auth.user_id).await;
        let list = test_support::list_with(&pool, auth.user_id, TWO).await;
        let id = test_support::campaign(&pool, auth.user_id, list, smtp).await;
        make_due(&pool, id).await;

        let started = promote_due_scheduled(&pool, Utc::now()).await.unwrap();
        assert!(started.is_empty());

        let campaign = test_support::campaign_row(&pool, id).await;
        assert_eq!(campaign.status, CampaignStatus::Failed);
        assert_eq!(
            campaign.last_error.as_deref(),
            Some("An active subscription is required")
        );
        assert!(test_support::deliveries(&pool, id).await.is_empty());
    }

    #[sqlx::test]
    async fn test_database_error_keeps_campaign_scheduled(pool: DbPool) {
        let auth = test_support::tenant(&pool).await;
        test_support::subscribe(&pool, auth.user_id, 100).await;
        let smtp = test_support::smtp_account(&pool, auth.user_id).await;
        let list = test_support::list_with(&pool, auth.user_id, TWO).await;
        let id = test_support::campaign(&pool, auth.user_id, list, smtp).await;
        make_due(&pool, id).await;

        sqlx::query("DROP TABLE subscriptions")
            .execute(&pool)
            .await
            .unwrap();

        assert!(matches!(
            promote_due_scheduled(&pool, Utc::now()).await,
            Err(AppError::Database(_))
        ));

        let campaign = test_support::campaign_row(&pool, id).await;
        assert_eq!(campaign.status, CampaignStatus::Scheduled);
        assert_eq!(campaign.last_error, None);
    }

    #[sqlx::test]
    async fn test_live_campaign_cannot_be_deleted(pool: DbPool) {
        let auth = test_support::admin(&pool).await;
        let smtp = test_support::smtp_account(&pool, auth.user_id).await;
        let list = test_support::list_with(&pool, auth.user_id, TWO).await;
        let id = test_support::campaign(&pool, auth.user_id, list, smtp).await;

        start_campaign(&pool, &auth, id).await.unwrap();
        assert!(matches!(
            delete_campaign(&pool, auth.user_id, id).await,
            Err(AppError::Conflict(_))
        ));

        control_campaign(&pool, auth.user_id, id, CampaignEvent::Cancel)
            .await
            .unwrap();
        delete_campaign(&pool, auth.user_id, id).await.unwrap();
        assert!(matches!(
            get_owned(&pool, auth.user_id, id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
