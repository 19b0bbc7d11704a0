//! Plan entitlement checks.
//!
//! Every quota-consuming operation asks `enforce` first. Admin callers are
//! exempt; everyone else needs a current subscription whose plan has room.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::{plan::Plan, subscription::Subscription, user::Usage},
};

/// The operation being checked and how much of the quota it consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitCheck {
    NewCampaign,
    NewRecipients(i64),
    NewSmtpAccount,
    /// Queue this many deliveries in the current month.
    Send(i64),
}

/// Start of the calendar month (UTC) containing `now`.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// Pure limit arithmetic against already loaded usage.
///
/// Deliveries still queued in live campaigns count as spent, so starting
/// several campaigns at once cannot exceed the monthly limit.
pub fn check_limit(plan: &Plan, usage: &Usage, check: LimitCheck) -> Result<(), AppError> {
    match check {
        LimitCheck::NewCampaign if usage.campaigns + 1 > i64::from(plan.max_campaigns) => {
            Err(AppError::PlanLimitExceeded(format!(
                "Plan '{}' allows {} campaigns",
                plan.name, plan.max_campaigns
            )))
        }
        LimitCheck::NewRecipients(n) if usage.recipients + n > i64::from(plan.max_recipients) => {
            Err(AppError::PlanLimitExceeded(format!(
                "Plan '{}' allows {} recipients ({} in use)",
                plan.name, plan.max_recipients, usage.recipients
            )))
        }
        LimitCheck::NewSmtpAccount
            if usage.smtp_accounts + 1 > i64::from(plan.max_smtp_accounts) =>
        {
            Err(AppError::PlanLimitExceeded(format!(
                "Plan '{}' allows {} SMTP accounts",
                plan.name, plan.max_smtp_accounts
            )))
        }
        LimitCheck::Send(n)
            if usage.emails_this_month + usage.emails_queued + n
                > i64::from(plan.monthly_email_limit) =>
        {
            Err(AppError::PlanLimitExceeded(format!(
                "Plan '{}' allows {} emails per month ({} sent, {} queued, {} requested)",
                plan.name,
                plan.monthly_email_limit,
                usage.emails_this_month,
                usage.emails_queued,
                n
            )))
        }
        _ => Ok(()),
    }
}

/// Current subscription and its plan, if the tenant has one at all.
pub async fn load_entitlement(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> Result<Option<(Subscription, Plan)>, AppError> {
    let Some(subscription) =
        sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?
    else {
        return Ok(None);
    };

    let plan = sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE id = $1")
        .bind(subscription.plan_id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(Some((subscription, plan)))
}

/// Sent emails come from the `email_usage` ledger, which survives deletes.
pub async fn load_usage(
    conn: &mut PgConnection,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Usage, AppError> {
    let usage = sqlx::query_as::<_, Usage>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM campaigns WHERE user_id = $1) AS campaigns,
            (SELECT COUNT(*) FROM recipients r
                JOIN recipient_lists l ON l.id = r.list_id
                WHERE l.user_id = $1) AS recipients,
            (SELECT COUNT(*) FROM smtp_accounts WHERE user_id = $1) AS smtp_accounts,
            (SELECT COUNT(*) FROM email_usage
                WHERE user_id = $1 AND sent_at >= $2) AS emails_this_month,
            (SELECT COUNT(*) FROM campaign_deliveries d
                JOIN campaigns c ON c.id = d.campaign_id
                WHERE c.user_id = $1
                  AND c.status IN ('sending', 'paused')
                  AND d.status IN ('pending', 'sending')) AS emails_queued
        "#,
    )
    .bind(user_id)
    .bind(month_start(now))
    .fetch_one(&mut *conn)
    .await?;

    Ok(usage)
}

/// Check `check` for the user behind `auth`.
pub async fn enforce(pool: &DbPool, auth: &AuthContext, check: LimitCheck) -> Result<(), AppError> {
    if auth.is_admin() {
        return Ok(());
    }
    let mut conn = pool.acquire().await?;
    enforce_for_user(&mut conn, auth.user_id, check).await
}

/// Same as `enforce` for callers without a request context. Runs on the
/// caller's connection so it can share a transaction with the write it guards.
pub async fn enforce_for_user(
    conn: &mut PgConnection,
    user_id: Uuid,
    check: LimitCheck,
) -> Result<(), AppError> {
    let now = Utc::now();

    let plan = match load_entitlement(&mut *conn, user_id).await? {
        Some((subscription, plan)) if subscription.is_current(now) => plan,
        _ => return Err(AppError::SubscriptionRequired),
    };

    let usage = load_usage(&mut *conn, user_id, now).await?;
    check_limit(&plan, &usage, check)
}
