//! Payment review and subscription activation.
//!
//! # Atomicity
//!
//! Approving a payment and granting the subscription happen in one
//! PostgreSQL transaction with the payment row locked, so a payment can
//! never be approved twice or approved without its subscription.

use chrono::Utc;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        payment::{CreatePaymentRequest, Payment, PaymentEvent, PaymentStatus},
        plan::Plan,
        subscription::{Subscription, renewal_period},
    },
};

/// Record a tenant's payment for a plan; it waits for admin review.
pub async fn submit_payment(
    pool: &DbPool,
    user_id: Uuid,
    request: CreatePaymentRequest,
) -> Result<Payment, AppError> {
    request.validate()?;

    let plan = sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE id = $1 AND is_active = true")
        .bind(request.plan_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Plan"))?;

    if request.amount_cents < plan.price_cents {
        return Err(AppError::InvalidRequest(format!(
            "Amount is below the plan price of {} cents",
            plan.price_cents
        )));
    }

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (user_id, plan_id, amount_cents, currency, method, reference)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(plan.id)
    .bind(request.amount_cents)
    .bind(&plan.currency)
    .bind(request.method.trim())
    .bind(request.reference)
    .fetch_one(pool)
    .await?;

    tracing::info!(payment_id = %payment.id, user_id = %user_id, plan = %plan.name, "payment submitted");

    Ok(payment)
}

pub async fn list_user_payments(pool: &DbPool, user_id: Uuid) -> Result<Vec<Payment>, AppError> {
    let payments = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(payments)
}

pub async fn list_payments(
    pool: &DbPool,
    status: Option<PaymentStatus>,
) -> Result<Vec<Payment>, AppError> {
    let payments = sqlx::query_as::<_, Payment>(
        r#"
        SELECT * FROM payments
        WHERE ($1::TEXT IS NULL OR status = $1)
        ORDER BY created_at DESC
        "#,
    )
    .bind(status.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;
    Ok(payments)
}

/// Approve a pending payment and grant or extend the subscription.
pub async fn approve_payment(
    pool: &DbPool,
    payment_id: Uuid,
    note: Option<String>,
) -> Result<(Payment, Subscription), AppError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Payment"))?;

    let next = payment.status.transition(PaymentEvent::Approve)?;

    let plan = sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE id = $1")
        .bind(payment.plan_id)
        .fetch_one(&mut *tx)
        .await?;

    let existing = sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions WHERE user_id = $1 FOR UPDATE",
    )
    .bind(payment.user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let (starts_at, ends_at) = renewal_period(existing.as_ref(), plan.id, plan.duration_days, now);

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        UPDATE payments
        SET status = $1, review_note = $2, reviewed_at = $3
        WHERE id = $4
        RETURNING *
        "#,
    )
    .bind(next.as_str())
    .bind(note)
    .bind(now)
    .bind(payment_id)
    .fetch_one(&mut *tx)
    .await?;

    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        INSERT INTO subscriptions (user_id, plan_id, status, starts_at, ends_at)
        VALUES ($1, $2, 'active', $3, $4)
        ON CONFLICT (user_id) DO UPDATE
        SET plan_id = EXCLUDED.plan_id,
            status = 'active',
            starts_at = EXCLUDED.starts_at,
            ends_at = EXCLUDED.ends_at,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(payment.user_id)
    .bind(plan.id)
    .bind(starts_at)
    .bind(ends_at)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        payment_id = %payment.id,
        user_id = %payment.user_id,
        ends_at = %subscription.ends_at,
        "payment approved"
    );

    Ok((payment, subscription))
}

pub async fn reject_payment(
    pool: &DbPool,
    payment_id: Uuid,
    note: Option<String>,
) -> Result<Payment, AppError> {
    let mut tx = pool.begin().await?;

    let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Payment"))?;

    let next = payment.status.transition(PaymentEvent::Reject)?;

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        UPDATE payments
        SET status = $1, review_note = $2, reviewed_at = NOW()
        WHERE id = $3
        RETURNING *
        "#,
    )
    .bind(next.as_str())
    .bind(note)
    .bind(payment_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(payment_id = %payment.id, "payment rejected");

    Ok(payment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::test_support;

    fn request(plan_id: Uuid) -> CreatePaymentRequest {
        CreatePaymentRequest {
            plan_id,
            amount_cents: 1900,
            method: "bank_transfer".to_string(),
            reference: Some("TRX-1".to_string()),
        }
    }

    async fn subscription_count(pool: &DbPool, user_id: Uuid) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test]
    async fn test_approve_grants_then_extends_subscription(pool: DbPool) {
        let auth = test_support::tenant(&pool).await;
        let plan_id = test_support::plan(&pool, 100).await;

        let first = submit_payment(&pool, auth.user_id, request(plan_id))
            .await
            .unwrap();
        assert_eq!(first.status, PaymentStatus::Pending);

        let (payment, granted) = approve_payment(&pool, first.id, Some("ok".into()))
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Approved);
        assert!(payment.reviewed_at.is_some());
        assert_eq!(granted.plan_id, plan_id);
        assert_eq!(granted.ends_at - granted.starts_at, Duration::days(30));

        // Same plan while still current: the period is extended.
        let second = submit_payment(&pool, auth.user_id, request(plan_id))
            .await
            .unwrap();
        let (_, renewed) = approve_payment(&pool, second.id, None).await.unwrap();
        assert_eq!(renewed.starts_at, granted.starts_at);
        assert_eq!(renewed.ends_at, granted.ends_at + Duration::days(30));
        assert_eq!(subscription_count(&pool, auth.user_id).await, 1);
    }

    #[sqlx::test]
    async fn test_reviewed_payment_is_final(pool: DbPool) {
        let auth = test_support::tenant(&pool).await;
        let plan_id = test_support::plan(&pool, 100).await;

        let approved = submit_payment(&pool, auth.user_id, request(plan_id))
            .await
            .unwrap();
        approve_payment(&pool, approved.id, None).await.unwrap();
        assert!(matches!(
            approve_payment(&pool, approved.id, None).await,
            Err(AppError::InvalidState(_))
        ));
        assert!(matches!(
            reject_payment(&pool, approved.id, None).await,
            Err(AppError::InvalidState(_))
        ));

        let rejected = submit_payment(&pool, auth.user_id, request(plan_id))
            .await
            .unwrap();
        let rejected = reject_payment(&pool, rejected.id, Some("no funds".into()))
            .await
            .unwrap();
        assert_eq!(rejected.status, PaymentStatus::Rejected);
        assert!(matches!(
            approve_payment(&pool, rejected.id, None).await,
            Err(AppError::InvalidState(_))
        ));
    }

    #[sqlx::test]
    async fn test_rejecting_grants_nothing(pool: DbPool) {
        let auth = test_support::tenant(&pool).await;
        let plan_id = test_support::plan(&pool, 100).await;

        let payment = submit_payment(&pool, auth.user_id, request(plan_id))
            .await
            .unwrap();
        reject_payment(&pool, payment.id, None).await.unwrap();
        assert_eq!(subscription_count(&pool, auth.user_id).await, 0);

        assert!(matches!(
            approve_payment(&pool, Uuid::new_v4(), None).await,
            Err(AppError::NotFound(_))
        ));
    }
}
