//! Database fixtures for service tests run under `#[sqlx::test]`.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::{
    db::DbPool,
    middleware::auth::AuthContext,
    models::{campaign::Campaign, delivery::Delivery, user::UserRole},
};

async fn user(pool: &DbPool, role: UserRole) -> AuthContext {
    let email = format!("{}@example.com", Uuid::new_v4().simple());
    let user_id: Uuid = sqlx::query_scalar(
        "INSERT INTO users (email, display_name, role) VALUES ($1, 'Test', $2) RETURNING id",
    )
    .bind(&email)
    .bind(role.as_str())
    .fetch_one(pool)
    .await
    .unwrap();

    AuthContext {
        user_id,
        email,
        role,
    }
}

pub async fn tenant(pool: &DbPool) -> AuthContext {
    user(pool, UserRole::User).await
}

pub async fn admin(pool: &DbPool) -> AuthContext {
    user(pool, UserRole::Admin).await
}

/// Active plan with room for everything but `monthly_email_limit`.
pub async fn plan(pool: &DbPool, monthly_email_limit: i32) -> Uuid {
    sqlx::query_scalar(
        r#"
        INSERT INTO plans (
            name, price_cents, duration_days, max_campaigns, max_recipients,
            max_smtp_accounts, monthly_email_limit
        )
        VALUES ('Starter', 1900, 30, 50, 1000, 5, $1)
        RETURNING id
        "#,
    )
    .bind(monthly_email_limit)
    .fetch_one(pool)
    .await
    .unwrap()
}

/// Current subscription to a fresh plan.
pub async fn subscribe(pool: &DbPool, user_id: Uuid, monthly_email_limit: i32) -> Uuid {
    let plan_id = plan(pool, monthly_email_limit).await;
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO subscriptions (user_id, plan_id, starts_at, ends_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(user_id)
    .bind(plan_id)
    .bind(now - Duration::days(1))
    .bind(now + Duration::days(29))
    .execute(pool)
    .await
    .unwrap();
    plan_id
}

pub async fn smtp_account(pool: &DbPool, user_id: Uuid) -> Uuid {
    sqlx::query_scalar(
        r#"
        INSERT INTO smtp_accounts (user_id, name, host, port, from_email)
        VALUES ($1, 'Relay', 'smtp.example.com', 587, 'news@example.com')
        RETURNING id
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn list_with(pool: &DbPool, user_id: Uuid, emails: &[&str]) -> Uuid {
    let list_id: Uuid = sqlx::query_scalar(
        "INSERT INTO recipient_lists (user_id, name) VALUES ($1, 'Customers') RETURNING id",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .unwrap();

    for email in emails {
        sqlx::query("INSERT INTO recipients (list_id, email) VALUES ($1, $2)")
            .bind(list_id)
            .bind(email)
            .execute(pool)
            .await
            .unwrap();
    }
    list_id
}

/// Draft campaign sending to `list_id` through `smtp_account_id`.
pub async fn campaign(pool: &DbPool, user_id: Uuid, list_id: Uuid, smtp_account_id: Uuid) -> Uuid {
    sqlx::query_scalar(
        r#"
        INSERT INTO campaigns (
            user_id, name, subject, body_text, recipient_list_id, smtp_account_id
        )
        VALUES ($1, 'Launch', 'Hello {{name}}', 'Hi there', $2, $3)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(list_id)
    .bind(smtp_account_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn campaign_row(pool: &DbPool, id: Uuid) -> Campaign {
    sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn deliveries(pool: &DbPool, campaign_id: Uuid) -> Vec<Delivery> {
    sqlx::query_as::<_, Delivery>(
        "SELECT * FROM campaign_deliveries WHERE campaign_id = $1 ORDER BY email",
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await
    .unwrap()
}
