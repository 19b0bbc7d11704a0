//! User and API key management.

use chrono::Utc;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        api_key::{generate_api_key, hash_api_key},
        subscription::SubscriptionResponse,
        user::{CreateUserRequest, IssuedKeyResponse, MeResponse, User, UserRole},
    },
    services::plan_limits,
};

/// Create a user and issue its first API key.
///
/// Both rows are written in one transaction. The plaintext key is returned
/// here and never again.
pub async fn create_user(
    pool: &DbPool,
    request: CreateUserRequest,
) -> Result<IssuedKeyResponse, AppError> {
    let email = request.email.trim().to_lowercase();
    email
        .parse::<lettre::Address>()
        .map_err(|_| AppError::InvalidRequest(format!("Invalid email: {}", request.email)))?;
    if request.display_name.trim().is_empty() {
        return Err(AppError::InvalidRequest(
            "Display name is required".to_string(),
        ));
    }

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(&email)
        .fetch_one(pool)
        .await?;
    if exists {
        return Err(AppError::Conflict(format!("User {email} already exists")));
    }

    let api_key = generate_api_key();

    let mut tx = pool.begin().await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, display_name, role)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(&email)
    .bind(request.display_name.trim())
    .bind(request.role.as_str())
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO api_keys (user_id, key_hash) VALUES ($1, $2)")
        .bind(user.id)
        .bind(hash_api_key(&api_key))
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(user_id = %user.id, role = %user.role, "user created");

    Ok(IssuedKeyResponse {
        user: user.into(),
        api_key,
    })
}

/// Deactivate every key of the user and issue a new one.
pub async fn rotate_api_key(pool: &DbPool, user_id: Uuid) -> Result<IssuedKeyResponse, AppError> {
    let api_key = generate_api_key();

    let mut tx = pool.begin().await?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 AND is_active = true")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    sqlx::query("UPDATE api_keys SET is_active = false WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("INSERT INTO api_keys (user_id, key_hash) VALUES ($1, $2)")
        .bind(user_id)
        .bind(hash_api_key(&api_key))
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(user_id = %user_id, "api key rotated");

    Ok(IssuedKeyResponse {
        user: user.into(),
        api_key,
    })
}

pub async fn list_users(pool: &DbPool) -> Result<Vec<User>, AppError> {
    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at DESC")
        .fetch_all(pool)
        .await?;
    Ok(users)
}

/// Deactivate a user. Their keys stop authenticating immediately and any
/// of their campaigns still sending are paused.
pub async fn deactivate_user(pool: &DbPool, user_id: Uuid) -> Result<User, AppError> {
    let mut tx = pool.begin().await?;

    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET is_active = false, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("User"))?;

    sqlx::query(
        "UPDATE campaigns SET status = 'paused', updated_at = NOW() WHERE user_id = $1 AND status = 'sending'",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(user)
}

/// Profile, subscription and usage of the caller.
pub async fn me(pool: &DbPool, user_id: Uuid) -> Result<MeResponse, AppError> {
    let now = Utc::now();

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    let mut conn = pool.acquire().await?;
    let subscription =
        plan_limits::load_entitlement(&mut conn, user_id)
            .await?
            .map(|(sub, plan)| SubscriptionResponse {
                plan_id: plan.id,
                plan_name: plan.name,
                status: sub.effective_status(now),
                starts_at: sub.starts_at,
                ends_at: sub.ends_at,
            });

    let usage = plan_limits::load_usage(&mut conn, user_id, now).await?;

    Ok(MeResponse {
        user: user.into(),
        subscription,
        usage,
    })
}

/// Make sure the configured bootstrap admin exists and `api_key` opens it.
///
/// Idempotent: reruns on every start and only inserts what is missing.
pub async fn ensure_bootstrap_admin(
    pool: &DbPool,
    email: &str,
    api_key: &str,
) -> Result<(), AppError> {
    let email = email.trim().to_lowercase();
    let mut tx = pool.begin().await?;

    let user_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO users (email, display_name, role)
        VALUES ($1, 'Administrator', $2)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role, is_active = true
        RETURNING id
        "#,
    )
    .bind(&email)
    .bind(UserRole::Admin.as_str())
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO api_keys (user_id, key_hash)
        VALUES ($1, $2)
        ON CONFLICT (key_hash) DO UPDATE SET is_active = true
        "#,
    )
    .bind(user_id)
    .bind(hash_api_key(api_key))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(email = %email, "bootstrap admin ensured");
    Ok(())
}
