//! SMTP sending accounts.

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::smtp_account::{ConnectionTestResponse, SmtpAccount, SmtpAccountRequest},
    services::{
        mailer::MailerFactory,
        plan_limits::{self, LimitCheck},
    },
};

pub async fn get_owned(pool: &DbPool, user_id: Uuid, id: Uuid) -> Result<SmtpAccount, AppError> {
    sqlx::query_as::<_, SmtpAccount>("SELECT * FROM smtp_accounts WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("SMTP account"))
}

pub async fn create_account(
    pool: &DbPool,
    auth: &AuthContext,
    request: SmtpAccountRequest,
) -> Result<SmtpAccount, AppError> {
    request.validate()?;
    plan_limits::enforce(pool, auth, LimitCheck::NewSmtpAccount).await?;

    let account = sqlx::query_as::<_, SmtpAccount>(
        r#"
        INSERT INTO smtp_accounts (
            user_id, name, host, port, encryption, username, password,
            from_email, from_name, is_active
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(auth.user_id)
    .bind(request.name.trim())
    .bind(request.host.trim())
    .bind(request.port)
    .bind(request.encryption.as_str())
    .bind(request.username)
    .bind(request.password)
    .bind(request.from_email.trim())
    .bind(request.from_name)
    .bind(request.is_active)
    .fetch_one(pool)
    .await?;

    tracing::info!(smtp_account_id = %account.id, host = %account.host, "smtp account created");

    Ok(account)
}

pub async fn list_accounts(pool: &DbPool, user_id: Uuid) -> Result<Vec<SmtpAccount>, AppError> {
    let accounts = sqlx::query_as::<_, SmtpAccount>(
        "SELECT * FROM smtp_accounts WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(accounts)
}

/// Replace the account settings. A missing password keeps the stored one.
pub async fn update_account(
    pool: &DbPool,
    user_id: Uuid,
    id: Uuid,
    request: SmtpAccountRequest,
) -> Result<SmtpAccount, AppError> {
    request.validate()?;

    sqlx::query_as::<_, SmtpAccount>(
        r#"
        UPDATE smtp_accounts
        SET name = $1, host = $2, port = $3, encryption = $4, username = $5,
            password = COALESCE($6, password), from_email = $7, from_name = $8,
            is_active = $9, updated_at = NOW()
        WHERE id = $10 AND user_id = $11
        RETURNING *
        "#,
    )
    .bind(request.name.trim())
    .bind(request.host.trim())
    .bind(request.port)
    .bind(request.encryption.as_str())
    .bind(request.username)
    .bind(request.password)
    .bind(request.from_email.trim())
    .bind(request.from_name)
    .bind(request.is_active)
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("SMTP account"))
}

/// Accounts still used by a live campaign cannot be deleted. Same locking
/// as `recipient_service::delete_list`.
pub async fn delete_account(pool: &DbPool, user_id: Uuid, id: Uuid) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    let locked: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM smtp_accounts WHERE id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;
    if locked.is_none() {
        return Err(AppError::NotFound("SMTP account"));
    }

    let in_use: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM campaigns
            WHERE smtp_account_id = $1
              AND status NOT IN ('completed', 'cancelled', 'failed')
        )
        "#,
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;
    if in_use {
        return Err(AppError::Conflict(
            "SMTP account is used by an active campaign".to_string(),
        ));
    }

    sqlx::query("DELETE FROM campaigns WHERE smtp_account_id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM smtp_accounts WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(())
}

/// Connect and authenticate with the stored settings.
///
/// A failed connection is a normal result here, not an error response.
pub async fn test_account(
    pool: &DbPool,
    mailers: &Arc<dyn MailerFactory>,
    user_id: Uuid,
    id: Uuid,
) -> Result<ConnectionTestResponse, AppError> {
    let account = get_owned(pool, user_id, id).await?;
    let settings = account.settings()?;

    let outcome = match mailers.build(&settings) {
        Ok(mailer) => mailer.test_connection().await,
        Err(e) => Err(e),
    };

    Ok(match outcome {
        Ok(()) => ConnectionTestResponse {
            success: true,
            error: None,
        },
        Err(e) => {
            tracing::info!(smtp_account_id = %id, "smtp connection test failed: {}", e);
            ConnectionTestResponse {
                success: false,
                error: Some(e.to_string()),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        models::campaign::CampaignEvent,
        services::campaign_service,
        test_support,
    };

    #[sqlx::test]
    async fn test_account_used_by_live_campaign_cannot_be_deleted(pool: DbPool) {
        let auth = test_support::admin(&pool).await;
        let smtp = test_support::smtp_account(&pool, auth.user_id).await;
        let list = test_support::list_with(&pool, auth.user_id, &["a@example.org"]).await;
        let id = test_support::campaign(&pool, auth.user_id, list, smtp).await;
        campaign_service::start_campaign(&pool, &auth, id).await.unwrap();

        assert!(matches!(
            delete_account(&pool, auth.user_id, smtp).await,
            Err(AppError::Conflict(_))
        ));

        campaign_service::control_campaign(&pool, auth.user_id, id, CampaignEvent::Cancel)
            .await
            .unwrap();
        delete_account(&pool, auth.user_id, smtp).await.unwrap();
        assert!(matches!(
            get_owned(&pool, auth.user_id, smtp).await,
            Err(AppError::NotFound(_))
        ));
    }
}
