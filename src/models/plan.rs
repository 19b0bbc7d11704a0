//! Subscription plan models.
//!
//! A plan prices a subscription period and caps what a tenant may create
//! and send while subscribed to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Represents a plan record from the database.
///
/// # Limits
///
/// - `max_campaigns`: campaigns the tenant may own at once
/// - `max_recipients`: recipients across all of the tenant's lists
/// - `max_smtp_accounts`: configured sending accounts
/// - `monthly_email_limit`: deliveries per calendar month (UTC)
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub currency: String,
    pub duration_days: i32,
    pub max_campaigns: i32,
    pub max_recipients: i32,
    pub max_smtp_accounts: i32,
    pub monthly_email_limit: i32,
    /// Retired plans stay referenced by old subscriptions and payments.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for creating or replacing a plan.
///
/// # JSON Example
///
/// ```json
/// {
///   "name": "Starter",
///   "price_cents": 1900,
///   "duration_days": 30,
///   "max_campaigns": 10,
///   "max_recipients": 5000,
///   "max_smtp_accounts": 2,
///   "monthly_email_limit": 20000
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub duration_days: i32,
    pub max_campaigns: i32,
    pub max_recipients: i32,
    pub max_smtp_accounts: i32,
    pub monthly_email_limit: i32,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl PlanRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidRequest("Plan name is required".to_string()));
        }
        if self.price_cents < 0 {
            return Err(AppError::InvalidRequest(
                "Price cannot be negative".to_string(),
            ));
        }
        if self.duration_days <= 0 {
            return Err(AppError::InvalidRequest(
                "Duration must be at least one day".to_string(),
            ));
        }
        if self.currency.len() != 3 {
            return Err(AppError::InvalidRequest(
                "Currency must be a 3-letter ISO code".to_string(),
            ));
        }
        let limits = [
            self.max_campaigns,
            self.max_recipients,
            self.max_smtp_accounts,
            self.monthly_email_limit,
        ];
        if limits.iter().any(|limit| *limit < 0) {
            return Err(AppError::InvalidRequest(
                "Plan limits cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}
