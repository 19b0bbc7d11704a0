//! User (tenant) models and API request/response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::subscription::SubscriptionResponse;

/// Role of a user account.
///
/// Admins manage plans, payments and users and are exempt from plan limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }
}

impl TryFrom<String> for UserRole {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "user" => Ok(UserRole::User),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("unknown user role: {other}")),
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a user record from the database.
///
/// Every tenant-owned row (campaigns, lists, SMTP accounts, leads, payments)
/// references a user through `user_id`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    #[sqlx(try_from = "String")]
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for `POST /api/v1/admin/users`.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub role: UserRole,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            role: user.role,
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

/// Returned when a key is issued. The key is never retrievable again.
#[derive(Debug, Serialize)]
pub struct IssuedKeyResponse {
    pub user: UserResponse,
    pub api_key: String,
}

/// Resource consumption counted against plan limits.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq, sqlx::FromRow)]
pub struct Usage {
    pub campaigns: i64,
    pub recipients: i64,
    pub smtp_accounts: i64,
    /// Emails sent since the start of the calendar month
    pub emails_this_month: i64,
    /// Deliveries waiting in sending or paused campaigns
    pub emails_queued: i64,
}

/// Response body for `GET /api/v1/me`.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: UserResponse,
    pub subscription: Option<SubscriptionResponse>,
    pub usage: Usage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_column_text() {
        assert_eq!(UserRole::try_from("admin".to_string()), Ok(UserRole::Admin));
        assert_eq!(UserRole::try_from(UserRole::User.as_str().to_string()), Ok(UserRole::User));
        assert!(UserRole::try_from("root".to_string()).is_err());
    }

    #[test]
    fn test_create_request_defaults_to_user_role() {
        let req: CreateUserRequest =
            serde_json::from_str(r#"{"email":"a@example.com","display_name":"A"}"#).unwrap();
        assert_eq!(req.role, UserRole::User);
    }
}
