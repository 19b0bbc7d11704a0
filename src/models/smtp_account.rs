//! SMTP sending account models.
//!
//! An SMTP account holds the relay credentials a campaign sends through.
//! The password is write-only over the API.

use chrono::{DateTime, Utc};
use lettre::Address;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::services::mailer::SmtpSettings;

/// How the connection to the relay is secured.
///
/// - `none`: plaintext (local test relays only)
/// - `starttls`: plaintext connect, upgraded with STARTTLS (port 587)
/// - `tls`: implicit TLS from the first byte (port 465)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SmtpEncryption {
    None,
    #[default]
    Starttls,
    Tls,
}

impl SmtpEncryption {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmtpEncryption::None => "none",
            SmtpEncryption::Starttls => "starttls",
            SmtpEncryption::Tls => "tls",
        }
    }
}

impl TryFrom<String> for SmtpEncryption {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "none" => Ok(SmtpEncryption::None),
            "starttls" => Ok(SmtpEncryption::Starttls),
            "tls" => Ok(SmtpEncryption::Tls),
            other => Err(format!("unknown SMTP encryption: {other}")),
        }
    }
}

/// Represents an SMTP account record from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SmtpAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub host: String,
    pub port: i32,
    #[sqlx(try_from = "String")]
    pub encryption: SmtpEncryption,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_email: String,
    pub from_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SmtpAccount {
    pub fn settings(&self) -> Result<SmtpSettings, AppError> {
        let port = u16::try_from(self.port).map_err(|_| {
            AppError::InvalidRequest(format!("SMTP port {} is out of range", self.port))
        })?;

        Ok(SmtpSettings {
            host: self.host.clone(),
            port,
            encryption: self.encryption,
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }
}

/// Request body for creating or updating an SMTP account.
///
/// # JSON Example
///
/// ```json
/// {
///   "name": "Marketing relay",
///   "host": "smtp.example.com",
///   "port": 587,
///   "encryption": "starttls",
///   "username": "marketing@example.com",
///   "password": "app-password",
///   "from_email": "marketing@example.com",
///   "from_name": "Example Marketing"
/// }
/// ```
///
/// On update, an omitted `password` keeps the stored one.
#[derive(Debug, Deserialize)]
pub struct SmtpAccountRequest {
    pub name: String,
    pub host: String,
    pub port: i32,
    #[serde(default)]
    pub encryption: SmtpEncryption,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_email: String,
    pub from_name: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl SmtpAccountRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidRequest("Name is required".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(AppError::InvalidRequest("Host is required".to_string()));
        }
        if !(1..=65535).contains(&self.port) {
            return Err(AppError::InvalidRequest(
                "Port must be between 1 and 65535".to_string(),
            ));
        }
        self.from_email.trim().parse::<Address>().map_err(|_| {
            AppError::InvalidRequest(format!("Invalid from address: {}", self.from_email))
        })?;
        Ok(())
    }
}

/// Response body for SMTP account endpoints (password omitted).
#[derive(Debug, Serialize)]
pub struct SmtpAccountResponse {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    pub port: i32,
    pub encryption: SmtpEncryption,
    pub username: Option<String>,
    pub has_password: bool,
    pub from_email: String,
    pub from_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SmtpAccount> for SmtpAccountResponse {
    fn from(account: SmtpAccount) -> Self {
        Self {
            id: account.id,
            name: account.name,
            host: account.host,
            port: account.port,
            encryption: account.encryption,
            username: account.username,
            has_password: account.password.is_some(),
            from_email: account.from_email,
            from_name: account.from_name,
            is_active: account.is_active,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

/// Result of `POST /api/v1/smtp-accounts/{id}/test`.
#[derive(Debug, Serialize)]
pub struct ConnectionTestResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SmtpAccountRequest {
        serde_json::from_str(
            r#"{
                "name": "Relay",
                "host": "smtp.example.com",
                "port": 587,
                "from_email": "news@example.com"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let req = request();
        assert_eq!(req.encryption, SmtpEncryption::Starttls);
        assert!(req.is_active);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let mut req = request();
        req.port = 0;
        assert!(req.validate().is_err());

        let mut req = request();
        req.from_email = "nope".to_string();
        assert!(req.validate().is_err());

        let mut req = request();
        req.host = "".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_response_hides_password() {
        let now = Utc::now();
        let account = SmtpAccount {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Relay".into(),
            host: "smtp.example.com".into(),
            port: 465,
            encryption: SmtpEncryption::Tls,
            username: Some("u".into()),
            password: Some("secret".into()),
            from_email: "news@example.com".into(),
            from_name: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let settings = account.settings().unwrap();
        assert_eq!(settings.port, 465);
        assert_eq!(settings.encryption, SmtpEncryption::Tls);

        let json = serde_json::to_value(SmtpAccountResponse::from(account)).unwrap();
        assert_eq!(json["has_password"], true);
        assert!(json.get("password").is_none());
    }
}
