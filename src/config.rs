//! Application configuration management.
//!
//! Configuration is read from environment variables (and an optional `.env`
//! file) with the `envy` crate, which deserializes them into a typed struct.

use serde::Deserialize;
use std::time::Duration;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SEND_EMAIL_SECRET` (required): shared secret for `POST /api/send-email`
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `DISPATCH_POLL_INTERVAL_SECS` (optional): dispatcher poll period, defaults to 5
/// - `DISPATCH_MAX_ATTEMPTS` (optional): send attempts per delivery, defaults to 3
/// - `DISPATCH_RETRY_BASE_SECS` (optional): first retry delay, defaults to 30,
///   clamped to 1..=3600
/// - `SMTP_TIMEOUT_SECS` (optional): SMTP command timeout, defaults to 30
/// - `BOOTSTRAP_ADMIN_EMAIL` / `BOOTSTRAP_ADMIN_API_KEY` (optional): seed admin
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    pub send_email_secret: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_poll_interval")]
    pub dispatch_poll_interval_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub dispatch_max_attempts: u32,

    #[serde(default = "default_retry_base")]
    pub dispatch_retry_base_secs: u64,

    #[serde(default = "default_smtp_timeout")]
    pub smtp_timeout_secs: u64,

    pub bootstrap_admin_email: Option<String>,

    pub bootstrap_admin_api_key: Option<String>,
}

/// Retries never wait longer than an hour, so a larger base is meaningless.
const MAX_RETRY_BASE_SECS: u64 = 3600;

fn default_port() -> u16 {
    3000
}

fn default_poll_interval() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base() -> u64 {
    30
}

fn default_smtp_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file is loaded first if present.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables (`DATABASE_URL`,
    /// `SEND_EMAIL_SECRET`) are missing or a value cannot be parsed.
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        envy::from_env::<Config>()
    }

    pub fn dispatch_poll_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_poll_interval_secs.max(1))
    }

    pub fn retry_base_secs(&self) -> u64 {
        self.dispatch_retry_base_secs.clamp(1, MAX_RETRY_BASE_SECS)
    }

    pub fn smtp_timeout(&self) -> Duration {
        Duration::from_secs(self.smtp_timeout_secs)
    }

    /// Bootstrap admin credentials, only when both variables are set.
    pub fn bootstrap_admin(&self) -> Option<(&str, &str)> {
        match (&self.bootstrap_admin_email, &self.bootstrap_admin_api_key) {
            (Some(email), Some(key)) if !email.is_empty() && !key.is_empty() => {
                Some((email.as_str(), key.as_str()))
            }
            _ => None,
        }
    }
}
