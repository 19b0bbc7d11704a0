//! Campaign models and the campaign lifecycle state machine.
//!
//! # Lifecycle
//!
//! ```text
//! draft ──schedule──► scheduled ──start──► sending ──finish──► completed
//!   │                    │                  │   ▲
//!   └──────start─────────┼──────────────────┘   │
//!                        │              pause│  │resume
//!                        │                   ▼  │
//!   draft/scheduled/sending/paused ──cancel──► cancelled
//!   scheduled/sending ──fail──► failed
//! ```
//!
//! `completed`, `cancelled` and `failed` are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::state::StateError;

/// Longest allowed pause between two sends of one campaign.
pub const MAX_DELAY_SECONDS: i32 = 3600;

/// Highest accepted hourly speed limit.
pub const MAX_SPEED_LIMIT_PER_HOUR: i32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Cancelled | CampaignStatus::Failed
        )
    }

    /// Content and targeting can only change before anything was sent.
    pub fn is_editable(&self) -> bool {
        matches!(self, CampaignStatus::Draft | CampaignStatus::Scheduled)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for CampaignStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "sending" => Ok(CampaignStatus::Sending),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            "failed" => Ok(CampaignStatus::Failed),
            other => Err(format!("unknown campaign status: {other}")),
        }
    }
}

/// Events that move a campaign through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CampaignEvent {
    Schedule,
    Start,
    Pause,
    Resume,
    Cancel,
    /// No pending deliveries remain.
    Finish,
    /// The relay is unusable or the plan no longer covers the send;
    /// remaining deliveries stay pending.
    Fail,
}

impl fmt::Display for CampaignEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CampaignEvent::Schedule => "schedule",
            CampaignEvent::Start => "start",
            CampaignEvent::Pause => "pause",
            CampaignEvent::Resume => "resume",
            CampaignEvent::Cancel => "cancel",
            CampaignEvent::Finish => "finish",
            CampaignEvent::Fail => "fail",
        };
        f.write_str(name)
    }
}

impl CampaignStatus {
    pub fn transition(self, event: CampaignEvent) -> Result<CampaignStatus, StateError> {
        use CampaignEvent as E;
        use CampaignStatus as S;

        if self.is_terminal() {
            return Err(StateError::TerminalState(self.to_string()));
        }

        let next = match (self, event) {
            (S::Draft | S::Scheduled, E::Schedule) => S::Scheduled,
            (S::Draft | S::Scheduled, E::Start) => S::Sending,
            (S::Sending, E::Pause) => S::Paused,
            (S::Paused, E::Resume) => S::Sending,
            (S::Sending, E::Finish) => S::Completed,
            (S::Scheduled | S::Sending, E::Fail) => S::Failed,
            (_, E::Cancel) => S::Cancelled,
            _ => {
                return Err(StateError::InvalidTransition {
                    from: self.to_string(),
                    event: event.to_string(),
                });
            }
        };

        Ok(next)
    }
}

/// Represents a campaign record from the database.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Campaign {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub subject: String,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    pub recipient_list_id: Uuid,
    pub smtp_account_id: Uuid,
    /// When a scheduled campaign starts sending
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Minimum pause between two consecutive sends
    pub delay_seconds: i32,
    /// Maximum sends in any rolling hour; `None` means unthrottled
    pub speed_limit_per_hour: Option<i32>,
    #[sqlx(try_from = "String")]
    pub status: CampaignStatus,
    pub sent_count: i32,
    pub failed_count: i32,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for creating or updating a campaign.
///
/// # JSON Example
///
/// ```json
/// {
///   "name": "Spring launch",
///   "subject": "Hi {{name}}, we launched!",
///   "body_html": "<p>Hello {{name}}</p>",
///   "recipient_list_id": "550e8400-e29b-41d4-a716-446655440000",
///   "smtp_account_id": "660e8400-e29b-41d4-a716-446655440001",
///   "delay_seconds": 2,
///   "speed_limit_per_hour": 500,
///   "scheduled_at": "2025-04-01T09:00:00Z"
/// }
/// ```
///
/// A `scheduled_at` creates the campaign directly in `scheduled`.
#[derive(Debug, Deserialize)]
pub struct CampaignRequest {
    pub name: String,
    pub subject: String,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    pub recipient_list_id: Uuid,
    pub smtp_account_id: Uuid,
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delay_seconds: i32,
    pub speed_limit_per_hour: Option<i32>,
}

fn has_content(body: &Option<String>) -> bool {
    body.as_deref().is_some_and(|b| !b.trim().is_empty())
}

impl CampaignRequest {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidRequest(
                "Campaign name is required".to_string(),
            ));
        }
        if self.subject.trim().is_empty() {
            return Err(AppError::InvalidRequest("Subject is required".to_string()));
        }
        if !has_content(&self.body_html) && !has_content(&self.body_text) {
            return Err(AppError::InvalidRequest(
                "An html or text body is required".to_string(),
            ));
        }
        if !(0..=MAX_DELAY_SECONDS).contains(&self.delay_seconds) {
            return Err(AppError::InvalidRequest(format!(
                "Delay must be between 0 and {MAX_DELAY_SECONDS} seconds"
            )));
        }
        if let Some(limit) = self.speed_limit_per_hour {
            if !(1..=MAX_SPEED_LIMIT_PER_HOUR).contains(&limit) {
                return Err(AppError::InvalidRequest(format!(
                    "Speed limit must be between 1 and {MAX_SPEED_LIMIT_PER_HOUR} per hour"
                )));
            }
        }
        if let Some(at) = self.scheduled_at {
            validate_schedule(at, now)?;
        }
        Ok(())
    }

    /// Status a freshly saved draft lands in.
    pub fn initial_status(&self) -> CampaignStatus {
        if self.scheduled_at.is_some() {
            CampaignStatus::Scheduled
        } else {
            CampaignStatus::Draft
        }
    }
}

pub fn validate_schedule(at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), AppError> {
    if at <= now {
        return Err(AppError::InvalidRequest(
            "Scheduled time must be in the future".to_string(),
        ));
    }
    Ok(())
}

/// Body for `POST /api/v1/campaigns/{id}/schedule`.
#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub scheduled_at: DateTime<Utc>,
}

/// Substitute `{{name}}` and `{{email}}` merge tags.
///
/// A missing name renders as an empty string.
pub fn personalize(template: &str, email: &str, name: Option<&str>) -> String {
    template
        .replace("{{email}}", email)
        .replace("{{name}}", name.unwrap_or(""))
}

/// A failed delivery listed in the campaign report.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct FailedDelivery {
    pub email: String,
    pub attempts: i32,
    pub last_error: Option<String>,
}

/// Response body for `GET /api/v1/campaigns/{id}/report`.
#[derive(Debug, Serialize)]
pub struct CampaignReport {
    pub campaign_id: Uuid,
    pub status: CampaignStatus,
    pub total: i64,
    pub pending: i64,
    pub sent: i64,
    pub failed: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub failures: Vec<FailedDelivery>,
}
