//! Recipient list and recipient models.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use lettre::Address;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct RecipientList {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// List row joined with its recipient count.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct RecipientListSummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub recipient_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RecipientListRequest {
    pub name: String,
    pub description: Option<String>,
}

impl RecipientListRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidRequest("List name is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Recipient {
    pub id: Uuid,
    pub list_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    /// Unsubscribed recipients stay in the list but are never queued.
    pub unsubscribed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NewRecipient {
    pub email: String,
    pub name: Option<String>,
}

/// Request body for `POST /api/v1/recipient-lists/{id}/recipients`.
#[derive(Debug, Deserialize)]
pub struct AddRecipientsRequest {
    pub recipients: Vec<NewRecipient>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AddRecipientsResponse {
    pub added: u64,
    pub skipped_duplicates: u64,
    pub invalid: Vec<String>,
}

/// Outcome of cleaning an import batch before it touches the database.
#[derive(Debug, Default, PartialEq)]
pub struct NormalizedRecipients {
    pub valid: Vec<NewRecipient>,
    pub invalid: Vec<String>,
    pub duplicates: u64,
}

/// Trim and lowercase addresses, drop blank names, split out invalid
/// addresses and collapse in-batch duplicates (first occurrence wins).
pub fn normalize_recipients(batch: Vec<NewRecipient>) -> NormalizedRecipients {
    let mut seen = HashSet::new();
    let mut out = NormalizedRecipients::default();

    for recipient in batch {
        let email = recipient.email.trim().to_lowercase();
        if email.parse::<Address>().is_err() {
            out.invalid.push(recipient.email);
            continue;
        }
        if !seen.insert(email.clone()) {
            out.duplicates += 1;
            continue;
        }
        let name = recipient
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        out.valid.push(NewRecipient { email, name });
    }

    out
}
