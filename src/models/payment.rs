//! Payment models and the payment review state machine.
//!
//! Tenants submit payments (bank transfer, card reference, ...) for a plan;
//! an admin approves or rejects them. Approval grants the subscription.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::state::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Approved | PaymentStatus::Rejected)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for PaymentStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "approved" => Ok(PaymentStatus::Approved),
            "rejected" => Ok(PaymentStatus::Rejected),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// Admin decisions on a payment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaymentEvent {
    Approve,
    Reject,
}

impl fmt::Display for PaymentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentEvent::Approve => write!(f, "approve"),
            PaymentEvent::Reject => write!(f, "reject"),
        }
    }
}

impl PaymentStatus {
    /// `pending` is the only state a decision can be made from.
    pub fn transition(self, event: PaymentEvent) -> Result<PaymentStatus, StateError> {
        if self.is_terminal() {
            return Err(StateError::TerminalState(self.to_string()));
        }

        Ok(match event {
            PaymentEvent::Approve => PaymentStatus::Approved,
            PaymentEvent::Reject => PaymentStatus::Rejected,
        })
    }
}

/// Represents a payment record from the database.
///
/// Amounts are stored in cents.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    /// Free-form payment channel, e.g. "bank_transfer"
    pub method: String,
    /// External reference the admin checks against (transfer id, receipt no.)
    pub reference: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: PaymentStatus,
    pub review_note: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Request body for `POST /api/v1/payments`.
///
/// # JSON Example
///
/// ```json
/// {
///   "plan_id": "550e8400-e29b-41d4-a716-446655440000",
///   "amount_cents": 1900,
///   "method": "bank_transfer",
///   "reference": "TRX-0042"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub plan_id: Uuid,
    pub amount_cents: i64,
    pub method: String,
    pub reference: Option<String>,
}

impl CreatePaymentRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.amount_cents <= 0 {
            return Err(AppError::InvalidRequest(
                "Amount must be positive".to_string(),
            ));
        }
        if self.method.trim().is_empty() {
            return Err(AppError::InvalidRequest(
                "Payment method is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Body for approve/reject; the note is optional.
#[derive(Debug, Default, Deserialize)]
pub struct ReviewPaymentRequest {
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentListQuery {
    pub status: Option<PaymentStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_can_be_approved_or_rejected() {
        assert_eq!(
            PaymentStatus::Pending.transition(PaymentEvent::Approve),
            Ok(PaymentStatus::Approved)
        );
        assert_eq!(
            PaymentStatus::Pending.transition(PaymentEvent::Reject),
            Ok(PaymentStatus::Rejected)
        );
    }

    #[test]
    fn test_decided_payments_are_terminal() {
        for status in [PaymentStatus::Approved, PaymentStatus::Rejected] {
            for event in [PaymentEvent::Approve, PaymentEvent::Reject] {
                assert!(matches!(
                    status.transition(event),
                    Err(StateError::TerminalState(_))
                ));
            }
        }
    }

    #[test]
    fn test_payment_request_validation() {
        let mut req = CreatePaymentRequest {
            plan_id: Uuid::new_v4(),
            amount_cents: 1900,
            method: "bank_transfer".to_string(),
            reference: None,
        };
        assert!(req.validate().is_ok());

        req.amount_cents = 0;
        assert!(req.validate().is_err());

        req.amount_cents = 100;
        req.method = "".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_status_filter_parses_lowercase() {
        let q: PaymentListQuery = serde_json::from_str(r#"{"status":"pending"}"#).unwrap();
        assert_eq!(q.status, Some(PaymentStatus::Pending));
    }
}
