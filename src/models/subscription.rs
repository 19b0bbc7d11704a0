//! Subscription models.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }
}

impl TryFrom<String> for SubscriptionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "active" => Ok(SubscriptionStatus::Active),
            "expired" => Ok(SubscriptionStatus::Expired),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

/// One row per tenant; renewals update it in place.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: SubscriptionStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Active status alone is not enough: a lapsed period counts as expired.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.starts_at <= now && now < self.ends_at
    }

    /// Status as seen by clients, folding in period expiry.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SubscriptionStatus {
        match self.status {
            SubscriptionStatus::Active if now >= self.ends_at => SubscriptionStatus::Expired,
            status => status,
        }
    }
}

/// Compute the period granted by approving a payment for `plan_id`.
///
/// Renewing the plan the tenant is currently on extends the running period;
/// switching plans or subscribing after a lapse starts a fresh one now.
pub fn renewal_period(
    existing: Option<&Subscription>,
    plan_id: Uuid,
    duration_days: i32,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let length = Duration::days(i64::from(duration_days));

    match existing {
        Some(sub) if sub.plan_id == plan_id && sub.is_current(now) => {
            (sub.starts_at, sub.ends_at + length)
        }
        _ => (now, now + length),
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub plan_id: Uuid,
    pub plan_name: String,
    pub status: SubscriptionStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn subscription(plan_id: Uuid, starts: DateTime<Utc>, ends: DateTime<Utc>) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id,
            status: SubscriptionStatus::Active,
            starts_at: starts,
            ends_at: ends,
            created_at: starts,
            updated_at: starts,
        }
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_new_subscription_starts_now() {
        let plan = Uuid::new_v4();
        let (start, end) = renewal_period(None, plan, 30, at(1));
        assert_eq!(start, at(1));
        assert_eq!(end, at(31));
    }

    #[test]
    fn test_same_plan_renewal_extends_period() {
        let plan = Uuid::new_v4();
        let sub = subscription(plan, at(1), at(11));
        let (start, end) = renewal_period(Some(&sub), plan, 10, at(5));
        assert_eq!(start, at(1));
        assert_eq!(end, at(21));
    }

    #[test]
    fn test_plan_switch_restarts_period() {
        let sub = subscription(Uuid::new_v4(), at(1), at(11));
        let (start, end) = renewal_period(Some(&sub), Uuid::new_v4(), 10, at(5));
        assert_eq!(start, at(5));
        assert_eq!(end, at(15));
    }

    #[test]
    fn test_lapsed_subscription_restarts_period() {
        let plan = Uuid::new_v4();
        let sub = subscription(plan, at(1), at(3));
        assert!(!sub.is_current(at(5)));
        assert_eq!(sub.effective_status(at(5)), SubscriptionStatus::Expired);
        let (start, _) = renewal_period(Some(&sub), plan, 10, at(5));
        assert_eq!(start, at(5));
    }
}
