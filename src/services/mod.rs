//! Business logic services.
//!
//! Services contain the core logic separated from HTTP handlers. They own
//! database transactions, validation and quota checks.

pub mod campaign_service;
pub mod delivery_service;
pub mod dispatcher;
pub mod lead_service;
pub mod mailer;
pub mod payment_service;
pub mod plan_limits;
pub mod plan_service;
pub mod recipient_service;
pub mod smtp_service;
pub mod throttle;
pub mod user_service;
