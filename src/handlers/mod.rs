//! HTTP request handlers (route handlers).
//!
//! Handlers extract the request (path, query, JSON body and the
//! `AuthContext` set by the auth middleware), call into `services`, and
//! turn the result into a JSON response.

pub mod campaigns;
pub mod health;
pub mod leads;
pub mod payments;
pub mod plans;
pub mod recipients;
/// Shared-secret relay endpoint
pub mod send_email;
pub mod smtp_accounts;
pub mod users;
