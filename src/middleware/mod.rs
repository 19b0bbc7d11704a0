//! HTTP middleware components.
//!
//! Middleware run before route handlers and can short-circuit requests
//! (e.g. reject unauthorized callers).

/// API key, admin role and shared-secret authentication
pub mod auth;
