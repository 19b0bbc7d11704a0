//! Data models representing database entities and API payloads.

pub mod api_key;
pub mod campaign;
pub mod delivery;
pub mod lead;
pub mod payment;
pub mod plan;
pub mod recipient;
pub mod smtp_account;
pub mod state;
pub mod subscription;
pub mod user;
