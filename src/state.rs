//! Shared application state handed to every handler.

use std::sync::Arc;

use axum::extract::FromRef;

use crate::config::Config;
use crate::db::DbPool;
use crate::services::mailer::MailerFactory;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    pub mailers: Arc<dyn MailerFactory>,
}

impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Arc<dyn MailerFactory> {
    fn from_ref(state: &AppState) -> Self {
        state.mailers.clone()
    }
}

impl FromRef<AppState> for Arc<Config> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
