//! MailCannon - Main Application Entry Point
//!
//! A multi-tenant email-marketing API: tenants manage SMTP accounts,
//! recipient lists, campaigns and a sales-lead pipeline; admins manage users,
//! plans and payment approvals. Campaigns are delivered by a background
//! dispatcher with per-campaign throttling and retries.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Authentication**: API key with SHA-256 hashing; shared secret for the relay
//! - **Mail**: lettre async SMTP transport
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool and run migrations
//! 3. Requeue deliveries left in flight by a previous process
//! 4. Seed the bootstrap admin if configured
//! 5. Spawn the dispatcher
//! 6. Serve HTTP until Ctrl+C / SIGTERM, then drain the dispatcher

mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use tokio::{signal, sync::watch};
use tracing_subscriber::EnvFilter;

use crate::services::{
    delivery_service,
    dispatcher::Dispatcher,
    mailer::{MailerFactory, SmtpMailerFactory},
    user_service,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG (defaults to "info")
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Arc::new(config::Config::from_env()?);
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let recovered = delivery_service::recover_in_flight(&pool).await?;
    if recovered > 0 {
        tracing::warn!(recovered, "requeued deliveries interrupted by the last shutdown");
    }

    if let Some((email, api_key)) = config.bootstrap_admin() {
        user_service::ensure_bootstrap_admin(&pool, email, api_key).await?;
    }

    let mailers: Arc<dyn MailerFactory> = Arc::new(SmtpMailerFactory::new(config.smtp_timeout()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = Dispatcher::new(pool.clone(), mailers.clone(), &config);
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_rx));

    let app = routes::build_router(state::AppState {
        pool,
        config: config.clone(),
        mailers,
    });

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, waiting for the dispatcher");
    // A send error here only means the dispatcher already exited.
    let _ = shutdown_tx.send(true);
    if let Err(e) = dispatcher_task.await {
        tracing::error!("dispatcher task failed: {:?}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
