//! HTTP routing.
//!
//! Four route groups, each with its own guard:
//! - public: `/health`
//! - tenant: `/api/v1/...` behind `auth_middleware`
//! - admin: `/api/v1/admin/...` behind `auth_middleware` then `require_admin`
//! - relay: `/api/send-email` behind `shared_secret_middleware`

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{
        campaigns, health, leads, payments, plans, recipients, send_email, smtp_accounts, users,
    },
    middleware::auth::{auth_middleware, require_admin, shared_secret_middleware},
    state::AppState,
};

fn tenant_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/me", get(users::me))
        .route("/api/v1/me/api-key", post(users::rotate_api_key))
        .route("/api/v1/plans", get(plans::list_plans))
        .route(
            "/api/v1/payments",
            post(payments::submit_payment).get(payments::list_my_payments),
        )
        // SMTP accounts
        .route(
            "/api/v1/smtp-accounts",
            post(smtp_accounts::create_smtp_account).get(smtp_accounts::list_smtp_accounts),
        )
        .route(
            "/api/v1/smtp-accounts/{id}",
            get(smtp_accounts::get_smtp_account)
                .put(smtp_accounts::update_smtp_account)
                .delete(smtp_accounts::delete_smtp_account),
        )
        .route(
            "/api/v1/smtp-accounts/{id}/test",
            post(smtp_accounts::test_smtp_account),
        )
        // Recipient lists
        .route(
            "/api/v1/recipient-lists",
            post(recipients::create_list).get(recipients::list_lists),
        )
        .route(
            "/api/v1/recipient-lists/{id}",
            get(recipients::get_list)
                .put(recipients::update_list)
                .delete(recipients::delete_list),
        )
        .route(
            "/api/v1/recipient-lists/{id}/recipients",
            post(recipients::add_recipients).get(recipients::list_recipients),
        )
        .route(
            "/api/v1/recipient-lists/{id}/recipients/{recipient_id}",
            axum::routing::delete(recipients::delete_recipient),
        )
        .route(
            "/api/v1/recipient-lists/{id}/recipients/{recipient_id}/unsubscribe",
            post(recipients::unsubscribe_recipient),
        )
        // Campaigns
        .route(
            "/api/v1/campaigns",
            post(campaigns::create_campaign).get(campaigns::list_campaigns),
        )
        .route(
            "/api/v1/campaigns/{id}",
            get(campaigns::get_campaign)
                .put(campaigns::update_campaign)
                .delete(campaigns::delete_campaign),
        )
        .route("/api/v1/campaigns/{id}/send", post(campaigns::send_campaign))
        .route(
            "/api/v1/campaigns/{id}/schedule",
            post(campaigns::schedule_campaign),
        )
        .route("/api/v1/campaigns/{id}/pause", post(campaigns::pause_campaign))
        .route(
            "/api/v1/campaigns/{id}/resume",
            post(campaigns::resume_campaign),
        )
        .route(
            "/api/v1/campaigns/{id}/cancel",
            post(campaigns::cancel_campaign),
        )
        .route(
            "/api/v1/campaigns/{id}/report",
            get(campaigns::campaign_report),
        )
        // Leads
        .route("/api/v1/leads", post(leads::create_lead).get(leads::list_leads))
        .route("/api/v1/leads/pipeline", get(leads::pipeline))
        .route(
            "/api/v1/leads/{id}",
            get(leads::get_lead)
                .put(leads::update_lead)
                .delete(leads::delete_lead),
        )
        .route("/api/v1/leads/{id}/stage", post(leads::change_stage))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
}

fn admin_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/admin/users",
            post(users::create_user).get(users::list_users),
        )
        .route(
            "/api/v1/admin/users/{id}/deactivate",
            post(users::deactivate_user),
        )
        .route("/api/v1/admin/plans", post(plans::create_plan))
        .route(
            "/api/v1/admin/plans/{id}",
            axum::routing::put(plans::update_plan).delete(plans::delete_plan),
        )
        .route("/api/v1/admin/payments", get(payments::list_payments))
        .route(
            "/api/v1/admin/payments/{id}/approve",
            post(payments::approve_payment),
        )
        .route(
            "/api/v1/admin/payments/{id}/reject",
            post(payments::reject_payment),
        )
        // Layers run bottom-up: authenticate first, then check the role.
        .route_layer(axum_middleware::from_fn(require_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
}

fn relay_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/send-email", post(send_email::send_email))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            shared_secret_middleware,
        ))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .merge(tenant_routes(&state))
        .merge(admin_routes(&state))
        .merge(relay_routes(&state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
