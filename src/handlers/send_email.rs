//! One-off relay endpoint: `POST /api/send-email`.
//!
//! Used by trusted internal callers to push a single message through
//! caller-supplied SMTP settings. Guarded by `shared_secret_middleware`,
//! not by tenant API keys, and it answers with its own
//! `{"success": ..}` envelope rather than the usual error body.

use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use crate::services::mailer::{MailError, MailerFactory, OutgoingEmail, SmtpSettings};

/// # JSON Example
///
/// ```json
/// {
///   "smtp": {
///     "host": "smtp.example.com",
///     "port": 587,
///     "encryption": "starttls",
///     "username": "relay@example.com",
///     "password": "app-password"
///   },
///   "from": "relay@example.com",
///   "from_name": "Example",
///   "to": "someone@example.org",
///   "subject": "Hello",
///   "html": "<p>Hello</p>",
///   "text": "Hello"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    pub smtp: SmtpSettings,
    pub from: String,
    pub from_name: Option<String>,
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SendEmailResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendEmailResponse {
    fn failure(status: StatusCode, error: String) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                success: false,
                message_id: None,
                error: Some(error),
            }),
        )
    }
}

/// Bad input from the caller is 400; the relay misbehaving is 502.
fn status_for(err: &MailError) -> StatusCode {
    match err {
        MailError::InvalidAddress(_) | MailError::InvalidMessage(_) | MailError::Configuration(_) => {
            StatusCode::BAD_REQUEST
        }
        MailError::Temporary(_) | MailError::Permanent(_) => StatusCode::BAD_GATEWAY,
    }
}

pub async fn send_email(
    State(mailers): State<Arc<dyn MailerFactory>>,
    payload: Result<Json<SendEmailRequest>, JsonRejection>,
) -> (StatusCode, Json<SendEmailResponse>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return SendEmailResponse::failure(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    if request.subject.trim().is_empty() {
        return SendEmailResponse::failure(
            StatusCode::BAD_REQUEST,
            "subject is required".to_string(),
        );
    }

    let email = OutgoingEmail {
        from: request.from,
        from_name: request.from_name,
        to: request.to,
        to_name: request.to_name,
        subject: request.subject,
        html: request.html,
        text: request.text,
    };

    let result = match mailers.build(&request.smtp) {
        Ok(mailer) => mailer.send(&email).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(receipt) => {
            tracing::info!(host = %request.smtp.host, message_id = %receipt.message_id, "relayed email");
            (
                StatusCode::OK,
                Json(SendEmailResponse {
                    success: true,
                    message_id: Some(receipt.message_id),
                    error: None,
                }),
            )
        }
        Err(err) => {
            tracing::warn!(host = %request.smtp.host, "relay send failed: {}", err);
            SendEmailResponse::failure(status_for(&err), err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::{
        body::{Body, to_bytes},
        http::{Request, header},
    };
    use serde_json::json;
    use tower::ServiceExt;

    use crate::{
        config::Config,
        middleware::auth::SHARED_SECRET_HEADER,
        routes::build_router,
        services::mailer::mock::MockMailerFactory,
        state::AppState,
    };

    const SECRET: &str = "relay-secret";

    fn app(mailers: MockMailerFactory) -> axum::Router {
        let config: Config = envy::from_iter(vec![
            (
                "DATABASE_URL".to_string(),
                "postgres://localhost/mailcannon_test".to_string(),
            ),
            ("SEND_EMAIL_SECRET".to_string(), SECRET.to_string()),
        ])
        .unwrap();

        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();

        build_router(AppState {
            pool,
            config: Arc::new(config),
            mailers: Arc::new(mailers),
        })
    }

    fn body() -> serde_json::Value {
        json!({
            "smtp": { "host": "smtp.example.com", "port": 587, "encryption": "starttls" },
            "from": "relay@example.com",
            "to": "someone@example.org",
            "subject": "Hello",
            "text": "Hello there"
        })
    }

    fn request(secret: Option<&str>, body: String) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/send-email")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(secret) = secret {
            builder = builder.header(SHARED_SECRET_HEADER, secret);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn read(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_or_wrong_secret_is_rejected() {
        let mailers = MockMailerFactory::new();

        let response = app(mailers.clone())
            .oneshot(request(None, body().to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app(mailers.clone())
            .oneshot(request(Some("guess"), body().to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(mailers.sent().is_empty());
    }

    #[tokio::test]
    async fn test_relays_message() {
        let mailers = MockMailerFactory::new();

        let response = app(mailers.clone())
            .oneshot(request(Some(SECRET), body().to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = read(response).await;
        assert_eq!(json["success"], true);
        assert!(json["message_id"].as_str().unwrap().ends_with("@example.com>"));

        let sent = mailers.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "someone@example.org");
        assert_eq!(mailers.settings_seen()[0].host, "smtp.example.com");
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_bad_request() {
        let mut payload = body();
        payload["to"] = json!("not-an-address");

        let response = app(MockMailerFactory::new())
            .oneshot(request(Some(SECRET), payload.to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = read(response).await;
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("invalid address"));
    }

    #[tokio::test]
    async fn test_relay_failure_is_bad_gateway() {
        let mailers = MockMailerFactory::new();
        mailers.fail_next(MailError::Temporary("421 service not available".into()));

        let response = app(mailers)
            .oneshot(request(Some(SECRET), body().to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(read(response).await["success"], false);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let response = app(MockMailerFactory::new())
            .oneshot(request(Some(SECRET), "{\"smtp\": 1}".to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read(response).await["success"], false);
    }

    #[tokio::test]
    async fn test_unusable_transport_is_bad_request() {
        let mailers = MockMailerFactory::new();
        mailers.fail_build(MailError::Configuration("STARTTLS error".into()));

        let response = app(mailers.clone())
            .oneshot(request(Some(SECRET), body().to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(mailers.sent().is_empty());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&MailError::Configuration("bad host".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&MailError::Permanent("550".into())),
            StatusCode::BAD_GATEWAY
        );
    }
}
