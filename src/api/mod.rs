// API module - HTTP endpoints

pub mod access;
pub mod appointments;
pub mod auth;
pub mod health;
pub mod locations;
pub mod middleware;
pub mod payments;
pub mod pets;
pub mod webhooks;

use axum::{routing::get, Router};

use middleware::session::AppState;

/// Every JSON route of the service
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .merge(auth::router())
        .merge(pets::router())
        .merge(locations::router())
        .merge(appointments::router())
        .merge(payments::router())
        .merge(access::router())
        .merge(webhooks::router())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::{NaiveTime, Offset, Utc};
    use secrecy::Secret;
    use sqlx::PgPool;
    use tower::ServiceExt;
    use tower_sessions::SessionManagerLayer;
    use tower_sessions_sqlx_store::PostgresStore;

    use crate::config::{Config, PaymentProvider};
    use crate::services::{
        clock::BusinessClock, notifications::NotificationDispatcher,
        payment_gateway::SimulatedGateway, payment_processor::PaymentProcessor, signature,
    };

    fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/petwash_test".to_string(),
            base_url: "http://localhost:3000".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3000,
            credential_secret: Secret::new("credential".to_string()),
            opening_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            closing_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            utc_offset_minutes: -180,
            reminder_lead_minutes: 60,
            payment_provider: PaymentProvider::Simulated,
            mercadopago_api_url: "https://api.mercadopago.com".to_string(),
            mercadopago_access_token: None,
            whatsapp_api_url: None,
            whatsapp_access_token: None,
            email_api_url: None,
            email_api_key: None,
            email_from: None,
        }
    }

    /// Router over a pool that never connects; only routes that stop
    /// before touching the database can be exercised.
    fn test_app() -> Router {
        let config = test_config();
        let pool = PgPool::connect_lazy(&config.database_url).unwrap();
        let (gateway, _approvals) =
            SimulatedGateway::new(Duration::from_secs(60)..=Duration::from_secs(60));
        let signing_key = signature::derive_key("credential");

        let state = AppState {
            pool: pool.clone(),
            clock: BusinessClock::new(Utc.fix()),
            payments: PaymentProcessor::new(
                pool.clone(),
                Arc::new(gateway),
                signing_key,
                NotificationDispatcher::default(),
            ),
            signing_key,
            config: Arc::new(config),
        };

        router()
            .layer(SessionManagerLayer::new(PostgresStore::new(pool)).with_secure(false))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_protected_routes_require_login() {
        for uri in ["/api/me", "/api/pets", "/api/appointments"] {
            let response = test_app()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);

            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(body["error"], "unauthorized");
        }
    }

    #[tokio::test]
    async fn test_webhook_without_payment_id_is_acknowledged() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/webhooks/payments?topic=merchant_order&id=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
