use std::{ops::RangeInclusive, sync::Arc, time::Duration};

use axum::http::{header, HeaderValue, Method};
use secrecy::ExposeSecret;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use petwash::api::{
    self,
    middleware::session::{create_session_layer, AppState},
};
use petwash::config::{Config, PaymentProvider};
use petwash::db;
use petwash::jobs::{self, appointment_reminder::ReminderJob};
use petwash::services::{
    clock::BusinessClock,
    notifications::{EmailNotifier, NotificationDispatcher, Notifier, WhatsAppNotifier},
    payment_gateway::{MercadoPagoGateway, PaymentGateway, PaymentSimulator, SimulatedGateway},
    payment_processor::PaymentProcessor,
    signature,
};

const SIMULATED_APPROVAL_DELAY: RangeInclusive<Duration> =
    Duration::from_secs(5)..=Duration::from_secs(20);

fn build_notifications(config: &Config) -> NotificationDispatcher {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();

    if let (Some(url), Some(token)) = (&config.whatsapp_api_url, &config.whatsapp_access_token) {
        notifiers.push(Arc::new(WhatsAppNotifier::new(url, token.expose_secret())));
    }
    if let (Some(url), Some(key), Some(from)) =
        (&config.email_api_url, &config.email_api_key, &config.email_from)
    {
        notifiers.push(Arc::new(EmailNotifier::new(url, key.expose_secret(), from)));
    }

    let dispatcher = NotificationDispatcher::new(notifiers);
    tracing::info!(channels = ?dispatcher.channels(), "Notification channels configured");
    dispatcher
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "petwash=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting pet wash server...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Create session layer
    let session_layer = create_session_layer(pool.clone(), &config.base_url).await?;
    tracing::info!("Session layer initialized");

    let signing_key = signature::derive_key(config.credential_secret.expose_secret());
    let clock = BusinessClock::new(config.business_offset());
    let notifications = build_notifications(&config);

    // Pick the payment gateway
    let mut simulator: Option<PaymentSimulator> = None;
    let mut approvals = None;
    let gateway: Arc<dyn PaymentGateway> = match config.payment_provider {
        PaymentProvider::MercadoPago => {
            let token = config
                .mercadopago_access_token
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("mercadopago_access_token is not set"))?;
            let notification_url = url::Url::parse(&config.base_url)?.join("/api/webhooks/payments")?;
            tracing::info!(notification_url = %notification_url, "Using Mercado Pago gateway");
            Arc::new(MercadoPagoGateway::new(
                &config.mercadopago_api_url,
                token.expose_secret(),
                notification_url.as_str(),
            ))
        }
        PaymentProvider::Simulated => {
            tracing::warn!("Using simulated payment gateway; payments approve themselves");
            let (gateway, rx) = SimulatedGateway::new(SIMULATED_APPROVAL_DELAY);
            simulator = Some(gateway.simulator().clone());
            approvals = Some(rx);
            Arc::new(gateway)
        }
    };

    let payments = PaymentProcessor::new(pool.clone(), gateway, signing_key, notifications.clone());

    // Simulated approvals go through the same path as gateway webhooks
    if let Some(mut approvals) = approvals {
        let payments = payments.clone();
        tokio::spawn(async move {
            while let Some(external_id) = approvals.recv().await {
                if let Err(e) = payments.handle_notification(&external_id).await {
                    tracing::error!(external_id = %external_id, error = %e, "Failed to apply simulated approval");
                }
            }
        });
    }

    // Start background jobs
    let reminders = ReminderJob::new(
        pool.clone(),
        notifications,
        clock,
        config.reminder_lead_minutes,
    );
    let mut scheduler = jobs::start_scheduler(reminders)
        .await
        .map_err(|e| anyhow::anyhow!("failed to start job scheduler: {:?}", e))?;

    let cors = CorsLayer::new()
        .allow_origin(config.base_url.trim_end_matches('/').parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    let addr = format!("{}:{}", config.host, config.port);

    // Build application state
    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config),
        clock,
        payments,
        signing_key,
    };

    // Build router
    let app = api::router()
        .layer(session_layer)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(simulator) = simulator {
        simulator.shutdown();
    }
    if let Err(e) = scheduler.shutdown().await {
        tracing::error!(error = ?e, "Job scheduler did not shut down cleanly");
    }
    pool.close().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for the shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, cleaning up...");
}
