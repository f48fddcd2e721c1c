//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{demo, DbAdapter, LogNotificationSender, WebhookNotificationSender},
    background::reminder_job,
    config::Config,
    error::ApiError,
    web::{router, ApiDoc, AppState},
};
use axum::http::{header::CONTENT_TYPE, HeaderValue, Method};
use axum::Router;
use engagement_core::{
    detector::{DetectorConfig, TriggerDetector},
    memory::{MemoryClients, MemoryStore},
    ports::{ActivitySource, ClientDirectory, NotificationSender, ReminderStore},
    scheduler::{ReminderScheduler, SchedulerConfig},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Storage ---
    let (store, directory, activity): (
        Arc<dyn ReminderStore>,
        Arc<dyn ClientDirectory>,
        Arc<dyn ActivitySource>,
    ) = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
            let db_adapter = Arc::new(DbAdapter::new(db_pool));
            info!("Running database migrations...");
            db_adapter
                .run_migrations()
                .await
                .map_err(|e| ApiError::Internal(format!("Migration failed: {}", e)))?;
            info!("Database migrations complete.");
            let store: Arc<dyn ReminderStore> = db_adapter.clone();
            let directory: Arc<dyn ClientDirectory> = db_adapter.clone();
            let activity: Arc<dyn ActivitySource> = db_adapter;
            (store, directory, activity)
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory storage");
            let clients = Arc::new(MemoryClients::new());
            let demo_client = demo::seed_demo_client(&clients, chrono::Utc::now()).await;
            info!(client_id = %demo_client, "Seeded demo client for in-memory mode");
            let store: Arc<dyn ReminderStore> = Arc::new(MemoryStore::new());
            let directory: Arc<dyn ClientDirectory> = clients.clone();
            let activity: Arc<dyn ActivitySource> = clients;
            (store, directory, activity)
        }
    };

    // --- 3. Initialize the Notification Sender ---
    let sender: Arc<dyn NotificationSender> = match &config.notification_webhook_url {
        Some(url) => Arc::new(
            WebhookNotificationSender::new(url.clone())
                .map_err(|e| ApiError::Internal(e.to_string()))?,
        ),
        None => {
            warn!("NOTIFICATION_WEBHOOK_URL not set, reminders will only be logged");
            Arc::new(LogNotificationSender)
        }
    };

    // --- 4. Build the Scheduler and the Shared AppState ---
    let retry_failed_after = chrono::Duration::from_std(config.delivery_retry_after)
        .map_err(|e| ApiError::Internal(format!("Invalid delivery retry delay: {}", e)))?;
    let scheduler = Arc::new(ReminderScheduler::new(
        store.clone(),
        directory.clone(),
        activity,
        sender,
        TriggerDetector::new(DetectorConfig {
            goal_staleness_days: config.goal_staleness_days,
        }),
        SchedulerConfig {
            channels: config.channels.clone(),
            retry_failed_after,
            manual_timeout: config.manual_trigger_timeout,
            activity_window_days: config.activity_window_days,
        },
    ));
    let app_state = Arc::new(AppState {
        store,
        directory: directory.clone(),
        scheduler: scheduler.clone(),
        config: config.clone(),
    });

    // --- 5. Spawn the Background Reminder Job ---
    let cancel = CancellationToken::new();
    let job = tokio::spawn(reminder_job::run(
        scheduler,
        directory,
        config.pass_interval,
        config.pass_concurrency,
        cancel.clone(),
    ));

    // --- 6. Create the Web Router ---
    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|_| {
        ApiError::Internal(format!("Invalid CORS origin '{}'", config.cors_origin))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    let app = Router::new()
        .merge(router(app_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Could not listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    if let Err(e) = job.await {
        warn!(error = %e, "Reminder job ended abnormally");
    }
    info!("Server stopped");
    Ok(())
}
