//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use pressroom_core::config::{PressroomConfig, ServerConfig};
use pressroom_scheduler::PublishingEngine;
use pressroom_scheduler::notify::{LogSink, WebhookSink};
use pressroom_scheduler::persistence::PressroomDb;
use pressroom_scheduler::publish::{DryRunPublisher, WebhookPublisher};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub server_config: ServerConfig,
    pub start_time: std::time::Instant,
    /// Scheduling engine — single writer over all scheduling state.
    pub engine: Arc<tokio::sync::Mutex<PublishingEngine>>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/api/v1/info", get(super::routes::system_info))
        // Schedules
        .route("/api/v1/schedules", get(super::routes::list_schedules))
        .route("/api/v1/schedules", post(super::routes::create_schedule))
        .route("/api/v1/schedules/bulk", post(super::routes::bulk_schedules))
        .route("/api/v1/schedules/{id}", get(super::routes::get_schedule))
        .route("/api/v1/schedules/{id}", put(super::routes::update_schedule))
        .route("/api/v1/schedules/{id}", delete(super::routes::delete_schedule))
        .route(
            "/api/v1/schedules/{id}/cancel",
            post(super::routes::cancel_schedule),
        )
        .route(
            "/api/v1/schedules/{id}/retry",
            post(super::routes::retry_schedule),
        )
        .route(
            "/api/v1/schedules/{id}/timeline",
            get(super::routes::schedule_timeline),
        )
        .route(
            "/api/v1/schedules/{id}/transition",
            post(super::routes::execute_transition),
        )
        // Conflicts / optimizer
        .route("/api/v1/conflicts/check", post(super::routes::check_conflicts))
        .route("/api/v1/optimize", post(super::routes::optimize_timing))
        .route(
            "/api/v1/insights/audience/{platform}",
            put(super::routes::set_audience_insights),
        )
        .route(
            "/api/v1/insights/competitor/{platform}",
            put(super::routes::set_competitor_data),
        )
        .route(
            "/api/v1/insights/seasonal",
            put(super::routes::set_seasonal_data),
        )
        // Calendar
        .route("/api/v1/calendar", get(super::routes::calendar_events))
        .route(
            "/api/v1/calendar/events/{id}",
            put(super::routes::reschedule_event),
        )
        // Queue
        .route("/api/v1/queue", get(super::routes::list_queue))
        .route("/api/v1/queue/stats", get(super::routes::queue_stats))
        .route("/api/v1/queue/control", post(super::routes::queue_control))
        .route(
            "/api/v1/queue/items/{id}/retry",
            post(super::routes::retry_queue_item),
        )
        .route(
            "/api/v1/queue/items/{id}/cancel",
            post(super::routes::cancel_queue_item),
        )
        .route(
            "/api/v1/queue/items/{id}/prioritize",
            post(super::routes::prioritize_queue_item),
        )
        // Workflows / notifications / analytics
        .route("/api/v1/workflows", get(super::routes::list_workflows))
        .route("/api/v1/workflows", post(super::routes::save_workflow))
        .route("/api/v1/notifications", get(super::routes::list_notifications))
        .route("/api/v1/analytics", get(super::routes::analytics))
        .layer(
            CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .allow_origin(Any)
                .max_age(std::time::Duration::from_secs(3600)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Build the engine from config: persistence, publisher, and notification
/// wiring.
pub fn build_engine(config: &PressroomConfig) -> anyhow::Result<PublishingEngine> {
    let mut engine = PublishingEngine::new(config.scheduler.clone());

    if config.publish.endpoint.is_empty() {
        engine.set_publisher(Arc::new(DryRunPublisher));
        tracing::info!("No publish endpoint configured — dry-run publisher active");
    } else {
        engine.set_publisher(Arc::new(WebhookPublisher::new(
            &config.publish.endpoint,
            config.publish.headers.clone(),
        )));
        tracing::info!("Publish endpoint: {}", config.publish.endpoint);
    }

    if config.notify.webhook_url.is_empty() {
        engine.set_notification_sink(Arc::new(LogSink));
    } else {
        engine.set_notification_sink(Arc::new(WebhookSink::new(&config.notify.webhook_url)));
    }

    let db_path = Path::new(&config.data_dir).join("pressroom.db");
    match PressroomDb::open(&db_path) {
        Ok(db) => {
            engine.attach_db(db)?;
            tracing::info!("Database: {}", db_path.display());
        }
        Err(e) => {
            tracing::warn!("Running without persistence ({}): {e}", db_path.display());
        }
    }

    Ok(engine)
}

/// Start the HTTP server and the queue processor loop.
pub async fn start(config: &PressroomConfig) -> anyhow::Result<()> {
    let engine = build_engine(config)?;
    let engine = Arc::new(tokio::sync::Mutex::new(engine));

    let poll = config.scheduler.poll_interval_secs;
    let engine_for_loop = engine.clone();
    tokio::spawn(async move {
        pressroom_scheduler::spawn_processor(engine_for_loop, poll).await;
    });

    let state = AppState {
        server_config: config.server.clone(),
        start_time: std::time::Instant::now(),
        engine,
    };
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Pressroom gateway listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
