//! API route handlers for the gateway.
//!
//! Every handler returns a `{"ok": ...}` JSON envelope. Engine errors map
//! to `{"ok": false, "error": ...}`; conflict blocks additionally carry the
//! full conflict report so clients can resolve or force.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;

use pressroom_scheduler::calendar::CalendarView;
use pressroom_scheduler::engine::{BulkOperation, CreateScheduleRequest, UpdateScheduleRequest};
use pressroom_scheduler::error::SchedulerError;
use pressroom_scheduler::optimizer::{
    AudienceInsights, CompetitorData, SeasonalData, TargetMetric,
};
use pressroom_scheduler::queue::QueueControl;
use pressroom_scheduler::schedule::WorkflowStage;
use pressroom_scheduler::workflow::Workflow;

use super::server::AppState;

fn err_envelope(e: &SchedulerError) -> Json<serde_json::Value> {
    match e {
        SchedulerError::Conflict(conflicts) => Json(serde_json::json!({
            "ok": false,
            "error": e.to_string(),
            "conflicts": conflicts,
        })),
        _ => Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    }
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "pressroom-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// System information endpoint.
pub async fn system_info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let engine = state.engine.lock().await;
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "platform": format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "schedules": engine.schedules().len(),
        "queue_state": engine.queue_state(),
        "gateway": {
            "host": state.server_config.host,
            "port": state.server_config.port,
        }
    }))
}

// ─── Schedules ──────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ScheduleFilter {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

/// List schedules, optionally filtered by status or platform.
pub async fn list_schedules(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ScheduleFilter>,
) -> Json<serde_json::Value> {
    let engine = state.engine.lock().await;
    let schedules: Vec<_> = engine
        .schedules()
        .iter()
        .filter(|s| {
            filter
                .status
                .as_ref()
                .is_none_or(|status| s.status.to_string() == *status)
        })
        .filter(|s| {
            filter
                .platform
                .as_ref()
                .is_none_or(|p| s.platforms.contains(p))
        })
        .collect();
    Json(serde_json::json!({"ok": true, "schedules": schedules}))
}

pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateScheduleRequest>,
) -> Json<serde_json::Value> {
    let mut engine = state.engine.lock().await;
    match engine.create_schedule(req) {
        Ok(outcome) => Json(serde_json::json!({
            "ok": true,
            "schedule": outcome.schedule,
            "warnings": outcome.warnings,
        })),
        Err(e) => err_envelope(&e),
    }
}

pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let engine = state.engine.lock().await;
    match engine.schedule(&id) {
        Ok(schedule) => Json(serde_json::json!({"ok": true, "schedule": schedule})),
        Err(e) => err_envelope(&e),
    }
}

pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateScheduleRequest>,
) -> Json<serde_json::Value> {
    let mut engine = state.engine.lock().await;
    match engine.update_schedule(&id, req) {
        Ok(outcome) => Json(serde_json::json!({
            "ok": true,
            "schedule": outcome.schedule,
            "warnings": outcome.warnings,
        })),
        Err(e) => err_envelope(&e),
    }
}

pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let mut engine = state.engine.lock().await;
    match engine.delete_schedule(&id) {
        Ok(()) => Json(serde_json::json!({"ok": true})),
        Err(e) => err_envelope(&e),
    }
}

pub async fn cancel_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let mut engine = state.engine.lock().await;
    match engine.cancel_schedule(&id) {
        Ok(()) => Json(serde_json::json!({"ok": true})),
        Err(e) => err_envelope(&e),
    }
}

pub async fn retry_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let mut engine = state.engine.lock().await;
    match engine.retry_schedule(&id) {
        Ok(()) => Json(serde_json::json!({"ok": true})),
        Err(e) => err_envelope(&e),
    }
}

pub async fn schedule_timeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let engine = state.engine.lock().await;
    let events = engine.timeline_for(&id);
    Json(serde_json::json!({"ok": true, "events": events}))
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub ids: Vec<String>,
    #[serde(flatten)]
    pub op: BulkOperation,
}

/// Apply one operation to many schedules. Individual failures are reported
/// per id, not as a whole-request error.
pub async fn bulk_schedules(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkRequest>,
) -> Json<serde_json::Value> {
    let mut engine = state.engine.lock().await;
    let failures = engine.bulk_operate(&req.ids, &req.op);
    let failures: Vec<_> = failures
        .into_iter()
        .map(|(id, error)| serde_json::json!({"id": id, "error": error}))
        .collect();
    Json(serde_json::json!({
        "ok": true,
        "applied": req.ids.len() - failures.len(),
        "failures": failures,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub to: WorkflowStage,
    pub actor: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

pub async fn execute_transition(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> Json<serde_json::Value> {
    let mut engine = state.engine.lock().await;
    match engine.execute_transition(&id, req.to, &req.actor, &req.roles, req.comment) {
        Ok(()) => {
            let schedule = engine.schedule(&id).ok();
            Json(serde_json::json!({"ok": true, "schedule": schedule}))
        }
        Err(e) => err_envelope(&e),
    }
}

// ─── Conflicts / optimizer ──────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ConflictCheckRequest {
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
    pub platforms: Vec<String>,
}

pub async fn check_conflicts(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConflictCheckRequest>,
) -> Json<serde_json::Value> {
    let engine = state.engine.lock().await;
    let conflicts = engine.check_conflicts(req.scheduled_at, req.duration_minutes, &req.platforms);
    Json(serde_json::json!({"ok": true, "conflicts": conflicts}))
}

#[derive(Debug, Deserialize)]
pub struct OptimizeRequest {
    pub content_id: String,
    pub platforms: Vec<String>,
    pub target_metric: TargetMetric,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
}

pub async fn optimize_timing(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OptimizeRequest>,
) -> Json<serde_json::Value> {
    let engine = state.engine.lock().await;
    let optimization = engine.optimize(
        &req.content_id,
        &req.platforms,
        req.target_metric,
        req.range_start,
        req.range_end,
    );
    Json(serde_json::json!({"ok": true, "optimization": optimization}))
}

pub async fn set_audience_insights(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    Json(insights): Json<AudienceInsights>,
) -> Json<serde_json::Value> {
    let mut engine = state.engine.lock().await;
    engine.set_audience_insights(&platform, insights);
    Json(serde_json::json!({"ok": true}))
}

pub async fn set_competitor_data(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    Json(data): Json<CompetitorData>,
) -> Json<serde_json::Value> {
    let mut engine = state.engine.lock().await;
    engine.set_competitor_data(&platform, data);
    Json(serde_json::json!({"ok": true}))
}

pub async fn set_seasonal_data(
    State(state): State<Arc<AppState>>,
    Json(data): Json<SeasonalData>,
) -> Json<serde_json::Value> {
    let mut engine = state.engine.lock().await;
    engine.set_seasonal_data(data);
    Json(serde_json::json!({"ok": true}))
}

// ─── Calendar ──────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    #[serde(default)]
    pub view: Option<CalendarView>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

/// Project schedules into calendar events. Defaults to a week from now.
pub async fn calendar_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CalendarQuery>,
) -> Json<serde_json::Value> {
    let view = query.view.unwrap_or(CalendarView::Week);
    let start = query.start.unwrap_or_else(Utc::now);
    let end = query.end.unwrap_or(start + Duration::days(7));

    let engine = state.engine.lock().await;
    let events = engine.calendar(view, start, end);
    Json(serde_json::json!({"ok": true, "events": events}))
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub new_start: DateTime<Utc>,
}

/// Drag-reschedule: translate a calendar event move back into an entity
/// update (or an occurrence split for recurring schedules).
pub async fn reschedule_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
    Json(req): Json<RescheduleRequest>,
) -> Json<serde_json::Value> {
    let mut engine = state.engine.lock().await;
    match engine.reschedule_event(&event_id, req.new_start) {
        Ok(()) => Json(serde_json::json!({"ok": true})),
        Err(e) => err_envelope(&e),
    }
}

// ─── Queue ──────────────────────────────────────

pub async fn list_queue(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let engine = state.engine.lock().await;
    Json(serde_json::json!({
        "ok": true,
        "state": engine.queue_state(),
        "items": engine.queue_items(),
    }))
}

pub async fn queue_stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let engine = state.engine.lock().await;
    Json(serde_json::json!({"ok": true, "stats": engine.queue_stats()}))
}

#[derive(Debug, Deserialize)]
pub struct QueueControlRequest {
    pub action: QueueControl,
}

pub async fn queue_control(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueueControlRequest>,
) -> Json<serde_json::Value> {
    let mut engine = state.engine.lock().await;
    engine.queue_control(req.action);
    Json(serde_json::json!({"ok": true, "state": engine.queue_state()}))
}

pub async fn retry_queue_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let mut engine = state.engine.lock().await;
    match engine.retry_queue_item(&id) {
        Ok(()) => Json(serde_json::json!({"ok": true})),
        Err(e) => err_envelope(&e),
    }
}

pub async fn cancel_queue_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let mut engine = state.engine.lock().await;
    match engine.cancel_queue_item(&id) {
        Ok(()) => Json(serde_json::json!({"ok": true})),
        Err(e) => err_envelope(&e),
    }
}

pub async fn prioritize_queue_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let mut engine = state.engine.lock().await;
    match engine.prioritize_queue_item(&id) {
        Ok(()) => Json(serde_json::json!({"ok": true})),
        Err(e) => err_envelope(&e),
    }
}

// ─── Workflows / notifications / analytics ──────────────────────────

pub async fn list_workflows(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let engine = state.engine.lock().await;
    Json(serde_json::json!({"ok": true, "workflows": engine.workflows()}))
}

pub async fn save_workflow(
    State(state): State<Arc<AppState>>,
    Json(workflow): Json<Workflow>,
) -> Json<serde_json::Value> {
    let mut engine = state.engine.lock().await;
    engine.add_workflow(workflow);
    Json(serde_json::json!({"ok": true}))
}

pub async fn list_notifications(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let engine = state.engine.lock().await;
    Json(serde_json::json!({"ok": true, "notifications": engine.notifications()}))
}

pub async fn analytics(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let engine = state.engine.lock().await;
    Json(serde_json::json!({"ok": true, "analytics": engine.analytics()}))
}
