//! Publishing engine — the single writer of truth.
//!
//! Owns the canonical entity set, the workflow engine, the publishing
//! queue, and the notification router. Every mutation funnels through
//! here; the calendar projector and timing optimizer only read snapshots.
//!
//! The queue processor runs as a background loop distinct from the
//! request paths: `spawn_processor` ticks `process_once`, which collects
//! due work under the lock, awaits the publish collaborator outside it,
//! then re-locks to apply results.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pressroom_core::config::SchedulerConfig;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::analytics::{self, SchedulingAnalytics};
use crate::calendar::{self, CalendarEvent, CalendarView, RescheduleAction};
use crate::conflict::{self, ConflictData, ConflictSeverity};
use crate::error::{Result, SchedulerError};
use crate::notify::{self, Notification, NotificationSink, NotifyRouter, LogSink};
use crate::optimizer::{
    self, AudienceInsights, CompetitorData, OptimizerData, SeasonalData, TargetMetric,
    TimingOptimization,
};
use crate::persistence::PressroomDb;
use crate::publish::{
    ContentSource, DryRunPublisher, NullContentSource, PublishRequest, Publisher,
    PublishingResult,
};
use crate::queue::{
    BackoffPolicy, PublishingQueue, QueueControl, QueueItem, QueueItemKind, QueueStats,
    QueueStatus,
};
use crate::recurrence::RecurrenceRule;
use crate::schedule::{
    ContentStatus, Priority, ScheduledContent, TimelineEvent, TimelineEventKind, WorkflowStage,
};
use crate::workflow::{TransitionOutcome, Workflow, WorkflowEngine};

/// Request to create a schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateScheduleRequest {
    pub content_id: String,
    pub title: String,
    #[serde(default)]
    pub platforms: Vec<String>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Create in `draft` instead of directly `scheduled`.
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    /// Override a high-severity conflict block.
    #[serde(default)]
    pub force: bool,
}

/// Partial update to a schedule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateScheduleRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub platforms: Option<Vec<String>>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    #[serde(default)]
    pub force: bool,
}

/// Bulk operation over many schedules.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BulkOperation {
    Cancel,
    Reschedule { new_time: DateTime<Utc> },
}

/// A mutation result plus the non-blocking conflicts found on the way.
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    pub schedule: ScheduledContent,
    pub warnings: Vec<ConflictData>,
}

/// One publish call to run outside the engine lock.
pub struct PublishJob {
    pub item_id: String,
    pub request: PublishRequest,
}

/// The publishing engine — single writer over all scheduling state.
pub struct PublishingEngine {
    schedules: Vec<ScheduledContent>,
    timeline: Vec<TimelineEvent>,
    workflow: WorkflowEngine,
    queue: PublishingQueue,
    router: NotifyRouter,
    sink: Arc<dyn NotificationSink>,
    publisher: Arc<dyn Publisher>,
    content: Arc<dyn ContentSource>,
    optimizer_data: OptimizerData,
    db: Option<PressroomDb>,
    config: SchedulerConfig,
}

impl PublishingEngine {
    pub fn new(config: SchedulerConfig) -> Self {
        let backoff = BackoffPolicy {
            base_delay_secs: config.base_retry_delay_secs,
            max_delay_secs: config.max_retry_delay_secs,
        };
        Self {
            schedules: Vec::new(),
            timeline: Vec::new(),
            workflow: WorkflowEngine::new(),
            queue: PublishingQueue::new(backoff, config.default_max_attempts),
            router: NotifyRouter::new(),
            sink: Arc::new(LogSink),
            publisher: Arc::new(DryRunPublisher),
            content: Arc::new(NullContentSource),
            optimizer_data: OptimizerData::default(),
            db: None,
            config,
        }
    }

    pub fn set_publisher(&mut self, publisher: Arc<dyn Publisher>) {
        self.publisher = publisher;
    }

    pub fn set_notification_sink(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sink = sink;
    }

    pub fn set_content_source(&mut self, content: Arc<dyn ContentSource>) {
        self.content = content;
    }

    /// Attach SQLite persistence and rehydrate state from it.
    pub fn attach_db(&mut self, db: PressroomDb) -> Result<()> {
        self.schedules = db.load_schedules()?;
        self.queue.restore(db.load_queue_items()?);
        for workflow in db.load_workflows()? {
            self.workflow.add_workflow(workflow);
        }
        tracing::info!(
            "Restored {} schedule(s), {} queue item(s)",
            self.schedules.len(),
            self.queue.items().len()
        );
        self.db = Some(db);
        Ok(())
    }

    // ─── Schedule CRUD ──────────────────────────────────────

    pub fn schedules(&self) -> &[ScheduledContent] {
        &self.schedules
    }

    pub fn schedule(&self, id: &str) -> Result<&ScheduledContent> {
        self.schedules
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| SchedulerError::NotFound(format!("schedule {id}")))
    }

    fn index_of(&self, id: &str) -> Result<usize> {
        self.schedules
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| SchedulerError::NotFound(format!("schedule {id}")))
    }

    /// Create a schedule. Conflicts are screened first: any `high` severity
    /// blocks unless `force` is set, everything else comes back as warnings.
    pub fn create_schedule(&mut self, req: CreateScheduleRequest) -> Result<ScheduleOutcome> {
        if req.title.trim().is_empty() {
            return Err(SchedulerError::Validation("title must not be empty".into()));
        }
        if !req.draft && req.platforms.is_empty() {
            return Err(SchedulerError::Validation(
                "platforms must be non-empty for a scheduled item".into(),
            ));
        }
        if req.duration_minutes.is_some_and(|d| d <= 0) {
            return Err(SchedulerError::Validation(
                "duration_minutes must be positive".into(),
            ));
        }
        if req.recurrence.as_ref().is_some_and(|r| r.interval == 0) {
            return Err(SchedulerError::Validation(
                "recurrence interval must be at least 1".into(),
            ));
        }

        let duration = req
            .duration_minutes
            .unwrap_or(self.config.default_duration_minutes);
        let conflicts = conflict::check_conflicts(
            &self.schedules,
            req.scheduled_at,
            Some(duration),
            &req.platforms,
            None,
        );
        if !req.force && conflicts.iter().any(|c| c.severity == ConflictSeverity::High) {
            return Err(SchedulerError::Conflict(conflicts));
        }

        let mut schedule = if req.draft {
            ScheduledContent::draft(&req.content_id, &req.title, req.scheduled_at)
        } else {
            ScheduledContent::scheduled(&req.content_id, &req.title, req.scheduled_at)
        };
        schedule.platforms = req.platforms;
        schedule.duration_minutes = duration;
        schedule.priority = req.priority.unwrap_or(Priority::Normal);
        schedule.recurrence = req.recurrence;
        schedule.workflow_id = req.workflow_id;

        self.record_event(TimelineEvent::now(
            &schedule.id,
            TimelineEventKind::Created {
                status: schedule.status,
            },
        ));
        if schedule.status == ContentStatus::Scheduled {
            self.queue.enqueue_publish(&schedule);
        }
        tracing::info!("Schedule created: '{}' ({})", schedule.title, schedule.id);
        self.schedules.push(schedule.clone());
        self.run_auto_transitions(&schedule.id, Utc::now());
        self.persist_schedule(&schedule.id);
        self.persist_queue();

        let schedule = self.schedule(&schedule.id)?.clone();
        Ok(ScheduleOutcome {
            schedule,
            warnings: conflicts,
        })
    }

    /// Update a schedule. `scheduled_at` is immutable once publishing has
    /// started.
    pub fn update_schedule(
        &mut self,
        id: &str,
        req: UpdateScheduleRequest,
    ) -> Result<ScheduleOutcome> {
        let idx = self.index_of(id)?;
        let current = &self.schedules[idx];

        if req.scheduled_at.is_some_and(|t| t != current.scheduled_at)
            && !current.is_editable()
        {
            return Err(SchedulerError::Validation(format!(
                "scheduled_at is frozen once status is {}",
                current.status
            )));
        }
        if req.platforms.as_ref().is_some_and(|p| p.is_empty())
            && current.status != ContentStatus::Draft
        {
            return Err(SchedulerError::Validation(
                "platforms must stay non-empty beyond draft".into(),
            ));
        }
        if req.duration_minutes.is_some_and(|d| d <= 0) {
            return Err(SchedulerError::Validation(
                "duration_minutes must be positive".into(),
            ));
        }

        let new_time = req.scheduled_at.unwrap_or(current.scheduled_at);
        let new_platforms = req
            .platforms
            .clone()
            .unwrap_or_else(|| current.platforms.clone());
        let new_duration = req.duration_minutes.unwrap_or(current.duration_minutes);
        let conflicts = conflict::check_conflicts(
            &self.schedules,
            new_time,
            Some(new_duration),
            &new_platforms,
            Some(id),
        );
        if !req.force && conflicts.iter().any(|c| c.severity == ConflictSeverity::High) {
            return Err(SchedulerError::Conflict(conflicts));
        }

        let schedule = &mut self.schedules[idx];
        let old_time = schedule.scheduled_at;
        if let Some(title) = req.title {
            schedule.title = title;
        }
        schedule.platforms = new_platforms;
        schedule.scheduled_at = new_time;
        schedule.duration_minutes = new_duration;
        if let Some(priority) = req.priority {
            schedule.priority = priority;
        }
        if let Some(recurrence) = req.recurrence {
            schedule.recurrence = Some(recurrence);
        }
        schedule.updated_at = Utc::now();
        let snapshot = schedule.clone();

        if old_time != snapshot.scheduled_at {
            self.record_event(TimelineEvent::now(
                id,
                TimelineEventKind::Rescheduled {
                    from: old_time,
                    to: snapshot.scheduled_at,
                },
            ));
        }
        self.queue.sync_with_schedule(&snapshot);
        if snapshot.status == ContentStatus::Scheduled {
            self.queue.enqueue_publish(&snapshot);
        }
        self.run_auto_transitions(id, Utc::now());
        self.persist_schedule(id);
        self.persist_queue();

        Ok(ScheduleOutcome {
            schedule: self.schedule(id)?.clone(),
            warnings: conflicts,
        })
    }

    pub fn delete_schedule(&mut self, id: &str) -> Result<()> {
        let idx = self.index_of(id)?;
        let schedule = self.schedules.remove(idx);
        self.queue.remove_for_schedule(id);
        self.timeline.retain(|e| e.schedule_id != id);
        if let Some(db) = &self.db
            && let Err(e) = db.delete_schedule(id)
        {
            tracing::warn!("Failed to delete schedule from db: {e}");
        }
        self.persist_queue();
        tracing::info!("Schedule deleted: '{}' ({id})", schedule.title);
        Ok(())
    }

    /// Cancel a schedule. Before publishing this drops all its queued work;
    /// after publishing has started it only prevents further retries —
    /// in-flight attempts finish and their results are still recorded.
    pub fn cancel_schedule(&mut self, id: &str) -> Result<()> {
        let idx = self.index_of(id)?;
        if self.schedules[idx].status.is_terminal() {
            return Err(SchedulerError::Validation(format!(
                "schedule is already {}",
                self.schedules[idx].status
            )));
        }
        self.schedules[idx].status = ContentStatus::Cancelled;
        self.schedules[idx].updated_at = Utc::now();
        let removed = self.queue.cancel_for_schedule(id);
        self.record_event(TimelineEvent::now(id, TimelineEventKind::Cancelled));
        tracing::info!("Schedule cancelled: {id} ({removed} queue item(s) dropped)");
        self.persist_schedule(id);
        self.persist_queue();
        Ok(())
    }

    /// Operator action: move a failed schedule back to `scheduled` and
    /// re-arm its failed queue items with a fresh attempt budget.
    pub fn retry_schedule(&mut self, id: &str) -> Result<()> {
        let idx = self.index_of(id)?;
        if self.schedules[idx].status != ContentStatus::Failed {
            return Err(SchedulerError::Validation(
                "only failed schedules can be retried".into(),
            ));
        }
        let now = Utc::now();
        self.schedules[idx].status = ContentStatus::Scheduled;
        self.schedules[idx].updated_at = now;
        let failed_ids: Vec<(String, String)> = self
            .queue
            .items()
            .iter()
            .filter(|i| i.schedule_id == id && i.status == QueueStatus::Failed)
            .map(|i| (i.id.clone(), i.platform.clone()))
            .collect();
        for (item_id, platform) in failed_ids {
            self.queue.retry_item(&item_id, now);
            self.record_event(TimelineEvent::now(
                id,
                TimelineEventKind::Retried { platform },
            ));
        }
        self.persist_schedule(id);
        self.persist_queue();
        Ok(())
    }

    /// Apply one operation to many schedules; individual failures don't
    /// abort the rest. Returns `(id, error message)` for the failures.
    pub fn bulk_operate(
        &mut self,
        ids: &[String],
        op: &BulkOperation,
    ) -> Vec<(String, String)> {
        let mut failures = Vec::new();
        for id in ids {
            let result = match op {
                BulkOperation::Cancel => self.cancel_schedule(id),
                BulkOperation::Reschedule { new_time } => self
                    .update_schedule(
                        id,
                        UpdateScheduleRequest {
                            scheduled_at: Some(*new_time),
                            force: true,
                            ..Default::default()
                        },
                    )
                    .map(|_| ()),
            };
            if let Err(e) = result {
                failures.push((id.clone(), e.to_string()));
            }
        }
        failures
    }

    pub fn timeline_for(&self, id: &str) -> Vec<TimelineEvent> {
        if let Some(db) = &self.db
            && let Ok(events) = db.timeline_for(id)
        {
            return events;
        }
        self.timeline
            .iter()
            .filter(|e| e.schedule_id == id)
            .cloned()
            .collect()
    }

    // ─── Conflict / optimizer / calendar queries ─────────────────

    pub fn check_conflicts(
        &self,
        candidate_time: DateTime<Utc>,
        duration_minutes: Option<i64>,
        platforms: &[String],
    ) -> Vec<ConflictData> {
        conflict::check_conflicts(&self.schedules, candidate_time, duration_minutes, platforms, None)
    }

    pub fn optimize(
        &self,
        content_id: &str,
        platforms: &[String],
        metric: TargetMetric,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> TimingOptimization {
        optimizer::optimize(
            &self.schedules,
            content_id,
            platforms,
            metric,
            range_start,
            range_end,
            &self.optimizer_data,
        )
    }

    pub fn set_audience_insights(&mut self, platform: &str, insights: AudienceInsights) {
        self.optimizer_data
            .audience
            .insert(platform.to_string(), insights);
    }

    pub fn set_competitor_data(&mut self, platform: &str, data: CompetitorData) {
        self.optimizer_data
            .competitor
            .insert(platform.to_string(), data);
    }

    pub fn set_seasonal_data(&mut self, data: SeasonalData) {
        self.optimizer_data.seasonal = Some(data);
    }

    pub fn calendar(
        &self,
        view: CalendarView,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> Vec<CalendarEvent> {
        calendar::project(&self.schedules, view, range_start, range_end)
    }

    /// Translate a calendar drag into the underlying entity update.
    pub fn reschedule_event(&mut self, event_id: &str, new_start: DateTime<Utc>) -> Result<()> {
        let schedule_id = event_id.split('@').next().unwrap_or(event_id).to_string();
        let schedule = self.schedule(&schedule_id)?.clone();
        let action = calendar::plan_reschedule(&schedule, event_id, new_start)
            .ok_or_else(|| SchedulerError::NotFound(format!("event {event_id}")))?;

        match action {
            RescheduleAction::MoveSchedule { new_start } => {
                self.update_schedule(
                    &schedule_id,
                    UpdateScheduleRequest {
                        scheduled_at: Some(new_start),
                        ..Default::default()
                    },
                )?;
            }
            RescheduleAction::SplitOccurrence { occurrence, new_start } => {
                let idx = self.index_of(&schedule_id)?;
                if let Some(rule) = &mut self.schedules[idx].recurrence {
                    rule.exceptions.push(occurrence.date_naive());
                } else {
                    return Err(SchedulerError::Validation(
                        "event id names an occurrence but the schedule has no recurrence".into(),
                    ));
                }
                let parent = self.schedules[idx].clone();
                self.persist_schedule(&schedule_id);

                let outcome = self.create_schedule(CreateScheduleRequest {
                    content_id: parent.content_id.clone(),
                    title: parent.title.clone(),
                    platforms: parent.platforms.clone(),
                    scheduled_at: new_start,
                    duration_minutes: Some(parent.duration_minutes),
                    priority: Some(parent.priority),
                    draft: false,
                    recurrence: None,
                    workflow_id: parent.workflow_id.clone(),
                    force: true,
                })?;
                let child_id = outcome.schedule.id.clone();
                let child_idx = self.index_of(&child_id)?;
                self.schedules[child_idx].parent_id = Some(parent.id.clone());
                self.persist_schedule(&child_id);
            }
        }
        Ok(())
    }

    // ─── Workflow operations ──────────────────────────────────

    pub fn workflows(&self) -> &[Workflow] {
        self.workflow.workflows()
    }

    pub fn add_workflow(&mut self, workflow: Workflow) {
        if let Some(db) = &self.db
            && let Err(e) = db.save_workflow(&workflow)
        {
            tracing::warn!("Failed to persist workflow: {e}");
        }
        self.workflow.add_workflow(workflow);
    }

    /// Execute an actor-driven stage transition. Serialized per schedule —
    /// a second attempt while one is in flight gets `ConcurrentTransition`.
    pub fn execute_transition(
        &mut self,
        id: &str,
        to: WorkflowStage,
        actor: &str,
        actor_roles: &[String],
        comment: Option<String>,
    ) -> Result<()> {
        let idx = self.index_of(id)?;
        self.workflow.begin_transition(id)?;
        let now = Utc::now();
        let result = {
            let schedule = &mut self.schedules[idx];
            self.workflow.execute_transition(schedule, to, actor_roles, now)
        };
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.workflow.end_transition(id);
                return Err(e);
            }
        };
        self.after_transition(id, &outcome, actor, comment, now);
        self.workflow.end_transition(id);
        self.run_auto_transitions(id, now);
        self.persist_schedule(id);
        self.persist_queue();
        Ok(())
    }

    /// Timeline append, notifications, timeout arming, and status coupling
    /// shared by actor, auto, and forced transitions.
    fn after_transition(
        &mut self,
        id: &str,
        outcome: &TransitionOutcome,
        actor: &str,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.record_event(TimelineEvent {
            schedule_id: id.to_string(),
            at: now,
            event: TimelineEventKind::StageChanged {
                from: outcome.from,
                to: outcome.to,
                actor: actor.to_string(),
                comment,
            },
        });

        let Ok(idx) = self.index_of(id) else { return };
        let title = self.schedules[idx].title.clone();

        for rule in &outcome.notifications {
            let notification = Notification {
                event: format!("stage:{}", outcome.to),
                schedule_id: id.to_string(),
                recipients: rule.recipients.clone(),
                channels: rule.channels.clone(),
                template_id: rule.template_id.clone(),
                body: format!("'{title}' entered {}", outcome.to),
                timestamp: now,
            };
            self.router.record(notification.clone());
            notify::dispatch_detached(self.sink.clone(), notification);
        }

        for (to_stage, hours) in &outcome.arm_timeouts {
            self.queue.enqueue_timeout(
                id,
                outcome.to,
                *to_stage,
                now + chrono::Duration::hours(*hours as i64),
            );
        }

        // Status follows the editorial axis where the mapping is direct.
        match outcome.to {
            WorkflowStage::Approval => {
                self.schedules[idx].status = ContentStatus::PendingApproval;
            }
            WorkflowStage::Scheduling => {
                self.schedules[idx].status = ContentStatus::Scheduled;
                let snapshot = self.schedules[idx].clone();
                self.queue.enqueue_publish(&snapshot);
            }
            _ => {}
        }
    }

    /// Evaluate auto-flagged rules until none applies. Bounded by the stage
    /// count so a rule cycle cannot spin.
    fn run_auto_transitions(&mut self, id: &str, now: DateTime<Utc>) {
        for _ in 0..WorkflowStage::ALL.len() {
            let Ok(idx) = self.index_of(id) else { return };
            let Some(to) = self.workflow.auto_candidate(&self.schedules[idx], now) else {
                return;
            };
            let outcome = {
                let schedule = &mut self.schedules[idx];
                self.workflow.force_transition(schedule, to, now)
            };
            self.after_transition(id, &outcome, "system", None, now);
        }
    }

    // ─── Queue operations ──────────────────────────────────

    pub fn queue_items(&self) -> &[QueueItem] {
        self.queue.items()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn queue_state(&self) -> crate::queue::QueueState {
        self.queue.state()
    }

    pub fn queue_control(&mut self, action: QueueControl) {
        self.queue.control(action);
        self.persist_queue();
    }

    pub fn retry_queue_item(&mut self, item_id: &str) -> Result<()> {
        if !self.queue.retry_item(item_id, Utc::now()) {
            return Err(SchedulerError::NotFound(format!(
                "failed queue item {item_id}"
            )));
        }
        self.persist_queue();
        Ok(())
    }

    pub fn cancel_queue_item(&mut self, item_id: &str) -> Result<()> {
        if !self.queue.cancel_item(item_id) {
            return Err(SchedulerError::Validation(format!(
                "queue item {item_id} cannot be cancelled"
            )));
        }
        self.persist_queue();
        Ok(())
    }

    pub fn prioritize_queue_item(&mut self, item_id: &str) -> Result<()> {
        if !self.queue.prioritize_item(item_id) {
            return Err(SchedulerError::NotFound(format!("queue item {item_id}")));
        }
        self.persist_queue();
        Ok(())
    }

    pub fn notifications(&self) -> &[Notification] {
        self.router.history()
    }

    pub fn analytics(&self) -> SchedulingAnalytics {
        analytics::compute(&self.schedules, self.queue.items())
    }

    pub fn publisher(&self) -> Arc<dyn Publisher> {
        self.publisher.clone()
    }

    pub fn max_concurrency(&self) -> usize {
        self.config.max_concurrency
    }

    /// Collect due work: workflow timeouts are consumed inline, publish
    /// items are marked processing and returned as jobs for the caller to
    /// run outside the lock.
    pub fn begin_due(&mut self, now: DateTime<Utc>) -> Vec<PublishJob> {
        let due = self.queue.due_ids(now);
        let mut jobs = Vec::new();

        for item_id in due {
            if jobs.len() >= self.config.max_concurrency {
                break;
            }
            let Some(kind) = self.queue.item(&item_id).map(|i| i.kind.clone()) else {
                continue;
            };
            match kind {
                QueueItemKind::WorkflowTimeout { if_stage, to_stage } => {
                    self.fire_timeout(&item_id, if_stage, to_stage, now);
                }
                QueueItemKind::Publish => {
                    let Some(item) = self.queue.begin(&item_id, now) else {
                        continue;
                    };
                    let Ok(idx) = self.index_of(&item.schedule_id) else {
                        // Orphaned item (schedule row gone): release it so it
                        // does not sit in `processing` holding its in-flight slot.
                        tracing::warn!(
                            "Queue item {} references missing schedule {} — failing it",
                            item.id,
                            item.schedule_id
                        );
                        self.queue.fail(
                            &item.id,
                            PublishingResult::failed("schedule record missing"),
                            now,
                            false,
                        );
                        self.persist_queue();
                        continue;
                    };
                    if matches!(
                        self.schedules[idx].status,
                        ContentStatus::Scheduled | ContentStatus::Approved
                    ) {
                        self.schedules[idx].status = ContentStatus::Publishing;
                        let outcome = {
                            let schedule = &mut self.schedules[idx];
                            self.workflow
                                .force_transition(schedule, WorkflowStage::Publishing, now)
                        };
                        self.after_transition(&item.schedule_id, &outcome, "queue", None, now);
                        self.persist_schedule(&item.schedule_id);
                    }

                    let schedule = &self.schedules[idx];
                    let payload = self
                        .content
                        .body(&schedule.content_id)
                        .unwrap_or_else(|| schedule.title.clone());
                    jobs.push(PublishJob {
                        item_id: item.id.clone(),
                        request: PublishRequest {
                            content_id: schedule.content_id.clone(),
                            platform: item.platform.clone(),
                            payload,
                            attempt_token: item.attempt_token(),
                        },
                    });
                }
            }
        }
        if !jobs.is_empty() {
            self.persist_queue();
        }
        jobs
    }

    fn fire_timeout(
        &mut self,
        item_id: &str,
        if_stage: WorkflowStage,
        to_stage: WorkflowStage,
        now: DateTime<Utc>,
    ) {
        self.queue.finish_timeout(item_id);
        let Some(schedule_id) = self
            .queue
            .item(item_id)
            .map(|i| i.schedule_id.clone())
        else {
            return;
        };
        let Ok(idx) = self.index_of(&schedule_id) else { return };
        if self.schedules[idx].current_stage != if_stage {
            return;
        }
        tracing::info!(
            "Workflow timeout fired: {} escalating {} -> {}",
            schedule_id,
            if_stage,
            to_stage
        );
        let outcome = {
            let schedule = &mut self.schedules[idx];
            self.workflow.force_transition(schedule, to_stage, now)
        };
        self.after_transition(&schedule_id, &outcome, "timeout", None, now);
        self.run_auto_transitions(&schedule_id, now);
        self.persist_schedule(&schedule_id);
    }

    /// Apply one publish result. Parent aggregation waits until every item
    /// of the schedule is terminal — items may complete out of order.
    pub fn apply_result(
        &mut self,
        item_id: &str,
        result: PublishingResult,
        now: DateTime<Utc>,
    ) {
        let Some(item) = self.queue.item(item_id).cloned() else {
            return;
        };
        let schedule_id = item.schedule_id.clone();
        let parent_cancelled = self
            .schedule(&schedule_id)
            .map(|s| s.status == ContentStatus::Cancelled)
            .unwrap_or(true);

        if result.success {
            self.record_event(TimelineEvent {
                schedule_id: schedule_id.clone(),
                at: now,
                event: TimelineEventKind::PlatformPublished {
                    platform: item.platform.clone(),
                    url: result.url.clone(),
                },
            });
            self.queue.complete(item_id, result);
        } else {
            let error = result
                .error
                .clone()
                .unwrap_or_else(|| "unknown publish error".into());
            let status = self.queue.fail(item_id, result, now, !parent_cancelled);
            if status == Some(QueueStatus::Failed) {
                self.record_event(TimelineEvent {
                    schedule_id: schedule_id.clone(),
                    at: now,
                    event: TimelineEventKind::PlatformFailed {
                        platform: item.platform.clone(),
                        error,
                    },
                });
            }
        }

        // Count-down aggregation: only once all platform items settled.
        if !parent_cancelled
            && let Some(outcome) = self.queue.outcome_for(&schedule_id)
            && let Ok(idx) = self.index_of(&schedule_id)
        {
            if outcome.any_completed {
                // Per-platform failure is independent: one success is enough
                // to publish the parent; failed platforms stay visible on
                // their queue items.
                self.schedules[idx].status = ContentStatus::Published;
                let transition = {
                    let schedule = &mut self.schedules[idx];
                    self.workflow
                        .force_transition(schedule, WorkflowStage::Completed, now)
                };
                self.after_transition(&schedule_id, &transition, "queue", None, now);
                self.record_event(TimelineEvent {
                    schedule_id: schedule_id.clone(),
                    at: now,
                    event: TimelineEventKind::Published,
                });
                tracing::info!("Schedule published: {schedule_id}");
            } else if outcome.any_failed {
                self.schedules[idx].status = ContentStatus::Failed;
                self.record_event(TimelineEvent {
                    schedule_id: schedule_id.clone(),
                    at: now,
                    event: TimelineEventKind::Failed,
                });
                tracing::warn!("Schedule failed on all platforms: {schedule_id}");
            }
        }

        self.persist_schedule(&schedule_id);
        self.persist_queue();
    }

    // ─── Persistence helpers ──────────────────────────────────

    fn record_event(&mut self, event: TimelineEvent) {
        if let Some(db) = &self.db
            && let Err(e) = db.append_timeline(&event)
        {
            tracing::warn!("Failed to persist timeline event: {e}");
        }
        self.timeline.push(event);
    }

    fn persist_schedule(&self, id: &str) {
        if let Some(db) = &self.db
            && let Ok(schedule) = self.schedule(id)
            && let Err(e) = db.save_schedule(schedule)
        {
            tracing::warn!("Failed to persist schedule {id}: {e}");
        }
    }

    fn persist_queue(&self) {
        if let Some(db) = &self.db
            && let Err(e) = db.save_queue_items(self.queue.items())
        {
            tracing::warn!("Failed to persist queue: {e}");
        }
    }
}

/// Run one poll cycle: collect due jobs under the lock, await the publish
/// collaborator outside it, then apply results. Returns the number of
/// publish calls issued.
pub async fn process_once(engine: &Arc<Mutex<PublishingEngine>>, now: DateTime<Utc>) -> usize {
    let (jobs, publisher) = {
        let mut eng = engine.lock().await;
        (eng.begin_due(now), eng.publisher())
    };
    if jobs.is_empty() {
        return 0;
    }

    let futures = jobs.into_iter().map(|job| {
        let publisher = publisher.clone();
        async move {
            let result = publisher.publish(&job.request).await;
            (job.item_id, result)
        }
    });
    let results = futures::future::join_all(futures).await;

    let count = results.len();
    let mut eng = engine.lock().await;
    for (item_id, result) in results {
        eng.apply_result(&item_id, result, now);
    }
    count
}

/// Spawn the queue processor loop as a background tokio task.
pub async fn spawn_processor(engine: Arc<Mutex<PublishingEngine>>, poll_interval_secs: u64) {
    tracing::info!("Queue processor started (poll every {poll_interval_secs}s)");
    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(poll_interval_secs.max(1)));
    loop {
        interval.tick().await;
        let processed = process_once(&engine, Utc::now()).await;
        if processed > 0 {
            tracing::debug!("Queue cycle processed {processed} item(s)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::publish::PublishingResult;

    struct CountingPublisher {
        calls: AtomicUsize,
        fail_platforms: Vec<String>,
    }

    impl CountingPublisher {
        fn succeeding() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_platforms: vec![],
            })
        }

        fn failing_on(platforms: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_platforms: platforms.iter().map(|p| p.to_string()).collect(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Publisher for CountingPublisher {
        async fn publish(&self, request: &PublishRequest) -> PublishingResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_platforms.contains(&request.platform) {
                PublishingResult::failed("permanent failure")
            } else {
                PublishingResult::ok(&format!("ext-{}", request.platform))
            }
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 6, 10, 0, 0).unwrap()
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval_secs: 1,
            max_concurrency: 4,
            base_retry_delay_secs: 30,
            max_retry_delay_secs: 3600,
            default_max_attempts: 3,
            default_duration_minutes: 60,
        }
    }

    fn request(title: &str, platforms: &[&str], at: DateTime<Utc>) -> CreateScheduleRequest {
        CreateScheduleRequest {
            content_id: format!("content-{title}"),
            title: title.to_string(),
            platforms: platforms.iter().map(|p| p.to_string()).collect(),
            scheduled_at: at,
            duration_minutes: None,
            priority: None,
            draft: false,
            recurrence: None,
            workflow_id: None,
            force: false,
        }
    }

    fn engine_with(publisher: Arc<dyn Publisher>) -> Arc<Mutex<PublishingEngine>> {
        let mut engine = PublishingEngine::new(config());
        engine.set_publisher(publisher);
        Arc::new(Mutex::new(engine))
    }

    /// Drive poll cycles, jumping `now` past any retry backoff.
    async fn drain(engine: &Arc<Mutex<PublishingEngine>>, mut now: DateTime<Utc>) {
        for _ in 0..10 {
            process_once(engine, now).await;
            now += Duration::hours(2);
        }
    }

    #[test]
    fn test_create_requires_platforms() {
        let mut engine = PublishingEngine::new(config());
        let err = engine
            .create_schedule(request("post", &[], t0()))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));

        // Drafts may start without platforms.
        let mut draft = request("draft", &[], t0());
        draft.draft = true;
        let outcome = engine.create_schedule(draft).unwrap();
        assert_eq!(outcome.schedule.status, ContentStatus::Draft);
    }

    #[test]
    fn test_high_conflict_blocks_unless_forced() {
        let mut engine = PublishingEngine::new(config());
        engine
            .create_schedule(request("first", &["twitter"], t0()))
            .unwrap();

        let err = engine
            .create_schedule(request("second", &["twitter"], t0()))
            .unwrap_err();
        let SchedulerError::Conflict(conflicts) = err else {
            panic!("expected conflict error");
        };
        assert!(conflicts.iter().any(|c| c.severity == ConflictSeverity::High));

        let mut forced = request("second", &["twitter"], t0());
        forced.force = true;
        let outcome = engine.create_schedule(forced).unwrap();
        assert!(!outcome.warnings.is_empty());
    }

    #[test]
    fn test_partial_overlap_returns_warning() {
        let mut engine = PublishingEngine::new(config());
        engine
            .create_schedule(request("c1", &["website", "twitter"], t0()))
            .unwrap();

        let outcome = engine
            .create_schedule(request("c2", &["twitter"], t0() + Duration::minutes(30)))
            .unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].severity >= ConflictSeverity::Medium);
    }

    #[tokio::test]
    async fn test_successful_publish_completes_schedule() {
        let publisher = CountingPublisher::succeeding();
        let engine = engine_with(publisher.clone());
        let id = {
            let mut eng = engine.lock().await;
            eng.create_schedule(request("post", &["website", "twitter"], t0()))
                .unwrap()
                .schedule
                .id
        };

        process_once(&engine, t0() + Duration::minutes(1)).await;

        let eng = engine.lock().await;
        let schedule = eng.schedule(&id).unwrap();
        assert_eq!(schedule.status, ContentStatus::Published);
        assert_eq!(schedule.current_stage, WorkflowStage::Completed);
        assert_eq!(publisher.calls(), 2);
        assert!(eng
            .queue_items()
            .iter()
            .all(|i| i.status == QueueStatus::Completed));
    }

    #[tokio::test]
    async fn test_completed_item_never_reprocessed() {
        let publisher = CountingPublisher::succeeding();
        let engine = engine_with(publisher.clone());
        {
            let mut eng = engine.lock().await;
            eng.create_schedule(request("post", &["website"], t0()))
                .unwrap();
        }

        process_once(&engine, t0() + Duration::minutes(1)).await;
        process_once(&engine, t0() + Duration::minutes(2)).await;
        assert_eq!(publisher.calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_bound_exactly_max_attempts() {
        let publisher = CountingPublisher::failing_on(&["twitter"]);
        let engine = engine_with(publisher.clone());
        let id = {
            let mut eng = engine.lock().await;
            eng.create_schedule(request("post", &["twitter"], t0()))
                .unwrap()
                .schedule
                .id
        };

        drain(&engine, t0() + Duration::minutes(1)).await;

        let eng = engine.lock().await;
        assert_eq!(publisher.calls(), 3);
        let item = &eng.queue_items()[0];
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.attempts, 3);
        assert_eq!(eng.schedule(&id).unwrap().status, ContentStatus::Failed);
    }

    #[tokio::test]
    async fn test_partial_platform_failure_is_independent() {
        let publisher = CountingPublisher::failing_on(&["twitter"]);
        let engine = engine_with(publisher.clone());
        let id = {
            let mut eng = engine.lock().await;
            eng.create_schedule(request("post", &["website", "twitter"], t0()))
                .unwrap()
                .schedule
                .id
        };

        drain(&engine, t0() + Duration::minutes(1)).await;

        let eng = engine.lock().await;
        let website = eng
            .queue_items()
            .iter()
            .find(|i| i.platform == "website")
            .unwrap();
        let twitter = eng
            .queue_items()
            .iter()
            .find(|i| i.platform == "twitter")
            .unwrap();
        assert_eq!(website.status, QueueStatus::Completed);
        assert_eq!(twitter.status, QueueStatus::Failed);
        // One successful platform is enough — the parent is never failed
        // while a sibling succeeded.
        assert_eq!(eng.schedule(&id).unwrap().status, ContentStatus::Published);
    }

    #[tokio::test]
    async fn test_operator_retry_after_failure() {
        let publisher = CountingPublisher::failing_on(&["twitter"]);
        let engine = engine_with(publisher.clone());
        let id = {
            let mut eng = engine.lock().await;
            eng.create_schedule(request("post", &["twitter"], t0()))
                .unwrap()
                .schedule
                .id
        };
        drain(&engine, t0() + Duration::minutes(1)).await;

        let mut eng = engine.lock().await;
        assert_eq!(eng.schedule(&id).unwrap().status, ContentStatus::Failed);
        eng.retry_schedule(&id).unwrap();
        let schedule = eng.schedule(&id).unwrap();
        assert_eq!(schedule.status, ContentStatus::Scheduled);
        assert_eq!(eng.queue_items()[0].status, QueueStatus::Pending);
        assert_eq!(eng.queue_items()[0].attempts, 0);
    }

    #[tokio::test]
    async fn test_cancel_before_publishing_drops_queue_items() {
        let engine = engine_with(CountingPublisher::succeeding());
        let id = {
            let mut eng = engine.lock().await;
            eng.create_schedule(request("post", &["website"], t0() + Duration::hours(5)))
                .unwrap()
                .schedule
                .id
        };

        let mut eng = engine.lock().await;
        eng.cancel_schedule(&id).unwrap();
        assert_eq!(eng.schedule(&id).unwrap().status, ContentStatus::Cancelled);
        assert!(eng
            .queue_items()
            .iter()
            .all(|i| i.status == QueueStatus::Cancelled));
    }

    #[test]
    fn test_scheduled_at_frozen_once_publishing() {
        let mut engine = PublishingEngine::new(config());
        let id = engine
            .create_schedule(request("post", &["website"], t0()))
            .unwrap()
            .schedule
            .id;
        let idx = engine.index_of(&id).unwrap();
        engine.schedules[idx].status = ContentStatus::Publishing;

        let err = engine
            .update_schedule(
                &id,
                UpdateScheduleRequest {
                    scheduled_at: Some(t0() + Duration::hours(1)),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_removed_platform_is_not_published() {
        let publisher = CountingPublisher::succeeding();
        let engine = engine_with(publisher.clone());
        let id = {
            let mut eng = engine.lock().await;
            eng.create_schedule(request("post", &["website", "twitter"], t0()))
                .unwrap()
                .schedule
                .id
        };

        {
            let mut eng = engine.lock().await;
            eng.update_schedule(
                &id,
                UpdateScheduleRequest {
                    platforms: Some(vec!["website".into()]),
                    ..Default::default()
                },
            )
            .unwrap();
        }

        process_once(&engine, t0() + Duration::minutes(1)).await;

        let eng = engine.lock().await;
        assert_eq!(publisher.calls(), 1);
        let twitter = eng
            .queue_items()
            .iter()
            .find(|i| i.platform == "twitter")
            .unwrap();
        assert_eq!(twitter.status, QueueStatus::Cancelled);
        assert_eq!(eng.schedule(&id).unwrap().status, ContentStatus::Published);
    }

    #[test]
    fn test_orphaned_queue_item_is_released() {
        let mut engine = PublishingEngine::new(config());
        engine
            .create_schedule(request("post", &["website"], t0()))
            .unwrap();
        // A queue restored from disk whose schedule row was unreadable.
        engine.schedules.clear();

        let jobs = engine.begin_due(t0() + Duration::minutes(1));
        assert!(jobs.is_empty());
        let item = &engine.queue_items()[0];
        assert_eq!(item.status, QueueStatus::Failed);
        // The in-flight slot is free again and the item stays terminal.
        assert!(engine.begin_due(t0() + Duration::minutes(2)).is_empty());
    }

    #[tokio::test]
    async fn test_transition_records_notification() {
        let engine = engine_with(CountingPublisher::succeeding());
        let mut eng = engine.lock().await;
        let mut req = request("post", &["website"], t0());
        req.draft = true;
        req.platforms = vec!["website".into()];
        let id = eng.create_schedule(req).unwrap().schedule.id;

        eng.execute_transition(&id, WorkflowStage::Review, "alice", &[], None)
            .unwrap();
        eng.execute_transition(
            &id,
            WorkflowStage::Approval,
            "bob",
            &["editor".into()],
            Some("looks good".into()),
        )
        .unwrap();

        let schedule = eng.schedule(&id).unwrap();
        assert_eq!(schedule.current_stage, WorkflowStage::Approval);
        assert_eq!(schedule.status, ContentStatus::PendingApproval);
        // The editorial workflow notifies on entering approval.
        assert_eq!(eng.notifications().len(), 1);
        assert_eq!(eng.notifications()[0].event, "stage:approval");

        let timeline = eng.timeline_for(&id);
        assert!(timeline
            .iter()
            .any(|e| matches!(&e.event, TimelineEventKind::StageChanged { to, .. }
                if *to == WorkflowStage::Approval)));
    }

    #[tokio::test]
    async fn test_workflow_timeout_escalates() {
        use crate::workflow::WorkflowRule;

        let engine = engine_with(CountingPublisher::succeeding());
        let mut eng = engine.lock().await;

        let mut wf = Workflow::default_editorial();
        wf.id = "wf-timed".into();
        wf.rules.push(WorkflowRule {
            from: WorkflowStage::Review,
            to: WorkflowStage::Editing,
            condition: None,
            required_roles: vec![],
            auto_transition: false,
            timeout_hours: Some(2),
        });
        eng.add_workflow(wf);

        let mut req = request("post", &["website"], t0() + Duration::days(7));
        req.draft = true;
        req.workflow_id = Some("wf-timed".into());
        let id = eng.create_schedule(req).unwrap().schedule.id;
        eng.execute_transition(&id, WorkflowStage::Review, "alice", &[], None)
            .unwrap();
        drop(eng);

        // Before the timeout nothing moves.
        process_once(&engine, Utc::now() + Duration::hours(1)).await;
        assert_eq!(
            engine.lock().await.schedule(&id).unwrap().current_stage,
            WorkflowStage::Review
        );

        process_once(&engine, Utc::now() + Duration::hours(3)).await;
        assert_eq!(
            engine.lock().await.schedule(&id).unwrap().current_stage,
            WorkflowStage::Editing
        );
    }

    #[test]
    fn test_drag_reschedule_occurrence_splits_child() {
        use crate::recurrence::{Frequency, RecurrenceRule};

        let mut engine = PublishingEngine::new(config());
        let mut req = request("daily", &["website"], t0());
        req.recurrence = Some(RecurrenceRule {
            frequency: Frequency::Daily,
            interval: 1,
            count: Some(5),
            end_date: None,
            weekdays: vec![],
            monthdays: vec![],
            exceptions: vec![],
        });
        let id = engine.create_schedule(req).unwrap().schedule.id;

        let occurrence = t0() + Duration::days(2);
        let event_id = format!("{id}@{}", occurrence.timestamp());
        engine
            .reschedule_event(&event_id, occurrence + Duration::hours(3))
            .unwrap();

        let parent = engine.schedule(&id).unwrap();
        assert_eq!(
            parent.recurrence.as_ref().unwrap().exceptions,
            vec![occurrence.date_naive()]
        );
        let child = engine
            .schedules()
            .iter()
            .find(|s| s.parent_id.as_deref() == Some(id.as_str()))
            .unwrap();
        assert_eq!(child.scheduled_at, occurrence + Duration::hours(3));
        assert!(child.recurrence.is_none());
    }

    #[tokio::test]
    async fn test_persistence_survives_restart() {
        let publisher = CountingPublisher::succeeding();
        let id;
        let db_path = std::env::temp_dir()
            .join(format!("pressroom-engine-test-{}", uuid::Uuid::new_v4()))
            .join("pressroom.db");
        {
            let mut engine = PublishingEngine::new(config());
            engine.set_publisher(publisher.clone());
            engine.attach_db(PressroomDb::open(&db_path).unwrap()).unwrap();
            id = engine
                .create_schedule(request("post", &["website"], t0()))
                .unwrap()
                .schedule
                .id;
        }

        let mut engine = PublishingEngine::new(config());
        engine.set_publisher(publisher);
        engine.attach_db(PressroomDb::open(&db_path).unwrap()).unwrap();
        assert_eq!(engine.schedules().len(), 1);
        assert_eq!(engine.schedule(&id).unwrap().title, "post");
        assert_eq!(engine.queue_items().len(), 1);
        std::fs::remove_dir_all(db_path.parent().unwrap()).ok();
    }

    #[tokio::test]
    async fn test_bulk_cancel() {
        let engine = engine_with(CountingPublisher::succeeding());
        let mut eng = engine.lock().await;
        let a = eng
            .create_schedule(request("a", &["web"], t0()))
            .unwrap()
            .schedule
            .id;
        let b = eng
            .create_schedule(request("b", &["twitter"], t0()))
            .unwrap()
            .schedule
            .id;

        let failures = eng.bulk_operate(
            &[a.clone(), b.clone(), "missing".into()],
            &BulkOperation::Cancel,
        );
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "missing");
        assert_eq!(eng.schedule(&a).unwrap().status, ContentStatus::Cancelled);
        assert_eq!(eng.schedule(&b).unwrap().status, ContentStatus::Cancelled);
    }
}
