//! Durable publishing queue — one item per `(schedule, platform)` pair so a
//! single platform failure never blocks the others.
//!
//! Item state machine:
//! ```text
//! pending → processing → { completed | retrying | failed }
//!              ↑______________|   (until attempts == max_attempts)
//! ```

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::publish::PublishingResult;
use crate::schedule::{Priority, ScheduledContent, WorkflowStage};

/// Queue item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
    Cancelled,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// What processing an item means.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueItemKind {
    /// Invoke the publish collaborator for this platform.
    Publish,
    /// Forced workflow transition if the schedule is still in `if_stage`.
    WorkflowTimeout {
        if_stage: WorkflowStage,
        to_stage: WorkflowStage,
    },
}

/// One unit of queued work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub schedule_id: String,
    /// Empty for workflow-timeout items.
    pub platform: String,
    pub kind: QueueItemKind,
    pub status: QueueStatus,
    /// Earliest instant this item may be dequeued.
    pub scheduled_at: DateTime<Utc>,
    pub priority: Priority,
    /// Publish invocations started so far.
    pub attempts: u32,
    pub max_attempts: u32,
    /// For retrying items: earliest instant of the next attempt.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_result: Option<PublishingResult>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueueItem {
    /// Stable idempotency key for the current attempt.
    pub fn attempt_token(&self) -> String {
        format!("{}-a{}", self.id, self.attempts)
    }

    fn due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            QueueStatus::Pending => self.scheduled_at <= now,
            QueueStatus::Retrying => self.next_attempt_at.is_some_and(|t| t <= now),
            _ => false,
        }
    }
}

/// Exponential backoff: `base * 2^attempts`, capped.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl BackoffPolicy {
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exp = self.base_delay_secs.saturating_mul(1u64 << attempts.min(20));
        Duration::seconds(exp.min(self.max_delay_secs) as i64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: 30,
            max_delay_secs: 3600,
        }
    }
}

/// Whether the queue hands out work at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Running,
    Paused,
    Stopped,
}

/// Queue-level control actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueControl {
    Start,
    Pause,
    Stop,
    Clear,
}

/// Aggregate view of one schedule's publish items after they settle.
#[derive(Debug, Clone, Copy)]
pub struct PublishOutcome {
    pub any_completed: bool,
    pub any_failed: bool,
}

/// The durable work list plus its in-flight guard.
pub struct PublishingQueue {
    items: Vec<QueueItem>,
    state: QueueState,
    pub backoff: BackoffPolicy,
    pub default_max_attempts: u32,
    /// `(schedule_id, platform)` pairs currently processing. Never two
    /// concurrent publishes for the same pair.
    in_flight: HashSet<(String, String)>,
}

impl PublishingQueue {
    pub fn new(backoff: BackoffPolicy, default_max_attempts: u32) -> Self {
        Self {
            items: Vec::new(),
            state: QueueState::Running,
            backoff,
            default_max_attempts,
            in_flight: HashSet::new(),
        }
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn item(&self, id: &str) -> Option<&QueueItem> {
        self.items.iter().find(|i| i.id == id)
    }

    fn item_mut(&mut self, id: &str) -> Option<&mut QueueItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    /// Restore persisted items at boot. Items stranded in `processing` by a
    /// crash go back to `pending`.
    pub fn restore(&mut self, items: Vec<QueueItem>) {
        self.items = items;
        for item in &mut self.items {
            if item.status == QueueStatus::Processing {
                item.status = QueueStatus::Pending;
            }
        }
    }

    /// Enqueue one publish item per platform of the schedule. Pairs that
    /// already hold a live item are left alone.
    pub fn enqueue_publish(&mut self, schedule: &ScheduledContent) -> usize {
        let mut added = 0;
        for platform in &schedule.platforms {
            let live = self.items.iter().any(|i| {
                i.schedule_id == schedule.id
                    && i.platform == *platform
                    && i.kind == QueueItemKind::Publish
                    && !i.status.is_terminal()
            });
            if live {
                continue;
            }
            self.items.push(QueueItem {
                id: format!("qi-{}", uuid::Uuid::new_v4()),
                schedule_id: schedule.id.clone(),
                platform: platform.clone(),
                kind: QueueItemKind::Publish,
                status: QueueStatus::Pending,
                scheduled_at: schedule.scheduled_at,
                priority: schedule.priority,
                attempts: 0,
                max_attempts: self.default_max_attempts,
                next_attempt_at: None,
                last_result: None,
                last_error: None,
                created_at: Utc::now(),
            });
            added += 1;
        }
        if added > 0 {
            tracing::info!("Queued {added} publish item(s) for '{}'", schedule.title);
        }
        added
    }

    /// Arm a workflow-timeout item.
    pub fn enqueue_timeout(
        &mut self,
        schedule_id: &str,
        if_stage: WorkflowStage,
        to_stage: WorkflowStage,
        due: DateTime<Utc>,
    ) {
        self.items.push(QueueItem {
            id: format!("qi-{}", uuid::Uuid::new_v4()),
            schedule_id: schedule_id.to_string(),
            platform: String::new(),
            kind: QueueItemKind::WorkflowTimeout { if_stage, to_stage },
            status: QueueStatus::Pending,
            scheduled_at: due,
            priority: Priority::Normal,
            attempts: 0,
            max_attempts: 1,
            next_attempt_at: None,
            last_result: None,
            last_error: None,
            created_at: Utc::now(),
        });
    }

    /// IDs of items due now, ordered by `(priority desc, scheduled_at asc)`.
    /// Pairs already in flight are skipped. Empty when not running.
    pub fn due_ids(&self, now: DateTime<Utc>) -> Vec<String> {
        if self.state != QueueState::Running {
            return Vec::new();
        }
        let mut due: Vec<&QueueItem> = self
            .items
            .iter()
            .filter(|i| i.due(now))
            .filter(|i| {
                !self
                    .in_flight
                    .contains(&(i.schedule_id.clone(), i.platform.clone()))
            })
            .collect();
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.scheduled_at.cmp(&b.scheduled_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        due.into_iter().map(|i| i.id.clone()).collect()
    }

    /// Mark an item processing and count the attempt. Returns the item
    /// snapshot, or None if it is no longer eligible.
    pub fn begin(&mut self, id: &str, now: DateTime<Utc>) -> Option<QueueItem> {
        let item = self.items.iter_mut().find(|i| i.id == id)?;
        if !item.due(now) {
            return None;
        }
        let pair = (item.schedule_id.clone(), item.platform.clone());
        if self.in_flight.contains(&pair) {
            return None;
        }
        item.status = QueueStatus::Processing;
        item.attempts += 1;
        let snapshot = item.clone();
        self.in_flight.insert(pair);
        Some(snapshot)
    }

    /// Record a successful publish.
    pub fn complete(&mut self, id: &str, result: PublishingResult) {
        if let Some(item) = self.item_mut(id) {
            item.status = QueueStatus::Completed;
            item.last_error = None;
            item.last_result = Some(result);
            let pair = (item.schedule_id.clone(), item.platform.clone());
            self.in_flight.remove(&pair);
        }
    }

    /// Record a failed publish. Re-arms the item with backoff until the
    /// attempt budget is spent, unless `allow_retry` is false (parent was
    /// cancelled mid-flight). Returns the resulting status.
    pub fn fail(
        &mut self,
        id: &str,
        result: PublishingResult,
        now: DateTime<Utc>,
        allow_retry: bool,
    ) -> Option<QueueStatus> {
        let backoff = self.backoff;
        let item = self.item_mut(id)?;
        item.last_error = result.error.clone();
        item.last_result = Some(result);

        if allow_retry && item.attempts < item.max_attempts {
            item.status = QueueStatus::Retrying;
            item.next_attempt_at = Some(now + backoff.delay_for(item.attempts));
        } else {
            item.status = QueueStatus::Failed;
            item.next_attempt_at = None;
        }
        let status = item.status;
        let pair = (item.schedule_id.clone(), item.platform.clone());
        self.in_flight.remove(&pair);
        Some(status)
    }

    /// Mark a timeout item consumed.
    pub fn finish_timeout(&mut self, id: &str) {
        if let Some(item) = self.item_mut(id) {
            item.status = QueueStatus::Completed;
            let pair = (item.schedule_id.clone(), item.platform.clone());
            self.in_flight.remove(&pair);
        }
    }

    /// Operator: reset attempts on a failed item and re-enqueue it.
    pub fn retry_item(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        match self.item_mut(id) {
            Some(item) if item.status == QueueStatus::Failed => {
                item.attempts = 0;
                item.status = QueueStatus::Pending;
                item.scheduled_at = now;
                item.next_attempt_at = None;
                item.last_error = None;
                true
            }
            _ => false,
        }
    }

    /// Operator: cancel an item regardless of attempts. Processing items
    /// finish their in-flight call; the cancel only blocks further retries.
    pub fn cancel_item(&mut self, id: &str) -> bool {
        match self.item_mut(id) {
            Some(item) if item.status == QueueStatus::Processing => false,
            Some(item) if !item.status.is_terminal() => {
                item.status = QueueStatus::Cancelled;
                item.next_attempt_at = None;
                true
            }
            _ => false,
        }
    }

    /// Operator: bump priority without touching attempts.
    pub fn prioritize_item(&mut self, id: &str) -> bool {
        match self.item_mut(id) {
            Some(item) => {
                item.priority = item.priority.bumped();
                true
            }
            None => false,
        }
    }

    /// Cancel every live item of a schedule (used when the schedule itself
    /// is cancelled). In-flight items keep running; their results are still
    /// recorded but never retried.
    pub fn cancel_for_schedule(&mut self, schedule_id: &str) -> usize {
        let mut cancelled = 0;
        for item in &mut self.items {
            if item.schedule_id == schedule_id
                && matches!(item.status, QueueStatus::Pending | QueueStatus::Retrying)
            {
                item.status = QueueStatus::Cancelled;
                item.next_attempt_at = None;
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Drop every item belonging to a deleted schedule.
    pub fn remove_for_schedule(&mut self, schedule_id: &str) {
        self.items.retain(|i| i.schedule_id != schedule_id);
    }

    /// Keep live publish items aligned with an updated schedule: pending
    /// items track its time and priority, and items for platforms dropped
    /// from the schedule are cancelled so one item per current platform
    /// always holds.
    pub fn sync_with_schedule(&mut self, schedule: &ScheduledContent) {
        for item in &mut self.items {
            if item.schedule_id != schedule.id || item.kind != QueueItemKind::Publish {
                continue;
            }
            if !schedule.platforms.contains(&item.platform)
                && matches!(item.status, QueueStatus::Pending | QueueStatus::Retrying)
            {
                item.status = QueueStatus::Cancelled;
                item.next_attempt_at = None;
                tracing::info!(
                    "Dropped platform '{}' — cancelled queue item {}",
                    item.platform,
                    item.id
                );
                continue;
            }
            if item.status == QueueStatus::Pending {
                item.scheduled_at = schedule.scheduled_at;
                item.priority = schedule.priority;
            }
        }
    }

    /// Aggregate outcome for a schedule's publish items, available only
    /// once every one of them is terminal.
    pub fn outcome_for(&self, schedule_id: &str) -> Option<PublishOutcome> {
        let items: Vec<&QueueItem> = self
            .items
            .iter()
            .filter(|i| i.schedule_id == schedule_id && i.kind == QueueItemKind::Publish)
            .collect();
        if items.is_empty() || items.iter().any(|i| !i.status.is_terminal()) {
            return None;
        }
        Some(PublishOutcome {
            any_completed: items.iter().any(|i| i.status == QueueStatus::Completed),
            any_failed: items.iter().any(|i| i.status == QueueStatus::Failed),
        })
    }

    /// Apply a queue-level control action.
    pub fn control(&mut self, action: QueueControl) {
        match action {
            QueueControl::Start => self.state = QueueState::Running,
            QueueControl::Pause => self.state = QueueState::Paused,
            QueueControl::Stop => {
                self.state = QueueState::Stopped;
                for item in &mut self.items {
                    if matches!(item.status, QueueStatus::Pending | QueueStatus::Retrying) {
                        item.status = QueueStatus::Cancelled;
                        item.next_attempt_at = None;
                    }
                }
            }
            QueueControl::Clear => {
                self.items.retain(|i| i.status == QueueStatus::Processing);
            }
        }
        tracing::info!("Queue control applied: {:?} (state {:?})", action, self.state);
    }

    /// Per-status counts for operators.
    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for item in &self.items {
            match item.status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Processing => stats.processing += 1,
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Failed => stats.failed += 1,
                QueueStatus::Retrying => stats.retrying += 1,
                QueueStatus::Cancelled => stats.cancelled += 1,
            }
            stats.total_attempts += item.attempts as u64;
        }
        stats
    }
}

/// Per-status item counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
    pub cancelled: usize,
    pub total_attempts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn schedule(platforms: &[&str], priority: Priority, at: DateTime<Utc>) -> ScheduledContent {
        let mut s = ScheduledContent::scheduled("c1", "Post", at);
        s.platforms = platforms.iter().map(|p| p.to_string()).collect();
        s.priority = priority;
        s
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 6, 10, 0, 0).unwrap()
    }

    fn queue() -> PublishingQueue {
        PublishingQueue::new(BackoffPolicy::default(), 3)
    }

    #[test]
    fn test_one_item_per_platform() {
        let mut q = queue();
        let s = schedule(&["website", "twitter"], Priority::Normal, t0());
        assert_eq!(q.enqueue_publish(&s), 2);
        // Re-enqueue is a no-op while items are live.
        assert_eq!(q.enqueue_publish(&s), 0);
    }

    #[test]
    fn test_dequeue_order_priority_then_time() {
        let mut q = queue();
        let early = schedule(&["a"], Priority::Normal, t0());
        let late_critical = schedule(&["b"], Priority::Critical, t0() + Duration::minutes(5));
        q.enqueue_publish(&early);
        q.enqueue_publish(&late_critical);

        let due = q.due_ids(t0() + Duration::hours(1));
        assert_eq!(due.len(), 2);
        let first = q.item(&due[0]).unwrap();
        assert_eq!(first.priority, Priority::Critical);
    }

    #[test]
    fn test_not_due_before_scheduled_at() {
        let mut q = queue();
        q.enqueue_publish(&schedule(&["a"], Priority::Normal, t0()));
        assert!(q.due_ids(t0() - Duration::minutes(1)).is_empty());
        assert_eq!(q.due_ids(t0()).len(), 1);
    }

    #[test]
    fn test_in_flight_guard_blocks_same_pair() {
        let mut q = queue();
        let s = schedule(&["a"], Priority::Normal, t0());
        q.enqueue_publish(&s);
        let id = q.due_ids(t0())[0].clone();
        q.begin(&id, t0()).unwrap();
        // The same pair can't be dequeued again while processing.
        assert!(q.due_ids(t0()).is_empty());
        assert!(q.begin(&id, t0()).is_none());
    }

    #[test]
    fn test_failure_backoff_schedule() {
        let mut q = queue();
        q.enqueue_publish(&schedule(&["a"], Priority::Normal, t0()));
        let id = q.due_ids(t0())[0].clone();

        q.begin(&id, t0()).unwrap();
        let status = q
            .fail(&id, PublishingResult::failed("boom"), t0(), true)
            .unwrap();
        assert_eq!(status, QueueStatus::Retrying);

        let item = q.item(&id).unwrap();
        assert_eq!(item.attempts, 1);
        // base 30s * 2^1 = 60s after the first failure.
        assert_eq!(item.next_attempt_at, Some(t0() + Duration::seconds(60)));
        // Not due until the backoff elapses.
        assert!(q.due_ids(t0() + Duration::seconds(30)).is_empty());
        assert_eq!(q.due_ids(t0() + Duration::seconds(60)).len(), 1);
    }

    #[test]
    fn test_attempt_budget_exhaustion() {
        let mut q = queue();
        q.enqueue_publish(&schedule(&["a"], Priority::Normal, t0()));
        let id = q.due_ids(t0())[0].clone();

        let mut now = t0();
        for attempt in 1..=3 {
            q.begin(&id, now).unwrap();
            let status = q
                .fail(&id, PublishingResult::failed("boom"), now, true)
                .unwrap();
            if attempt < 3 {
                assert_eq!(status, QueueStatus::Retrying);
                now = q.item(&id).unwrap().next_attempt_at.unwrap();
            } else {
                assert_eq!(status, QueueStatus::Failed);
            }
        }
        assert_eq!(q.item(&id).unwrap().attempts, 3);
    }

    #[test]
    fn test_backoff_cap() {
        let policy = BackoffPolicy {
            base_delay_secs: 30,
            max_delay_secs: 120,
        };
        assert_eq!(policy.delay_for(1), Duration::seconds(60));
        assert_eq!(policy.delay_for(10), Duration::seconds(120));
    }

    #[test]
    fn test_operator_retry_resets_attempts() {
        let mut q = queue();
        q.enqueue_publish(&schedule(&["a"], Priority::Normal, t0()));
        let id = q.due_ids(t0())[0].clone();
        for _ in 0..3 {
            let now = q
                .item(&id)
                .unwrap()
                .next_attempt_at
                .unwrap_or(t0());
            q.begin(&id, now).unwrap();
            q.fail(&id, PublishingResult::failed("boom"), now, true);
        }
        assert_eq!(q.item(&id).unwrap().status, QueueStatus::Failed);

        assert!(q.retry_item(&id, t0() + Duration::hours(2)));
        let item = q.item(&id).unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.attempts, 0);
    }

    #[test]
    fn test_stop_cancels_pending() {
        let mut q = queue();
        q.enqueue_publish(&schedule(&["a", "b"], Priority::Normal, t0()));
        q.control(QueueControl::Stop);
        assert!(q.due_ids(t0() + Duration::hours(1)).is_empty());
        assert!(q.items().iter().all(|i| i.status == QueueStatus::Cancelled));
    }

    #[test]
    fn test_pause_stops_dequeue_only() {
        let mut q = queue();
        q.enqueue_publish(&schedule(&["a"], Priority::Normal, t0()));
        q.control(QueueControl::Pause);
        assert!(q.due_ids(t0()).is_empty());
        // Items stay pending, resume after start.
        q.control(QueueControl::Start);
        assert_eq!(q.due_ids(t0()).len(), 1);
    }

    #[test]
    fn test_sync_cancels_items_for_removed_platforms() {
        let mut q = queue();
        let mut s = schedule(&["website", "twitter"], Priority::Normal, t0());
        q.enqueue_publish(&s);

        s.platforms = vec!["website".into()];
        q.sync_with_schedule(&s);

        let twitter = q.items().iter().find(|i| i.platform == "twitter").unwrap();
        assert_eq!(twitter.status, QueueStatus::Cancelled);
        let due = q.due_ids(t0());
        assert_eq!(due.len(), 1);
        assert_eq!(q.item(&due[0]).unwrap().platform, "website");
    }

    #[test]
    fn test_outcome_requires_all_terminal() {
        let mut q = queue();
        let s = schedule(&["a", "b"], Priority::Normal, t0());
        q.enqueue_publish(&s);
        let due = q.due_ids(t0());

        q.begin(&due[0], t0()).unwrap();
        q.complete(&due[0], PublishingResult::ok("p1"));
        assert!(q.outcome_for(&s.id).is_none());

        q.begin(&due[1], t0()).unwrap();
        q.fail(&due[1], PublishingResult::failed("boom"), t0(), false);
        let outcome = q.outcome_for(&s.id).unwrap();
        assert!(outcome.any_completed);
        assert!(outcome.any_failed);
    }

    #[test]
    fn test_cancel_processing_item_refused() {
        let mut q = queue();
        q.enqueue_publish(&schedule(&["a"], Priority::Normal, t0()));
        let id = q.due_ids(t0())[0].clone();
        q.begin(&id, t0()).unwrap();
        assert!(!q.cancel_item(&id));
    }
}
