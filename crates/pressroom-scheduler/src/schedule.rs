//! Scheduled content — the core data model for publish commitments.
//!
//! `status` and `current_stage` are independent axes: status tracks the
//! publish-lifecycle outcome, stage tracks editorial workflow progress.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::recurrence::RecurrenceRule;

/// Publish-lifecycle status of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Draft,
    Scheduled,
    PendingApproval,
    Approved,
    Publishing,
    Published,
    Failed,
    Cancelled,
}

impl ContentStatus {
    /// Terminal statuses never re-enter the queue on their own. A failed
    /// schedule can only be retried back to `Scheduled` by explicit
    /// operator action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published | Self::Cancelled | Self::Failed)
    }
}

impl std::fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Editorial workflow stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Creation,
    Review,
    Editing,
    Approval,
    Scheduling,
    Publishing,
    Completed,
}

impl WorkflowStage {
    pub const ALL: [WorkflowStage; 7] = [
        Self::Creation,
        Self::Review,
        Self::Editing,
        Self::Approval,
        Self::Scheduling,
        Self::Publishing,
        Self::Completed,
    ];
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Creation => "creation",
            Self::Review => "review",
            Self::Editing => "editing",
            Self::Approval => "approval",
            Self::Scheduling => "scheduling",
            Self::Publishing => "publishing",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Queue tie-breaker urgency.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// One level more urgent, saturating at `Critical`.
    pub fn bumped(&self) -> Priority {
        match self {
            Self::Low => Self::Normal,
            Self::Normal => Self::High,
            Self::High => Self::Critical,
            Self::Critical => Self::Critical,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// One unit of content committed to a future publish action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledContent {
    /// Unique schedule ID.
    pub id: String,
    /// Reference to the underlying content record.
    pub content_id: String,
    /// Human-readable title, shown on calendar events.
    pub title: String,
    pub status: ContentStatus,
    pub current_stage: WorkflowStage,
    /// When the schedule entered its current stage. Drives time-elapsed
    /// guards and timeout escalation.
    pub stage_entered_at: DateTime<Utc>,
    /// Target destinations. Opaque to the core — the publish collaborator
    /// understands them. Must be non-empty for any status beyond draft.
    pub platforms: Vec<String>,
    /// Instant the schedule becomes eligible for dequeue. Mutable until the
    /// status reaches `publishing`.
    pub scheduled_at: DateTime<Utc>,
    /// Slot length used by conflict detection.
    pub duration_minutes: i64,
    pub priority: Priority,
    /// Optional rule generating sibling occurrences.
    pub recurrence: Option<RecurrenceRule>,
    /// Set on generated recurrence children. A parent is never itself a child.
    pub parent_id: Option<String>,
    /// Governing workflow. None = the built-in editorial workflow.
    pub workflow_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledContent {
    /// Create a schedule in `draft`.
    pub fn draft(content_id: &str, title: &str, scheduled_at: DateTime<Utc>) -> Self {
        Self::new(content_id, title, scheduled_at, ContentStatus::Draft, WorkflowStage::Creation)
    }

    /// Create a schedule directly in `scheduled`.
    pub fn scheduled(content_id: &str, title: &str, scheduled_at: DateTime<Utc>) -> Self {
        Self::new(
            content_id,
            title,
            scheduled_at,
            ContentStatus::Scheduled,
            WorkflowStage::Scheduling,
        )
    }

    fn new(
        content_id: &str,
        title: &str,
        scheduled_at: DateTime<Utc>,
        status: ContentStatus,
        stage: WorkflowStage,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("sched-{}", uuid::Uuid::new_v4()),
            content_id: content_id.to_string(),
            title: title.to_string(),
            status,
            current_stage: stage,
            stage_entered_at: now,
            platforms: Vec::new(),
            scheduled_at,
            duration_minutes: 60,
            priority: Priority::Normal,
            recurrence: None,
            parent_id: None,
            workflow_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Half-open occupancy interval `[start, start + duration)`.
    pub fn interval(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            self.scheduled_at,
            self.scheduled_at + Duration::minutes(self.duration_minutes.max(0)),
        )
    }

    /// Whether the schedule can still be moved on the calendar.
    pub fn is_editable(&self) -> bool {
        !matches!(
            self.status,
            ContentStatus::Publishing | ContentStatus::Published | ContentStatus::Cancelled
        )
    }
}

/// Append-only audit event for one schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub schedule_id: String,
    pub at: DateTime<Utc>,
    pub event: TimelineEventKind,
}

/// Closed set of timeline payload shapes the core understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineEventKind {
    Created { status: ContentStatus },
    Rescheduled {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    StageChanged {
        from: WorkflowStage,
        to: WorkflowStage,
        actor: String,
        comment: Option<String>,
    },
    PlatformPublished { platform: String, url: Option<String> },
    PlatformFailed { platform: String, error: String },
    Published,
    Failed,
    Cancelled,
    Retried { platform: String },
}

impl TimelineEvent {
    pub fn now(schedule_id: &str, event: TimelineEventKind) -> Self {
        Self {
            schedule_id: schedule_id.to_string(),
            at: Utc::now(),
            event,
        }
    }
}
