//! Pressroom scheduling core — content scheduling and publishing
//! orchestration.
//!
//! ## Architecture
//! ```text
//! PublishingEngine  (single writer, behind Arc<Mutex<_>>)
//!   ├── schedules: Vec<ScheduledContent>     — canonical entity set
//!   ├── WorkflowEngine                       — rule-driven stage transitions
//!   ├── PublishingQueue                      — durable per-platform work items
//!   ├── NotifyRouter + NotificationSink      — fire-and-forget dispatch
//!   └── PressroomDb (rusqlite)               — write-through persistence
//!
//! process_once(engine, now)                  — one queue poll cycle:
//!   lock → begin_due() → unlock → await Publisher calls → lock → apply
//!
//! conflict / optimizer / calendar / analytics — pure functions over
//! snapshots; they never hold state of their own.
//! ```
//!
//! Two independent axes describe every schedule: `ContentStatus` tracks the
//! publish-lifecycle outcome, `WorkflowStage` tracks editorial progress.
//! The queue processor is the only writer of `publishing`, `published`,
//! `failed`, and the `completed` stage.

pub mod analytics;
pub mod calendar;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod notify;
pub mod optimizer;
pub mod persistence;
pub mod publish;
pub mod queue;
pub mod recurrence;
pub mod schedule;
pub mod workflow;

pub use engine::{
    process_once, spawn_processor, BulkOperation, CreateScheduleRequest, PublishingEngine,
    ScheduleOutcome, UpdateScheduleRequest,
};
pub use error::{Result, SchedulerError};
pub use schedule::{ContentStatus, Priority, ScheduledContent, WorkflowStage};
