//! Read-only scheduling analytics — rollups over the entity set and queue.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::queue::{QueueItem, QueueItemKind, QueueStatus};
use crate::schedule::{ContentStatus, ScheduledContent};

/// Per-platform publish performance.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformStats {
    pub platform: String,
    pub completed: usize,
    pub failed: usize,
    pub success_rate: f64,
}

/// Aggregate scheduling performance.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulingAnalytics {
    pub total_schedules: usize,
    pub published: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub pending: usize,
    /// published / (published + failed).
    pub success_rate: f64,
    pub per_platform: Vec<PlatformStats>,
    pub total_publish_attempts: u64,
    pub avg_attempts_per_item: f64,
}

/// Compute rollups from a consistent snapshot.
pub fn compute(schedules: &[ScheduledContent], items: &[QueueItem]) -> SchedulingAnalytics {
    let published = schedules
        .iter()
        .filter(|s| s.status == ContentStatus::Published)
        .count();
    let failed = schedules
        .iter()
        .filter(|s| s.status == ContentStatus::Failed)
        .count();
    let cancelled = schedules
        .iter()
        .filter(|s| s.status == ContentStatus::Cancelled)
        .count();
    let settled = published + failed;
    let success_rate = if settled > 0 {
        published as f64 / settled as f64
    } else {
        0.0
    };

    let mut per_platform: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    let mut total_attempts = 0u64;
    let mut publish_items = 0usize;
    for item in items {
        if item.kind != QueueItemKind::Publish {
            continue;
        }
        publish_items += 1;
        total_attempts += item.attempts as u64;
        let entry = per_platform.entry(item.platform.clone()).or_default();
        match item.status {
            QueueStatus::Completed => entry.0 += 1,
            QueueStatus::Failed => entry.1 += 1,
            _ => {}
        }
    }

    let per_platform = per_platform
        .into_iter()
        .map(|(platform, (completed, failed))| {
            let settled = completed + failed;
            PlatformStats {
                platform,
                completed,
                failed,
                success_rate: if settled > 0 {
                    completed as f64 / settled as f64
                } else {
                    0.0
                },
            }
        })
        .collect();

    SchedulingAnalytics {
        total_schedules: schedules.len(),
        published,
        failed,
        cancelled,
        pending: schedules.len() - published - failed - cancelled,
        success_rate,
        per_platform,
        total_publish_attempts: total_attempts,
        avg_attempts_per_item: if publish_items > 0 {
            total_attempts as f64 / publish_items as f64
        } else {
            0.0
        },
    }
}
