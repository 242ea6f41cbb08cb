//! Conflict detection over time, platform, and duration dimensions.
//!
//! Intervals are half-open `[start, start + duration)` so back-to-back
//! schedules never falsely conflict. The check is advisory — schedule
//! creation blocks on `High` severity by default, everything else is a
//! warning the caller may override.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::schedule::{ContentStatus, ScheduledContent};

/// Assumed slot length when the caller gives no duration.
pub const DEFAULT_DURATION_MINUTES: i64 = 60;

/// How strongly two schedules collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

impl ConflictSeverity {
    /// Penalty weight used by the timing optimizer.
    pub fn penalty(&self) -> f64 {
        match self {
            Self::High => 1.0,
            Self::Medium => 0.5,
            Self::Low => 0.1,
        }
    }
}

impl std::fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{s}")
    }
}

/// One detected conflict between a candidate slot and an existing schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictData {
    pub severity: ConflictSeverity,
    pub description: String,
    /// Schedule IDs colliding with the candidate.
    pub affected_items: Vec<String>,
    /// Platforms shared between the candidate and the affected schedule.
    pub platforms: Vec<String>,
}

/// Report every schedule — other than cancelled or failed ones — whose
/// interval intersects the candidate interval and whose platform set
/// intersects the candidate's. Published schedules still occupy their
/// slot, so they keep counting.
///
/// `exclude_id` lets update paths skip the schedule being moved.
pub fn check_conflicts(
    schedules: &[ScheduledContent],
    candidate_time: DateTime<Utc>,
    duration_minutes: Option<i64>,
    platforms: &[String],
    exclude_id: Option<&str>,
) -> Vec<ConflictData> {
    let duration = duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES).max(0);
    let cand_start = candidate_time;
    let cand_end = candidate_time + Duration::minutes(duration);
    let mut conflicts = Vec::new();

    for other in schedules {
        if matches!(other.status, ContentStatus::Cancelled | ContentStatus::Failed) {
            continue;
        }
        if exclude_id.is_some_and(|id| id == other.id) {
            continue;
        }

        let shared: Vec<String> = other
            .platforms
            .iter()
            .filter(|p| platforms.contains(p))
            .cloned()
            .collect();
        if shared.is_empty() {
            continue;
        }

        let (o_start, o_end) = other.interval();
        // Half-open intersection.
        let overlap_start = cand_start.max(o_start);
        let overlap_end = cand_end.min(o_end);
        if overlap_start >= overlap_end {
            continue;
        }

        let overlap = (overlap_end - overlap_start).num_minutes();
        let shorter = duration.min(other.duration_minutes).max(1);
        let ratio = overlap as f64 / shorter as f64;

        let severity = if ratio >= 0.99 {
            ConflictSeverity::High
        } else if ratio >= 0.5 {
            ConflictSeverity::Medium
        } else {
            ConflictSeverity::Low
        };

        conflicts.push(ConflictData {
            severity,
            description: format!(
                "'{}' occupies {} of the candidate slot on {}",
                other.title,
                if ratio >= 0.99 { "all".to_string() } else { format!("{overlap}min") },
                shared.join(", "),
            ),
            affected_items: vec![other.id.clone()],
            platforms: shared,
        });
    }

    // Worst first, then by id so identical inputs rank identically.
    conflicts.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.affected_items.cmp(&b.affected_items))
    });
    conflicts
}

/// Worst severity for a candidate slot, if any conflict exists.
pub fn worst_severity(
    schedules: &[ScheduledContent],
    candidate_time: DateTime<Utc>,
    duration_minutes: Option<i64>,
    platforms: &[String],
) -> Option<ConflictSeverity> {
    check_conflicts(schedules, candidate_time, duration_minutes, platforms, None)
        .first()
        .map(|c| c.severity)
}
