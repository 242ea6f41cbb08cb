//! Recurrence rules and lazy occurrence expansion.
//!
//! Occurrences are generated on demand as an iterator bounded by the rule's
//! end date, count, and exception dates — never materialized eagerly. The
//! calendar projector and the store both drive the same iterator.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// How often a schedule repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

/// A recurrence rule attached to a parent `ScheduledContent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    /// Every N days/weeks/months (minimum 1).
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Maximum number of occurrences, counting the parent's own slot.
    #[serde(default)]
    pub count: Option<u32>,
    /// No occurrence is generated at or after this instant.
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Weekly filter: only these weekdays fire. Empty = same weekday as start.
    #[serde(default)]
    pub weekdays: Vec<Weekday>,
    /// Monthly filter: only these days of month fire. Empty = same day as start.
    #[serde(default)]
    pub monthdays: Vec<u32>,
    /// Dates skipped entirely (drag-rescheduled or deleted occurrences).
    #[serde(default)]
    pub exceptions: Vec<NaiveDate>,
}

fn default_interval() -> u32 {
    1
}

impl RecurrenceRule {
    /// Iterate occurrences starting at `start` (inclusive).
    pub fn occurrences(&self, start: DateTime<Utc>) -> Occurrences<'_> {
        Occurrences {
            rule: self,
            start,
            cursor: start,
            emitted: 0,
            scanned: 0,
        }
    }

    fn matches(&self, start: DateTime<Utc>, candidate: DateTime<Utc>) -> bool {
        match self.frequency {
            Frequency::Daily => {
                let days = (candidate.date_naive() - start.date_naive()).num_days();
                days % self.interval.max(1) as i64 == 0
            }
            Frequency::Weekly => {
                let weeks = (candidate.date_naive() - start.date_naive()).num_days() / 7;
                if weeks % self.interval.max(1) as i64 != 0 {
                    return false;
                }
                if self.weekdays.is_empty() {
                    candidate.weekday() == start.weekday()
                } else {
                    self.weekdays.contains(&candidate.weekday())
                }
            }
            Frequency::Monthly => {
                let months = (candidate.year() - start.year()) * 12
                    + (candidate.month() as i32 - start.month() as i32);
                if months % self.interval.max(1) as i32 != 0 {
                    return false;
                }
                if self.monthdays.is_empty() {
                    candidate.day() == start.day()
                } else {
                    self.monthdays.contains(&candidate.day())
                }
            }
        }
    }
}

/// Hard cap on the day-by-day scan so a degenerate rule cannot spin forever.
const MAX_SCAN_DAYS: u32 = 366 * 5;

/// Lazy occurrence iterator. Yields the start instant of each occurrence,
/// beginning with the parent's own slot.
pub struct Occurrences<'a> {
    rule: &'a RecurrenceRule,
    start: DateTime<Utc>,
    cursor: DateTime<Utc>,
    emitted: u32,
    scanned: u32,
}

impl Iterator for Occurrences<'_> {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<DateTime<Utc>> {
        loop {
            if let Some(count) = self.rule.count
                && self.emitted >= count
            {
                return None;
            }
            if self.scanned > MAX_SCAN_DAYS {
                return None;
            }

            let candidate = self.cursor;
            if let Some(end) = self.rule.end_date
                && candidate >= end
            {
                return None;
            }

            self.cursor += Duration::days(1);
            self.scanned += 1;

            if self.rule.exceptions.contains(&candidate.date_naive()) {
                continue;
            }
            if self.rule.matches(self.start, candidate) {
                self.emitted += 1;
                return Some(candidate);
            }
        }
    }
}
