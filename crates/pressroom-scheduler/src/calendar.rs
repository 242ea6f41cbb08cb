//! Calendar Projector — pure, stateless view projection.
//!
//! `CalendarEvent`s are regenerated on every read and never authoritative:
//! drag-reschedules are translated back into entity updates, not view
//! mutations. Recurrence expansion happens here, and conflicts are computed
//! over the projected set so expanded occurrences are checked individually.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schedule::{ContentStatus, ScheduledContent};

/// Requested calendar layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarView {
    Month,
    Week,
    Day,
    List,
}

/// Display-oriented projection of one schedule occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// `<schedule_id>` for the base slot, `<schedule_id>@<unix>` for
    /// recurrence-expanded occurrences.
    pub id: String,
    pub schedule_id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub editable: bool,
    pub platforms: Vec<String>,
    pub status: ContentStatus,
    /// Event ids colliding with this one in time and platform.
    pub conflicts: Vec<String>,
}

/// Project the entity set into view events for `[range_start, range_end)`.
/// Month view widens the range to full boundary weeks so a grid can render.
pub fn project(
    schedules: &[ScheduledContent],
    view: CalendarView,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
) -> Vec<CalendarEvent> {
    let (start, end) = match view {
        CalendarView::Month => month_grid_bounds(range_start, range_end),
        _ => (range_start, range_end),
    };

    let mut events = Vec::new();
    for schedule in schedules {
        match &schedule.recurrence {
            Some(rule) => {
                for occurrence in rule.occurrences(schedule.scheduled_at) {
                    if occurrence >= end {
                        break;
                    }
                    if occurrence < start {
                        continue;
                    }
                    let id = if occurrence == schedule.scheduled_at {
                        schedule.id.clone()
                    } else {
                        format!("{}@{}", schedule.id, occurrence.timestamp())
                    };
                    events.push(event_for(schedule, &id, occurrence));
                }
            }
            None => {
                if schedule.scheduled_at >= start && schedule.scheduled_at < end {
                    events.push(event_for(schedule, &schedule.id, schedule.scheduled_at));
                }
            }
        }
    }

    annotate_conflicts(&mut events);
    events.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
    events
}

fn event_for(schedule: &ScheduledContent, id: &str, start: DateTime<Utc>) -> CalendarEvent {
    let minutes = schedule.duration_minutes.max(0);
    CalendarEvent {
        id: id.to_string(),
        schedule_id: schedule.id.clone(),
        title: schedule.title.clone(),
        start_time: start,
        end_time: Some(start + Duration::minutes(minutes)),
        all_day: minutes >= 24 * 60,
        editable: schedule.is_editable(),
        platforms: schedule.platforms.clone(),
        status: schedule.status,
        conflicts: Vec::new(),
    }
}

/// Pairwise conflict pass over the projected set: half-open interval overlap
/// plus a shared platform.
fn annotate_conflicts(events: &mut [CalendarEvent]) {
    let n = events.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let (a, b) = (&events[i], &events[j]);
            if a.schedule_id == b.schedule_id {
                continue;
            }
            let a_end = a.end_time.unwrap_or(a.start_time);
            let b_end = b.end_time.unwrap_or(b.start_time);
            let overlap = a.start_time < b_end && b.start_time < a_end;
            let shared = a.platforms.iter().any(|p| b.platforms.contains(p));
            if overlap && shared {
                let (a_id, b_id) = (a.id.clone(), b.id.clone());
                events[i].conflicts.push(b_id);
                events[j].conflicts.push(a_id);
            }
        }
    }
}

/// Expand to midnight on the Monday of the first week and midnight after the
/// Sunday of the last week. Bounds are computed on date boundaries so the
/// range's time-of-day cannot leak grid days into the following week.
fn month_grid_bounds(
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let lead = range_start.weekday().num_days_from_monday() as i64;
    let first_day = range_start.date_naive() - Duration::days(lead);
    let trail = 6 - range_end.weekday().num_days_from_monday() as i64;
    let last_day = range_end.date_naive() + Duration::days(trail);
    (
        first_day.and_time(NaiveTime::MIN).and_utc(),
        (last_day + Duration::days(1)).and_time(NaiveTime::MIN).and_utc(),
    )
}

/// How a drag-reschedule maps back onto the entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RescheduleAction {
    /// Move the schedule itself.
    MoveSchedule { new_start: DateTime<Utc> },
    /// A recurrence occurrence moved: add an exception for the old date and
    /// spawn a one-off child at the new time.
    SplitOccurrence {
        occurrence: DateTime<Utc>,
        new_start: DateTime<Utc>,
    },
}

/// Translate an event drag into an entity update. Never mutates the view.
pub fn plan_reschedule(
    schedule: &ScheduledContent,
    event_id: &str,
    new_start: DateTime<Utc>,
) -> Option<RescheduleAction> {
    match event_id.split_once('@') {
        Some((sid, ts)) if sid == schedule.id => {
            let unix: i64 = ts.parse().ok()?;
            let occurrence = DateTime::<Utc>::from_timestamp(unix, 0)?;
            Some(RescheduleAction::SplitOccurrence { occurrence, new_start })
        }
        None if event_id == schedule.id => Some(RescheduleAction::MoveSchedule { new_start }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::{Frequency, RecurrenceRule};
    use chrono::TimeZone;

    fn schedule(title: &str, at: DateTime<Utc>, platforms: &[&str]) -> ScheduledContent {
        let mut s = ScheduledContent::scheduled(&format!("content-{title}"), title, at);
        s.platforms = platforms.iter().map(|p| p.to_string()).collect();
        s
    }

    fn t0() -> DateTime<Utc> {
        // Wednesday 2026-04-01.
        Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_week_view_filters_range() {
        let inside = schedule("in", t0(), &["web"]);
        let outside = schedule("out", t0() + Duration::days(10), &["web"]);
        let events = project(
            &[inside, outside],
            CalendarView::Week,
            t0() - Duration::days(1),
            t0() + Duration::days(6),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "in");
    }

    #[test]
    fn test_month_view_includes_boundary_week_days() {
        // March 30 is the Monday of the week containing April 1.
        let leading = schedule("lead", Utc.with_ymd_and_hms(2026, 3, 30, 9, 0, 0).unwrap(), &["web"]);
        let events = project(
            &[leading],
            CalendarView::Month,
            Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 4, 30, 23, 59, 59).unwrap(),
        );
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_month_grid_ends_at_date_boundary() {
        // April 2026 ends on a Thursday, so the grid runs through Sunday
        // May 3. A 23:59:59 range end must not pull in Monday May 4.
        let trailing = schedule("sun", Utc.with_ymd_and_hms(2026, 5, 3, 20, 0, 0).unwrap(), &["web"]);
        let next_week = schedule("mon", Utc.with_ymd_and_hms(2026, 5, 4, 0, 30, 0).unwrap(), &["web"]);
        let events = project(
            &[trailing, next_week],
            CalendarView::Month,
            Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 4, 30, 23, 59, 59).unwrap(),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "sun");
    }

    #[test]
    fn test_recurrence_expands_into_distinct_events() {
        let mut s = schedule("daily", t0(), &["web"]);
        s.recurrence = Some(RecurrenceRule {
            frequency: Frequency::Daily,
            interval: 1,
            count: Some(3),
            end_date: None,
            weekdays: vec![],
            monthdays: vec![],
            exceptions: vec![],
        });
        let events = project(
            std::slice::from_ref(&s),
            CalendarView::List,
            t0() - Duration::days(1),
            t0() + Duration::days(10),
        );
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.schedule_id == s.id));
        assert_eq!(events[0].id, s.id);
        assert!(events[1].id.contains('@'));
        assert_eq!(events[1].start_time, t0() + Duration::days(1));
    }

    #[test]
    fn test_expanded_occurrences_checked_for_conflicts() {
        let mut daily = schedule("daily", t0(), &["twitter"]);
        daily.recurrence = Some(RecurrenceRule {
            frequency: Frequency::Daily,
            interval: 1,
            count: Some(5),
            end_date: None,
            weekdays: vec![],
            monthdays: vec![],
            exceptions: vec![],
        });
        // One-off colliding with the third occurrence, not the first.
        let one_off = schedule("clash", t0() + Duration::days(2), &["twitter"]);

        let events = project(
            &[daily, one_off],
            CalendarView::List,
            t0() - Duration::days(1),
            t0() + Duration::days(10),
        );
        let clash = events.iter().find(|e| e.title == "clash").unwrap();
        assert_eq!(clash.conflicts.len(), 1);
        assert!(clash.conflicts[0].contains('@'));
        let first = events.iter().find(|e| !e.id.contains('@') && e.title == "daily").unwrap();
        assert!(first.conflicts.is_empty());
    }

    #[test]
    fn test_plan_reschedule_base_event() {
        let s = schedule("post", t0(), &["web"]);
        let action = plan_reschedule(&s, &s.id, t0() + Duration::hours(2)).unwrap();
        assert_eq!(
            action,
            RescheduleAction::MoveSchedule {
                new_start: t0() + Duration::hours(2)
            }
        );
    }

    #[test]
    fn test_plan_reschedule_occurrence_splits() {
        let s = schedule("post", t0(), &["web"]);
        let occurrence = t0() + Duration::days(3);
        let event_id = format!("{}@{}", s.id, occurrence.timestamp());
        let action = plan_reschedule(&s, &event_id, occurrence + Duration::hours(1)).unwrap();
        assert_eq!(
            action,
            RescheduleAction::SplitOccurrence {
                occurrence,
                new_start: occurrence + Duration::hours(1)
            }
        );
    }

    #[test]
    fn test_non_editable_once_publishing() {
        let mut s = schedule("hot", t0(), &["web"]);
        s.status = ContentStatus::Publishing;
        let events = project(
            std::slice::from_ref(&s),
            CalendarView::Day,
            t0() - Duration::hours(1),
            t0() + Duration::hours(1),
        );
        assert!(!events[0].editable);
    }
}
