//! Timing Optimizer — scores and ranks candidate publish times.
//!
//! ```text
//! score(t, p) = w1*audience(t, p) + w2*(1 - conflict_penalty(t, p))
//!             + w3*competitor_gap(t, p) + w4*seasonal(t)
//! ```
//!
//! Output is advisory only and strictly deterministic: identical inputs
//! always yield identical ranked output. Confidence reflects how much of
//! the weight mass is backed by real data — missing insight data lowers
//! confidence, it is never fabricated.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::conflict::{self, ConflictSeverity};
use crate::schedule::ScheduledContent;

/// Per-hour and per-weekday audience activity, each bucket in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudienceInsights {
    pub active_hours: [f64; 24],
    /// Monday-first weekday buckets.
    pub active_days: [f64; 7],
}

/// Competitor posting pressure per hour of day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitorData {
    /// Hours with little competing content — candidates get a bonus.
    pub quiet_hours: Vec<u32>,
    /// Oversaturated hours — candidates get penalized.
    pub busy_hours: Vec<u32>,
}

/// A trend window with an engagement multiplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonalWindow {
    pub label: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Bonus in [0, 1] applied while the window is active.
    pub bonus: f64,
}

/// Seasonal trend data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeasonalData {
    pub windows: Vec<SeasonalWindow>,
}

/// Which outcome the ranking should favor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMetric {
    Engagement,
    Reach,
    Conversions,
}

/// Scoring weights for the four terms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OptimizerWeights {
    pub audience: f64,
    pub conflict: f64,
    pub competitor: f64,
    pub seasonal: f64,
}

impl OptimizerWeights {
    /// Defaults `{0.4, 0.3, 0.2, 0.1}`, re-weighted per target metric.
    pub fn for_metric(metric: TargetMetric) -> Self {
        match metric {
            TargetMetric::Engagement => Self {
                audience: 0.4,
                conflict: 0.3,
                competitor: 0.2,
                seasonal: 0.1,
            },
            // Reach favors audience and competitor gaps over conflict
            // avoidance.
            TargetMetric::Reach => Self {
                audience: 0.45,
                conflict: 0.15,
                competitor: 0.3,
                seasonal: 0.1,
            },
            TargetMetric::Conversions => Self {
                audience: 0.35,
                conflict: 0.25,
                competitor: 0.2,
                seasonal: 0.2,
            },
        }
    }

    fn total(&self) -> f64 {
        self.audience + self.conflict + self.competitor + self.seasonal
    }
}

/// One scored candidate slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimalTime {
    pub at: DateTime<Utc>,
    pub platform: String,
    pub score: f64,
    pub expected_engagement: f64,
    pub expected_reach: f64,
    pub conflict_level: Option<ConflictSeverity>,
    /// Human-readable rationale built from the dominant scoring term.
    pub reasoning: String,
}

/// Ranked recommendation set. Ephemeral — recomputed on demand, never
/// persisted as ground truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingOptimization {
    pub content_id: String,
    pub target_metric: TargetMetric,
    pub candidates: Vec<OptimalTime>,
    /// Fraction of weight mass backed by non-empty data sources.
    pub confidence: f64,
    pub reasoning: Vec<String>,
}

/// Data sources feeding the optimizer, keyed by platform where relevant.
#[derive(Debug, Clone, Default)]
pub struct OptimizerData {
    pub audience: HashMap<String, AudienceInsights>,
    pub competitor: HashMap<String, CompetitorData>,
    pub seasonal: Option<SeasonalData>,
}

const CANDIDATES_RETURNED: usize = 10;

/// Score hourly slots across `range` for every requested platform and
/// return the top candidates, best first.
#[allow(clippy::too_many_arguments)]
pub fn optimize(
    schedules: &[ScheduledContent],
    content_id: &str,
    platforms: &[String],
    metric: TargetMetric,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    data: &OptimizerData,
) -> TimingOptimization {
    let weights = OptimizerWeights::for_metric(metric);
    let mut candidates = Vec::new();
    let mut reasoning = Vec::new();

    // Hourly slots, aligned to the top of the hour.
    let mut slot = range_start
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(range_start);
    if slot < range_start {
        slot += Duration::hours(1);
    }

    let mut slots = Vec::new();
    while slot < range_end {
        slots.push(slot);
        slot += Duration::hours(1);
    }

    for platform in platforms {
        let insights = data.audience.get(platform);
        let competitor = data.competitor.get(platform);
        for &t in &slots {
            candidates.push(score_slot(
                schedules, t, platform, weights, insights, competitor,
                data.seasonal.as_ref(),
            ));
        }
    }

    // Descending score; ties broken by time then platform so identical
    // inputs rank identically.
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.at.cmp(&b.at))
            .then_with(|| a.platform.cmp(&b.platform))
    });
    candidates.truncate(CANDIDATES_RETURNED);

    let has_audience = platforms.iter().any(|p| data.audience.contains_key(p));
    let has_competitor = platforms.iter().any(|p| data.competitor.contains_key(p));
    let has_seasonal = data
        .seasonal
        .as_ref()
        .is_some_and(|s| !s.windows.is_empty());

    // Conflict data is always derivable from the entity set; the other
    // terms count only when their source is present.
    let mut backed = weights.conflict;
    if has_audience {
        backed += weights.audience;
    } else {
        reasoning.push("no audience insights for requested platforms".into());
    }
    if has_competitor {
        backed += weights.competitor;
    } else {
        reasoning.push("no competitor data for requested platforms".into());
    }
    if has_seasonal {
        backed += weights.seasonal;
    } else {
        reasoning.push("no seasonal trend windows tracked".into());
    }
    let confidence = backed / weights.total();

    if let Some(best) = candidates.first() {
        reasoning.insert(
            0,
            format!(
                "best slot {} on {} scored {:.3}",
                best.at.format("%Y-%m-%d %H:%M UTC"),
                best.platform,
                best.score
            ),
        );
    }

    TimingOptimization {
        content_id: content_id.to_string(),
        target_metric: metric,
        candidates,
        confidence,
        reasoning,
    }
}

fn score_slot(
    schedules: &[ScheduledContent],
    t: DateTime<Utc>,
    platform: &str,
    weights: OptimizerWeights,
    insights: Option<&AudienceInsights>,
    competitor: Option<&CompetitorData>,
    seasonal: Option<&SeasonalData>,
) -> OptimalTime {
    let audience = insights.map_or(0.0, |i| {
        let hour = i.active_hours[t.hour() as usize].clamp(0.0, 1.0);
        let day = i.active_days[t.weekday().num_days_from_monday() as usize].clamp(0.0, 1.0);
        (hour + day) / 2.0
    });

    let severity = conflict::worst_severity(
        schedules,
        t,
        None,
        std::slice::from_ref(&platform.to_string()),
    );
    let conflict_penalty = severity.map_or(0.0, |s| s.penalty());

    let competitor_gap = competitor.map_or(0.0, |c| {
        if c.quiet_hours.contains(&t.hour()) {
            1.0
        } else if c.busy_hours.contains(&t.hour()) {
            -0.5
        } else {
            0.25
        }
    });

    let seasonal_bonus = seasonal.map_or(0.0, |s| {
        s.windows
            .iter()
            .filter(|w| t >= w.start && t < w.end)
            .map(|w| w.bonus.clamp(0.0, 1.0))
            .fold(0.0_f64, f64::max)
    });

    let terms = [
        ("audience activity", weights.audience * audience),
        ("conflict-free slot", weights.conflict * (1.0 - conflict_penalty)),
        ("competitor gap", weights.competitor * competitor_gap),
        ("seasonal trend", weights.seasonal * seasonal_bonus),
    ];
    let score: f64 = terms.iter().map(|(_, v)| v).sum();
    let dominant = terms
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(name, _)| *name)
        .unwrap_or("audience activity");

    let reasoning = match severity {
        Some(s) => format!("{dominant} dominates; {s} conflict at this slot"),
        None => format!("{dominant} dominates; no conflicts at this slot"),
    };

    OptimalTime {
        at: t,
        platform: platform.to_string(),
        score,
        expected_engagement: audience,
        expected_reach: (audience + competitor_gap.max(0.0)) / 2.0,
        conflict_level: severity,
        reasoning,
    }
}
