//! Workflow Engine — stage transitions driven by declarative rules.
//!
//! ## Architecture
//! ```text
//! execute_transition(schedule, to_stage, actor, roles)
//!   → find WorkflowRule (from, to)       — missing → InvalidTransition
//!   → evaluate guard condition           — false   → InvalidTransition
//!   → check required roles               — missing → InvalidTransition
//!   → apply stage change
//!   → collect NotificationRule matches + timeout escalations for the caller
//! ```
//!
//! Guard conditions are a closed set of predicate variants evaluated by a
//! match — no interpreted expression strings. Transitions are serialized
//! per schedule: a second attempt while one is in flight is rejected with
//! `ConcurrentTransition` rather than silently merged.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};
use crate::schedule::{ScheduledContent, WorkflowStage};

/// Guard predicate attached to a workflow rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    /// The acting user holds the given role.
    RoleIs { role: String },
    /// A schedule field equals the given value.
    FieldEquals { field: ConditionField, value: String },
    /// The schedule has sat in its current stage for at least N minutes.
    TimeElapsedAtLeast { minutes: i64 },
}

/// Fields a guard may inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    Status,
    Priority,
}

impl RuleCondition {
    pub fn evaluate(
        &self,
        schedule: &ScheduledContent,
        actor_roles: &[String],
        now: DateTime<Utc>,
    ) -> bool {
        match self {
            Self::RoleIs { role } => actor_roles.iter().any(|r| r == role),
            Self::FieldEquals { field, value } => match field {
                ConditionField::Status => schedule.status.to_string() == *value,
                ConditionField::Priority => schedule.priority.to_string() == *value,
            },
            Self::TimeElapsedAtLeast { minutes } => {
                (now - schedule.stage_entered_at).num_minutes() >= *minutes
            }
        }
    }
}

/// An allowed transition between two stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRule {
    pub from: WorkflowStage,
    pub to: WorkflowStage,
    #[serde(default)]
    pub condition: Option<RuleCondition>,
    /// Actor must hold at least one of these. Empty = anyone.
    #[serde(default)]
    pub required_roles: Vec<String>,
    /// Evaluated opportunistically on every write to the owning schedule,
    /// without an explicit actor call.
    #[serde(default)]
    pub auto_transition: bool,
    /// Forced transition if no actor moves the schedule within this window
    /// after entering `from`.
    #[serde(default)]
    pub timeout_hours: Option<u32>,
}

impl WorkflowRule {
    pub fn new(from: WorkflowStage, to: WorkflowStage) -> Self {
        Self {
            from,
            to,
            condition: None,
            required_roles: Vec::new(),
            auto_transition: false,
            timeout_hours: None,
        }
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.required_roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }
}

/// Notification fired once per matching transition. Delivery is an external
/// collaborator — failures never roll back the transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRule {
    /// Fires when a schedule enters this stage.
    pub on_enter: WorkflowStage,
    pub recipients: Vec<String>,
    pub channels: Vec<String>,
    pub template_id: String,
}

/// A named, reusable stage set with transition and notification rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub stages: Vec<WorkflowStage>,
    pub rules: Vec<WorkflowRule>,
    #[serde(default)]
    pub notifications: Vec<NotificationRule>,
}

impl Workflow {
    /// The built-in editorial workflow used when a schedule names none.
    pub fn default_editorial() -> Self {
        Self {
            id: "wf-editorial".into(),
            name: "Editorial".into(),
            stages: WorkflowStage::ALL.to_vec(),
            rules: vec![
                WorkflowRule::new(WorkflowStage::Creation, WorkflowStage::Review),
                WorkflowRule::new(WorkflowStage::Review, WorkflowStage::Editing),
                WorkflowRule::new(WorkflowStage::Editing, WorkflowStage::Review),
                WorkflowRule::new(WorkflowStage::Review, WorkflowStage::Approval)
                    .with_roles(&["editor"]),
                WorkflowRule::new(WorkflowStage::Approval, WorkflowStage::Scheduling)
                    .with_roles(&["editor", "manager"]),
                WorkflowRule::new(WorkflowStage::Scheduling, WorkflowStage::Publishing),
            ],
            notifications: vec![NotificationRule {
                on_enter: WorkflowStage::Approval,
                recipients: vec!["editors".into()],
                channels: vec!["dashboard".into()],
                template_id: "approval-requested".into(),
            }],
        }
    }

    fn rule_for(&self, from: WorkflowStage, to: WorkflowStage) -> Option<&WorkflowRule> {
        self.rules.iter().find(|r| r.from == from && r.to == to)
    }

    /// Rules that arm a timeout when a schedule enters `stage`.
    pub fn timeout_rules_for(&self, stage: WorkflowStage) -> Vec<&WorkflowRule> {
        self.rules
            .iter()
            .filter(|r| r.from == stage && r.timeout_hours.is_some())
            .collect()
    }
}

/// What a successful transition asks the caller to do next.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub from: WorkflowStage,
    pub to: WorkflowStage,
    /// Notification rules matching the entered stage.
    pub notifications: Vec<NotificationRule>,
    /// Timeout escalations to arm: (target stage, hours).
    pub arm_timeouts: Vec<(WorkflowStage, u32)>,
}

/// Evaluates transition rules and serializes transitions per schedule.
pub struct WorkflowEngine {
    workflows: Vec<Workflow>,
    in_flight: HashSet<String>,
}

impl WorkflowEngine {
    pub fn new() -> Self {
        Self {
            workflows: vec![Workflow::default_editorial()],
            in_flight: HashSet::new(),
        }
    }

    pub fn workflows(&self) -> &[Workflow] {
        &self.workflows
    }

    pub fn add_workflow(&mut self, workflow: Workflow) {
        self.workflows.retain(|w| w.id != workflow.id);
        self.workflows.push(workflow);
    }

    /// Resolve the workflow governing a schedule (None = built-in).
    pub fn workflow_for(&self, schedule: &ScheduledContent) -> Result<&Workflow> {
        match &schedule.workflow_id {
            Some(id) => self
                .workflows
                .iter()
                .find(|w| w.id == *id)
                .ok_or_else(|| SchedulerError::NotFound(format!("workflow {id}"))),
            None => Ok(&self.workflows[0]),
        }
    }

    /// Mark a transition as in flight. A second mark for the same schedule
    /// is rejected with `ConcurrentTransition`.
    pub fn begin_transition(&mut self, schedule_id: &str) -> Result<()> {
        if !self.in_flight.insert(schedule_id.to_string()) {
            return Err(SchedulerError::ConcurrentTransition(schedule_id.into()));
        }
        Ok(())
    }

    pub fn end_transition(&mut self, schedule_id: &str) {
        self.in_flight.remove(schedule_id);
    }

    /// Apply an actor-driven transition. Mutates the schedule's stage on
    /// success and reports the notifications/timeouts to fire.
    pub fn execute_transition(
        &self,
        schedule: &mut ScheduledContent,
        to: WorkflowStage,
        actor_roles: &[String],
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        // `completed` is reserved for the queue processor confirming a
        // successful publish.
        if to == WorkflowStage::Completed {
            return Err(SchedulerError::InvalidTransition {
                from: schedule.current_stage,
                to,
                reason: "completed is only entered by the queue processor".into(),
            });
        }
        let workflow = self.workflow_for(schedule)?;
        let from = schedule.current_stage;

        let Some(rule) = workflow.rule_for(from, to) else {
            return Err(SchedulerError::InvalidTransition {
                from,
                to,
                reason: format!("no rule in workflow '{}'", workflow.name),
            });
        };

        if !rule.required_roles.is_empty()
            && !rule.required_roles.iter().any(|r| actor_roles.contains(r))
        {
            return Err(SchedulerError::InvalidTransition {
                from,
                to,
                reason: format!("requires one of roles: {}", rule.required_roles.join(", ")),
            });
        }

        if let Some(cond) = &rule.condition
            && !cond.evaluate(schedule, actor_roles, now)
        {
            return Err(SchedulerError::InvalidTransition {
                from,
                to,
                reason: "guard condition evaluated false".into(),
            });
        }

        Ok(self.apply(schedule, workflow, from, to, now))
    }

    /// First auto-flagged rule from the current stage whose guard passes.
    pub fn auto_candidate(
        &self,
        schedule: &ScheduledContent,
        now: DateTime<Utc>,
    ) -> Option<WorkflowStage> {
        let workflow = self.workflow_for(schedule).ok()?;
        workflow
            .rules
            .iter()
            .filter(|r| r.auto_transition && r.from == schedule.current_stage)
            .find(|r| {
                r.required_roles.is_empty()
                    && r.condition
                        .as_ref()
                        .is_none_or(|c| c.evaluate(schedule, &[], now))
            })
            .map(|r| r.to)
    }

    /// Forced transition used by timeout escalation and the queue processor.
    /// Skips rule lookup — the caller already holds the authority.
    pub fn force_transition(
        &self,
        schedule: &mut ScheduledContent,
        to: WorkflowStage,
        now: DateTime<Utc>,
    ) -> TransitionOutcome {
        let workflow = self
            .workflow_for(schedule)
            .unwrap_or_else(|_| &self.workflows[0]);
        let from = schedule.current_stage;
        self.apply(schedule, workflow, from, to, now)
    }

    fn apply(
        &self,
        schedule: &mut ScheduledContent,
        workflow: &Workflow,
        from: WorkflowStage,
        to: WorkflowStage,
        now: DateTime<Utc>,
    ) -> TransitionOutcome {
        schedule.current_stage = to;
        schedule.stage_entered_at = now;
        schedule.updated_at = now;
        tracing::info!("Workflow: '{}' moved {} -> {}", schedule.title, from, to);

        TransitionOutcome {
            from,
            to,
            notifications: workflow
                .notifications
                .iter()
                .filter(|n| n.on_enter == to)
                .cloned()
                .collect(),
            arm_timeouts: workflow
                .timeout_rules_for(to)
                .into_iter()
                .filter_map(|r| r.timeout_hours.map(|h| (r.to, h)))
                .collect(),
        }
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{ContentStatus, Priority};

    fn schedule_at(stage: WorkflowStage) -> ScheduledContent {
        let mut s = ScheduledContent::draft("c1", "Post", Utc::now());
        s.platforms = vec!["website".into()];
        s.current_stage = stage;
        s
    }

    #[test]
    fn test_allowed_transition() {
        let engine = WorkflowEngine::new();
        let mut s = schedule_at(WorkflowStage::Creation);
        let outcome = engine
            .execute_transition(&mut s, WorkflowStage::Review, &[], Utc::now())
            .unwrap();
        assert_eq!(outcome.to, WorkflowStage::Review);
        assert_eq!(s.current_stage, WorkflowStage::Review);
    }

    #[test]
    fn test_missing_rule_is_invalid_transition() {
        let engine = WorkflowEngine::new();
        let mut s = schedule_at(WorkflowStage::Review);
        // review -> scheduling has no rule in the editorial workflow.
        let err = engine
            .execute_transition(&mut s, WorkflowStage::Scheduling, &[], Utc::now())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTransition { .. }));
        assert_eq!(s.current_stage, WorkflowStage::Review);
    }

    #[test]
    fn test_role_check_enforced() {
        let engine = WorkflowEngine::new();
        let mut s = schedule_at(WorkflowStage::Review);
        let err = engine
            .execute_transition(&mut s, WorkflowStage::Approval, &["writer".into()], Utc::now())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTransition { .. }));

        engine
            .execute_transition(&mut s, WorkflowStage::Approval, &["editor".into()], Utc::now())
            .unwrap();
        assert_eq!(s.current_stage, WorkflowStage::Approval);
    }

    #[test]
    fn test_completed_rejected_for_actors() {
        let engine = WorkflowEngine::new();
        let mut s = schedule_at(WorkflowStage::Publishing);
        let err = engine
            .execute_transition(&mut s, WorkflowStage::Completed, &["admin".into()], Utc::now())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTransition { .. }));
    }

    #[test]
    fn test_guard_condition() {
        let mut wf = Workflow::default_editorial();
        wf.id = "wf-guarded".into();
        wf.rules.push(WorkflowRule {
            from: WorkflowStage::Creation,
            to: WorkflowStage::Approval,
            condition: Some(RuleCondition::FieldEquals {
                field: ConditionField::Priority,
                value: "critical".into(),
            }),
            required_roles: vec![],
            auto_transition: false,
            timeout_hours: None,
        });
        let mut engine = WorkflowEngine::new();
        engine.add_workflow(wf);

        let mut s = schedule_at(WorkflowStage::Creation);
        s.workflow_id = Some("wf-guarded".into());
        let err = engine
            .execute_transition(&mut s, WorkflowStage::Approval, &[], Utc::now())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTransition { .. }));

        s.priority = Priority::Critical;
        engine
            .execute_transition(&mut s, WorkflowStage::Approval, &[], Utc::now())
            .unwrap();
    }

    #[test]
    fn test_concurrent_transition_guard() {
        let mut engine = WorkflowEngine::new();
        engine.begin_transition("s1").unwrap();
        let err = engine.begin_transition("s1").unwrap_err();
        assert!(matches!(err, SchedulerError::ConcurrentTransition(_)));
        engine.end_transition("s1");
        engine.begin_transition("s1").unwrap();
    }

    #[test]
    fn test_auto_candidate() {
        let mut wf = Workflow::default_editorial();
        wf.id = "wf-auto".into();
        wf.rules.push(WorkflowRule {
            from: WorkflowStage::Creation,
            to: WorkflowStage::Review,
            condition: Some(RuleCondition::FieldEquals {
                field: ConditionField::Status,
                value: "scheduled".into(),
            }),
            required_roles: vec![],
            auto_transition: true,
            timeout_hours: None,
        });
        let mut engine = WorkflowEngine::new();
        engine.add_workflow(wf);

        let mut s = schedule_at(WorkflowStage::Creation);
        s.workflow_id = Some("wf-auto".into());
        assert!(engine.auto_candidate(&s, Utc::now()).is_none());

        s.status = ContentStatus::Scheduled;
        assert_eq!(engine.auto_candidate(&s, Utc::now()), Some(WorkflowStage::Review));
    }

    #[test]
    fn test_time_elapsed_condition() {
        let mut s = schedule_at(WorkflowStage::Review);
        s.stage_entered_at = Utc::now() - chrono::Duration::minutes(90);
        let cond = RuleCondition::TimeElapsedAtLeast { minutes: 60 };
        assert!(cond.evaluate(&s, &[], Utc::now()));
        let cond = RuleCondition::TimeElapsedAtLeast { minutes: 120 };
        assert!(!cond.evaluate(&s, &[], Utc::now()));
    }
}
