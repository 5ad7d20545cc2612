//! Flow definition types.
//!
//! A `FlowDefinition` is the tenant-authored automation graph: a set of steps
//! linked by `next_id` / `alt_next_id`, an entry step, and a trigger
//! descriptor. Definitions are authored and stored by the surrounding
//! application; the engine only reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Flow Definition
// ---------------------------------------------------------------------------

/// A tenant-scoped automation flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// UUIDv7 assigned by the authoring surface.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Human-readable flow name.
    pub name: String,
    /// Disabled flows accept no new enrollments and fire no timers.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Explicit entry step. Falls back to the first declared step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_step_id: Option<String>,
    /// Step graph.
    pub steps: Vec<StepDefinition>,
    /// How subjects are enrolled into this flow.
    pub trigger: TriggerDescriptor,
    /// Governs whether a subject may be enrolled more than once by a schedule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reenrollment: Option<ReenrollmentPolicy>,
    /// Last modification time, used by the scheduler to detect edits.
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl FlowDefinition {
    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// The id of the step a fresh run starts at.
    pub fn entry_step_id(&self) -> Option<&str> {
        self.entry_step_id
            .as_deref()
            .or_else(|| self.steps.first().map(|s| s.id.as_str()))
    }

    /// The schedule of a schedule-triggered flow.
    pub fn schedule(&self) -> Option<&ScheduleSpec> {
        match &self.trigger {
            TriggerDescriptor::Schedule { schedule, .. } => Some(schedule),
            _ => None,
        }
    }

    /// Enrollment criteria attached to the trigger, if any.
    pub fn criteria(&self) -> Option<&Value> {
        match &self.trigger {
            TriggerDescriptor::Event { criteria, .. }
            | TriggerDescriptor::Schedule { criteria, .. } => criteria.as_ref(),
            TriggerDescriptor::Manual {} => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A single node of the flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Author-assigned step id, unique within the flow.
    pub id: String,
    /// Step semantics.
    pub kind: StepKind,
    /// Kind-specific configuration (expression, action params, duration).
    #[serde(default)]
    pub config: Value,
    /// Successor (true branch for condition/branch steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_id: Option<String>,
    /// False-branch successor for condition/branch steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_next_id: Option<String>,
}

/// The kind of a step.
///
/// Kinds the engine does not know deserialize to `Unknown` so that a bad
/// definition fails the run that reaches it rather than the whole load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Condition,
    Branch,
    Action,
    Delay,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepKind::Condition => "condition",
            StepKind::Branch => "branch",
            StepKind::Action => "action",
            StepKind::Delay => "delay",
            StepKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// How a flow gets runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerDescriptor {
    /// Enrolled by the external event ingester when `event` happens.
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        criteria: Option<Value>,
    },
    /// Enrolled by the trigger scheduler.
    Schedule {
        schedule: ScheduleSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        criteria: Option<Value>,
        /// Opaque selector handed to the subject source.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audience: Option<Value>,
    },
    /// Only enrolled explicitly.
    Manual {},
}

impl TriggerDescriptor {
    /// Short label stored on runs (`event`, `schedule`, `manual`).
    pub fn label(&self) -> &'static str {
        match self {
            TriggerDescriptor::Event { .. } => "event",
            TriggerDescriptor::Schedule { .. } => "schedule",
            TriggerDescriptor::Manual {} => "manual",
        }
    }
}

/// Declarative schedule of a schedule trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Raw 5-field (or 6-field with seconds) cron expression.
    Cron { expression: String },
    /// Every day at `time` (`HH:MM`).
    Daily { time: String },
    /// On the given weekdays (0 = Sunday) at `time`.
    Weekly { time: String, weekdays: Vec<u8> },
    /// On `day_of_month` at `time`.
    Monthly { time: String, day_of_month: u8 },
    /// Every `minutes` minutes, independent of wall-clock alignment.
    Interval { minutes: u32 },
}

/// Whether a subject already enrolled may be enrolled again by a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReenrollmentPolicy {
    Allow,
    Disallow,
    Cooldown { minutes: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_flow() -> FlowDefinition {
        serde_json::from_value(json!({
            "id": Uuid::now_v7(),
            "tenant_id": Uuid::now_v7(),
            "name": "welcome",
            "steps": [
                { "id": "check", "kind": "condition", "config": { "path": "owner.email" }, "next_id": "mail" },
                { "id": "mail", "kind": "action", "config": { "action": "email.send" } }
            ],
            "trigger": {
                "type": "schedule",
                "schedule": { "kind": "weekly", "time": "14:30", "weekdays": [1, 3] }
            },
            "reenrollment": { "mode": "cooldown", "minutes": 60 },
            "updated_at": Utc::now()
        }))
        .unwrap()
    }

    #[test]
    fn test_flow_deserializes_with_defaults() {
        let flow = sample_flow();
        assert!(flow.enabled);
        assert_eq!(flow.entry_step_id(), Some("check"));
        assert_eq!(flow.steps[1].kind, StepKind::Action);
        assert_eq!(
            flow.reenrollment,
            Some(ReenrollmentPolicy::Cooldown { minutes: 60 })
        );
    }

    #[test]
    fn test_explicit_entry_step_wins() {
        let mut flow = sample_flow();
        flow.entry_step_id = Some("mail".to_string());
        assert_eq!(flow.entry_step_id(), Some("mail"));
    }

    #[test]
    fn test_unknown_step_kind_is_preserved_as_unknown() {
        let step: StepDefinition =
            serde_json::from_value(json!({ "id": "x", "kind": "teleport" })).unwrap();
        assert_eq!(step.kind, StepKind::Unknown);
    }

    #[test]
    fn test_schedule_accessor() {
        let flow = sample_flow();
        assert_eq!(
            flow.schedule(),
            Some(&ScheduleSpec::Weekly {
                time: "14:30".to_string(),
                weekdays: vec![1, 3]
            })
        );
        assert_eq!(flow.trigger.label(), "schedule");
    }

    #[test]
    fn test_event_trigger_has_no_schedule() {
        let trigger: TriggerDescriptor = serde_json::from_value(json!({
            "type": "event",
            "event": "owner.created",
            "criteria": { "path": "owner.email" }
        }))
        .unwrap();
        assert_eq!(trigger.label(), "event");
        assert!(matches!(trigger, TriggerDescriptor::Event { ref criteria, .. } if criteria.is_some()));
    }
}
