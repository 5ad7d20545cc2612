//! Run types: execution instances, their context document, and the run log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Current `RunContext` schema version.
pub const CONTEXT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

/// Lifecycle of a run. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("invalid run status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// FlowRun
// ---------------------------------------------------------------------------

/// One execution of a flow for one enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRun {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub flow_id: Uuid,
    /// How the run was created (`schedule`, `event`, `manual`).
    pub trigger_type: String,
    /// The enrolled subject (owner id, pet id, ...), when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    pub status: RunStatus,
    /// Step the run resumes at. `None` before the first step and after success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<String>,
    pub context: RunContext,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Versioned context document accumulated across a run's steps.
///
/// `payload`, `triggerType` and `actions` are the defined top-level keys;
/// anything else (e.g. fields merged by `record.update`) lives in `extra` and
/// is flattened into the same JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub trigger_type: String,
    #[serde(default)]
    pub actions: Vec<ActionLogEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_version() -> u32 {
    CONTEXT_VERSION
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            version: CONTEXT_VERSION,
            payload: Value::Null,
            trigger_type: String::new(),
            actions: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl RunContext {
    /// Fresh context for a new enrollment.
    pub fn new(trigger_type: impl Into<String>, payload: Value) -> Self {
        Self {
            payload,
            trigger_type: trigger_type.into(),
            ..Self::default()
        }
    }

    /// Merge a patch object into the context.
    ///
    /// Objects merge recursively; any other value replaces. `payload` merges
    /// into the payload, the reserved keys `version`, `triggerType` and
    /// `actions` cannot be overwritten.
    pub fn merge(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            match key.as_str() {
                "version" | "triggerType" | "actions" => {}
                "payload" => merge_value(&mut self.payload, value),
                _ => match self.extra.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        self.extra.insert(key.clone(), value.clone());
                    }
                },
            }
        }
    }

    /// Append an entry to the trailing action log.
    pub fn record_action(&mut self, entry: ActionLogEntry) {
        self.actions.push(entry);
    }

    /// The JSON object conditions are evaluated against.
    ///
    /// Extension fields sit at the top level next to `payload`,
    /// `triggerType` and `actions`.
    pub fn to_expression_context(&self) -> Value {
        let mut object = self.extra.clone();
        object.insert("payload".to_string(), self.payload.clone());
        object.insert("triggerType".to_string(), json!(self.trigger_type));
        let actions: Vec<Value> = self
            .actions
            .iter()
            .map(|a| {
                json!({
                    "stepId": a.step_id,
                    "type": a.action_type,
                    "output": a.output,
                })
            })
            .collect();
        object.insert("actions".to_string(), Value::Array(actions));
        Value::Object(object)
    }
}

fn merge_value(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// One executed action, kept in `RunContext::actions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLogEntry {
    pub step_id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub output: Value,
    /// True when the output came from the idempotency ledger.
    #[serde(default)]
    pub replayed: bool,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// RunPatch
// ---------------------------------------------------------------------------

/// Partial update applied to a run. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    /// `Some(None)` clears the current step.
    pub current_step_id: Option<Option<String>>,
    pub context: Option<RunContext>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunPatch {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn progress(current_step_id: Option<String>, context: RunContext) -> Self {
        Self {
            current_step_id: Some(current_step_id),
            context: Some(context),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_step(mut self, current_step_id: Option<String>) -> Self {
        self.current_step_id = Some(current_step_id);
        self
    }

    pub fn with_context(mut self, context: RunContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn finished(mut self, at: DateTime<Utc>) -> Self {
        self.finished_at = Some(at);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Run log
// ---------------------------------------------------------------------------

/// Severity of a run log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("invalid log level: '{other}'")),
        }
    }
}

/// Append-only execution trace entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub run_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RunLogEntry {
    pub fn new(
        tenant_id: Uuid,
        run_id: Uuid,
        step_id: Option<&str>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            run_id,
            step_id: step_id.map(str::to_string),
            level,
            message: message.into(),
            input: None,
            output: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_roundtrips_extension_fields() {
        let raw = json!({
            "version": 1,
            "payload": { "ownerId": "o-1" },
            "triggerType": "event",
            "actions": [],
            "owner": { "balance": 150 }
        });
        let ctx: RunContext = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(ctx.trigger_type, "event");
        assert_eq!(ctx.extra["owner"]["balance"], 150);
        assert_eq!(serde_json::to_value(&ctx).unwrap(), raw);
    }

    #[test]
    fn test_context_defaults_missing_keys() {
        let ctx: RunContext = serde_json::from_value(json!({})).unwrap();
        assert_eq!(ctx.version, CONTEXT_VERSION);
        assert!(ctx.actions.is_empty());
        assert!(ctx.payload.is_null());
    }

    #[test]
    fn test_merge_is_recursive_and_protects_reserved_keys() {
        let mut ctx = RunContext::new("manual", json!({ "a": 1 }));
        ctx.extra.insert("owner".to_string(), json!({ "name": "Ann", "tier": "basic" }));

        let patch = json!({
            "owner": { "tier": "gold" },
            "payload": { "b": 2 },
            "triggerType": "spoofed",
            "flag": true
        });
        ctx.merge(patch.as_object().unwrap());

        assert_eq!(ctx.extra["owner"], json!({ "name": "Ann", "tier": "gold" }));
        assert_eq!(ctx.payload, json!({ "a": 1, "b": 2 }));
        assert_eq!(ctx.trigger_type, "manual");
        assert_eq!(ctx.extra["flag"], true);
    }

    #[test]
    fn test_expression_context_shape() {
        let mut ctx = RunContext::new("schedule", json!({ "x": 1 }));
        ctx.extra.insert("owner".to_string(), json!({ "balance": 150 }));
        ctx.record_action(ActionLogEntry {
            step_id: "s1".to_string(),
            action_type: "note.append".to_string(),
            output: json!({ "note": "hi" }),
            replayed: false,
            at: Utc::now(),
        });

        let value = ctx.to_expression_context();
        assert_eq!(value["owner"]["balance"], 150);
        assert_eq!(value["payload"]["x"], 1);
        assert_eq!(value["triggerType"], "schedule");
        assert_eq!(value["actions"][0]["type"], "note.append");
    }

    #[test]
    fn test_run_status_parse_and_terminal() {
        assert_eq!("failed".parse::<RunStatus>().unwrap(), RunStatus::Failed);
        assert!("paused".parse::<RunStatus>().is_err());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(!RunStatus::Queued.is_terminal());
    }

    #[test]
    fn test_run_patch_builders() {
        let patch = RunPatch::status(RunStatus::Failed)
            .finished(Utc::now())
            .with_error("boom");
        assert_eq!(patch.status, Some(RunStatus::Failed));
        assert!(patch.finished_at.is_some());
        assert!(patch.current_step_id.is_none());

        let patch = RunPatch::progress(None, RunContext::default());
        assert_eq!(patch.current_step_id, Some(None));
    }
}
