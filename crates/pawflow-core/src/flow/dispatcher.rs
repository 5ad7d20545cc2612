//! Action dispatcher.
//!
//! Maps an action type (`email.send`, `record.update`, ...) to a registered
//! handler and gates dispatch on the tenant's plan. Handlers are registered
//! once at startup; adding an action type means registering a handler.
//!
//! `ActionHandler` uses RPITIT, so the registry stores the object-safe
//! `ActionHandlerDyn` twin, blanket-implemented for every handler.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use pawflow_types::flow::StepDefinition;
use pawflow_types::plan::PlanTier;
use pawflow_types::run::RunContext;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::EngineError;
use super::handlers::{
    EmailSendHandler, NoteAppendHandler, RecordUpdateHandler, SkippedActionHandler,
};
use super::mail::BoxMailSender;

// ---------------------------------------------------------------------------
// Plan allowlist
// ---------------------------------------------------------------------------

/// Capabilities every plan has.
const FREE_ACTIONS: &[&str] = &["record.update", "note.append"];

/// Capabilities added by paid plans.
const PAID_ACTIONS: &[&str] = &[
    "email.send",
    "sms.send",
    "webhook.call",
    "task.create",
    "delay",
];

/// Whether `plan` may use the capability `action_type`.
///
/// `delay` is a capability as well: the executor checks it for delay steps.
pub fn plan_allows(plan: PlanTier, action_type: &str) -> bool {
    FREE_ACTIONS.contains(&action_type) || (plan.is_paid() && PAID_ACTIONS.contains(&action_type))
}

/// Read the action type from a step config (`action`, alias `type`).
pub fn action_type_of(config: &Value) -> Option<&str> {
    config
        .get("action")
        .or_else(|| config.get("type"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Handler traits
// ---------------------------------------------------------------------------

/// Input handed to an action handler.
#[derive(Debug, Clone, Copy)]
pub struct ActionRequest<'a> {
    pub tenant_id: Uuid,
    pub run_id: Uuid,
    pub step: &'a StepDefinition,
    pub context: &'a RunContext,
}

impl ActionRequest<'_> {
    pub fn config(&self) -> &Value {
        &self.step.config
    }
}

/// What a handler produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActionOutcome {
    /// Recorded in the ledger and in `context.actions`.
    pub output: Value,
    /// Merged into the run context after the action.
    pub context_patch: Option<Map<String, Value>>,
}

impl ActionOutcome {
    pub fn output(output: Value) -> Self {
        Self {
            output,
            context_patch: None,
        }
    }

    pub fn with_patch(mut self, patch: Map<String, Value>) -> Self {
        self.context_patch = Some(patch);
        self
    }

    /// The form stored in the idempotency ledger.
    pub fn to_record(&self) -> Value {
        let mut record = Map::new();
        record.insert("output".to_string(), self.output.clone());
        if let Some(patch) = &self.context_patch {
            record.insert("contextPatch".to_string(), Value::Object(patch.clone()));
        }
        Value::Object(record)
    }

    /// Rebuild an outcome from a ledger record.
    pub fn from_record(record: &Value) -> Self {
        Self {
            output: record.get("output").cloned().unwrap_or(Value::Null),
            context_patch: record
                .get("contextPatch")
                .and_then(Value::as_object)
                .cloned(),
        }
    }
}

/// A side-effect provider for one action type.
pub trait ActionHandler: Send + Sync {
    /// The action type this handler serves.
    fn action_type(&self) -> &'static str;

    fn execute(
        &self,
        request: &ActionRequest<'_>,
    ) -> impl Future<Output = Result<ActionOutcome, EngineError>> + Send;
}

/// Object-safe version of [`ActionHandler`] with boxed futures.
pub trait ActionHandlerDyn: Send + Sync {
    fn action_type(&self) -> &'static str;

    fn execute_boxed<'a>(
        &'a self,
        request: &'a ActionRequest<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<ActionOutcome, EngineError>> + Send + 'a>>;
}

impl<T: ActionHandler> ActionHandlerDyn for T {
    fn action_type(&self) -> &'static str {
        ActionHandler::action_type(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        request: &'a ActionRequest<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<ActionOutcome, EngineError>> + Send + 'a>> {
        Box::pin(self.execute(request))
    }
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

/// Registry of action handlers keyed by action type.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<&'static str, Arc<dyn ActionHandlerDyn>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in handler.
    pub fn with_builtin_handlers(mail: Arc<BoxMailSender>) -> Self {
        let mut registry = Self::new();
        registry.register(RecordUpdateHandler);
        registry.register(NoteAppendHandler);
        registry.register(EmailSendHandler::new(mail));
        registry.register(SkippedActionHandler::new(
            "task.create",
            "task integration not configured",
        ));
        registry.register(SkippedActionHandler::new(
            "webhook.call",
            "webhook caller not configured",
        ));
        registry.register(SkippedActionHandler::new(
            "sms.send",
            "sms provider not configured",
        ));
        registry
    }

    /// Register a handler, replacing any previous handler for its type.
    pub fn register<H: ActionHandler + 'static>(&mut self, handler: H) {
        let action_type = ActionHandler::action_type(&handler);
        self.handlers.insert(action_type, Arc::new(handler));
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    /// Registered action types, sorted.
    pub fn action_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Resolve the handler for a step without running it.
    ///
    /// Fails with `UnsupportedAction` for unregistered types and `PlanLimit`
    /// when the plan does not include the action.
    pub fn resolve(
        &self,
        plan: PlanTier,
        step: &StepDefinition,
    ) -> Result<(&'static str, Arc<dyn ActionHandlerDyn>), EngineError> {
        let action_type = action_type_of(&step.config).ok_or_else(|| {
            EngineError::Configuration(format!("action step '{}' has no action type", step.id))
        })?;

        let (&key, handler) = self
            .handlers
            .get_key_value(action_type)
            .ok_or_else(|| EngineError::UnsupportedAction(action_type.to_string()))?;

        if !plan_allows(plan, key) {
            return Err(EngineError::PlanLimit {
                action: key.to_string(),
                plan,
            });
        }
        Ok((key, handler.clone()))
    }

    /// Resolve and run the handler for `request.step`.
    pub async fn execute(
        &self,
        plan: PlanTier,
        request: &ActionRequest<'_>,
    ) -> Result<ActionOutcome, EngineError> {
        let (action_type, handler) = self.resolve(plan, request.step)?;
        tracing::debug!(
            run_id = %request.run_id,
            step_id = %request.step.id,
            action_type,
            "dispatching action"
        );
        handler.execute_boxed(request).await
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("handlers", &self.action_types())
            .finish()
    }
}
