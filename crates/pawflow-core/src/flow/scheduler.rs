//! Trigger scheduler for schedule-triggered flows.
//!
//! Provides:
//! - `TriggerRegistry`: at most one live timer per flow, cron timers on
//!   `tokio-cron-scheduler` and interval timers on tokio tasks
//! - `TriggerScheduler`: keeps the registry in sync with stored flows and
//!   enrolls subjects when a timer fires

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use pawflow_types::flow::FlowDefinition;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::enrollment::{EnrollmentRequest, EnrollmentService};
use super::error::EngineError;
use super::expression::ExpressionEvaluator;
use super::schedule::{SchedulerError, TimerSpec};
use super::trigger::{SubjectSource, criteria_context, reenrollment_allows, schedule_payload};
use crate::repository::flow::FlowRepository;

/// Callback invoked when a flow's timer fires.
pub type FireCallback = Arc<dyn Fn(Uuid, DateTime<Utc>) -> BoxFuture<'static, ()> + Send + Sync>;

// ---------------------------------------------------------------------------
// TriggerRegistry
// ---------------------------------------------------------------------------

enum TimerHandle {
    Cron { job_id: Uuid },
    Interval {
        cancel: CancellationToken,
        task: JoinHandle<()>,
    },
}

struct RegisteredTimer {
    /// Identity of the schedule the timer was built from.
    signature: String,
    handle: TimerHandle,
}

/// Live timers keyed by flow id.
///
/// Owned by a scheduler instance; nothing here is process-global.
pub struct TriggerRegistry {
    cron: RwLock<Option<JobScheduler>>,
    timers: RwLock<HashMap<Uuid, RegisteredTimer>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self {
            cron: RwLock::new(None),
            timers: RwLock::new(HashMap::new()),
        }
    }

    /// Start the cron runtime. Must be called before registering cron timers.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        *self.cron.write().await = Some(scheduler);
        tracing::info!("trigger registry started");
        Ok(())
    }

    /// Cancel every timer and stop the cron runtime.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let drained: Vec<(Uuid, RegisteredTimer)> = self.timers.write().await.drain().collect();
        for (flow_id, timer) in drained {
            self.cancel_timer(flow_id, timer.handle).await;
        }
        if let Some(mut scheduler) = self.cron.write().await.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
        }
        tracing::info!("trigger registry stopped");
        Ok(())
    }

    /// Install a timer for `flow_id`, cancelling any timer it already has.
    pub async fn register(
        &self,
        flow_id: Uuid,
        signature: String,
        spec: TimerSpec,
        callback: FireCallback,
    ) -> Result<(), SchedulerError> {
        let mut timers = self.timers.write().await;
        if let Some(existing) = timers.remove(&flow_id) {
            self.cancel_timer(flow_id, existing.handle).await;
        }

        let handle = match spec {
            TimerSpec::Cron(expr) => {
                let cron = self.cron.read().await;
                let scheduler = cron.as_ref().ok_or(SchedulerError::NotStarted)?;

                let job = Job::new_async(expr.as_str(), move |_uuid, _lock| {
                    let cb = callback.clone();
                    Box::pin(async move {
                        let now = Utc::now();
                        tracing::debug!(%flow_id, %now, "cron trigger fired");
                        cb(flow_id, now).await;
                    })
                })
                .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

                let job_id = job.guid();
                scheduler
                    .add(job)
                    .await
                    .map_err(|e| SchedulerError::JobError(e.to_string()))?;
                tracing::info!(%flow_id, %job_id, cron = %expr, "cron timer registered");
                TimerHandle::Cron { job_id }
            }
            TimerSpec::Interval(period) => {
                let cancel = CancellationToken::new();
                let task = tokio::spawn(run_interval(flow_id, period, cancel.clone(), callback));
                tracing::info!(%flow_id, period_secs = period.as_secs(), "interval timer registered");
                TimerHandle::Interval { cancel, task }
            }
        };

        timers.insert(flow_id, RegisteredTimer { signature, handle });
        Ok(())
    }

    /// Remove a flow's timer. Returns whether one existed.
    pub async fn unregister(&self, flow_id: Uuid) -> bool {
        let removed = self.timers.write().await.remove(&flow_id);
        match removed {
            Some(timer) => {
                self.cancel_timer(flow_id, timer.handle).await;
                tracing::info!(%flow_id, "timer unregistered");
                true
            }
            None => false,
        }
    }

    /// Schedule signature of a registered flow.
    pub async fn signature(&self, flow_id: &Uuid) -> Option<String> {
        self.timers
            .read()
            .await
            .get(flow_id)
            .map(|t| t.signature.clone())
    }

    pub async fn flow_ids(&self) -> Vec<Uuid> {
        self.timers.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.timers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.timers.read().await.is_empty()
    }

    async fn cancel_timer(&self, flow_id: Uuid, handle: TimerHandle) {
        match handle {
            TimerHandle::Cron { job_id } => {
                if let Some(scheduler) = self.cron.read().await.as_ref() {
                    if let Err(e) = scheduler.remove(&job_id).await {
                        tracing::warn!(%flow_id, %job_id, error = %e, "failed to remove cron job");
                    }
                }
            }
            TimerHandle::Interval { cancel, task } => {
                cancel.cancel();
                task.abort();
            }
        }
    }
}

impl Default for TriggerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_interval(flow_id: Uuid, period: Duration, cancel: CancellationToken, callback: FireCallback) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let now = Utc::now();
                tracing::debug!(%flow_id, %now, "interval trigger fired");
                callback(flow_id, now).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TriggerScheduler
// ---------------------------------------------------------------------------

/// Counts from one timer firing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FireSummary {
    pub candidates: usize,
    pub enrolled: usize,
    pub skipped_by_policy: usize,
    pub skipped_by_criteria: usize,
    pub failed: usize,
}

/// Counts from one reload pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub registered: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub invalid: usize,
}

/// Keeps timers in sync with stored flows and enrolls subjects on fire.
pub struct TriggerScheduler<F: FlowRepository, S: SubjectSource> {
    flows: Arc<F>,
    subjects: Arc<S>,
    enrollment: EnrollmentService<F>,
    registry: TriggerRegistry,
    evaluator: ExpressionEvaluator,
    reload_interval: Duration,
}

impl<F, S> TriggerScheduler<F, S>
where
    F: FlowRepository + 'static,
    S: SubjectSource + 'static,
{
    pub fn new(flows: Arc<F>, subjects: Arc<S>, max_attempts: u32, reload_interval: Duration) -> Self {
        Self {
            enrollment: EnrollmentService::new(flows.clone(), max_attempts),
            flows,
            subjects,
            registry: TriggerRegistry::new(),
            evaluator: ExpressionEvaluator::new(),
            reload_interval,
        }
    }

    pub fn registry(&self) -> &TriggerRegistry {
        &self.registry
    }

    /// Start the cron runtime and register every scheduled flow.
    pub async fn start(self: &Arc<Self>) -> Result<ReloadSummary, SchedulerError> {
        self.registry.start().await?;
        self.reload().await
    }

    /// Reload until `shutdown` fires, then cancel every timer.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.reload_interval,
            self.reload_interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.reload().await {
                        tracing::error!(error = %e, "schedule reload failed");
                    }
                }
            }
        }
        if let Err(e) = self.registry.shutdown().await {
            tracing::warn!(error = %e, "trigger registry shutdown failed");
        }
    }

    /// Sync the registry with the definition store.
    ///
    /// New and changed schedules are (re)registered; flows that are no longer
    /// enabled and scheduled lose their timer.
    pub async fn reload(self: &Arc<Self>) -> Result<ReloadSummary, SchedulerError> {
        let flows = self.flows.list_scheduled_flows().await?;
        let mut summary = ReloadSummary::default();
        let mut wanted = Vec::with_capacity(flows.len());

        for flow in flows.iter().filter(|f| f.enabled && f.schedule().is_some()) {
            wanted.push(flow.id);
            let Some(signature) = schedule_signature(flow) else {
                continue;
            };
            if self.registry.signature(&flow.id).await.as_deref() == Some(signature.as_str()) {
                summary.unchanged += 1;
                continue;
            }
            match self.register_flow(flow).await {
                Ok(()) => summary.registered += 1,
                Err(e) => {
                    tracing::warn!(flow_id = %flow.id, error = %e, "flow schedule rejected");
                    self.registry.unregister(flow.id).await;
                    summary.invalid += 1;
                }
            }
        }

        for flow_id in self.registry.flow_ids().await {
            if !wanted.contains(&flow_id) && self.registry.unregister(flow_id).await {
                summary.removed += 1;
            }
        }

        tracing::info!(
            registered = summary.registered,
            unchanged = summary.unchanged,
            removed = summary.removed,
            invalid = summary.invalid,
            "schedules reloaded"
        );
        Ok(summary)
    }

    /// Register (or re-register) the timer of one flow.
    pub async fn register_flow(self: &Arc<Self>, flow: &FlowDefinition) -> Result<(), SchedulerError> {
        let schedule = flow.schedule().ok_or_else(|| {
            SchedulerError::InvalidSchedule(format!("flow '{}' has no schedule trigger", flow.id))
        })?;
        let spec = TimerSpec::from_schedule(schedule)?;
        let signature = schedule_signature(flow).unwrap_or_default();

        let weak: Weak<Self> = Arc::downgrade(self);
        let tenant_id = flow.tenant_id;
        let callback: FireCallback = Arc::new(move |flow_id, fired_at| {
            let weak = weak.clone();
            async move {
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.on_fire(tenant_id, flow_id, fired_at).await;
                }
            }
            .boxed()
        });

        self.registry.register(flow.id, signature, spec, callback).await
    }

    pub async fn unregister_flow(&self, flow_id: Uuid) -> bool {
        self.registry.unregister(flow_id).await
    }

    async fn on_fire(&self, tenant_id: Uuid, flow_id: Uuid, fired_at: DateTime<Utc>) {
        // Definitions are read fresh so edits apply from the next firing.
        let flow = match self.flows.get_flow(&tenant_id, &flow_id).await {
            Ok(Some(flow)) if flow.enabled && flow.schedule().is_some() => flow,
            Ok(_) => {
                tracing::info!(%flow_id, "flow no longer scheduled; skipping fire");
                return;
            }
            Err(e) => {
                tracing::error!(%flow_id, error = %e, "failed to load flow for timer");
                return;
            }
        };

        match self.fire_flow(&flow, fired_at).await {
            Ok(summary) => tracing::info!(
                %flow_id,
                candidates = summary.candidates,
                enrolled = summary.enrolled,
                skipped_by_policy = summary.skipped_by_policy,
                skipped_by_criteria = summary.skipped_by_criteria,
                failed = summary.failed,
                "scheduled flow fired"
            ),
            Err(e) => tracing::error!(%flow_id, error = %e, "scheduled flow fire failed"),
        }
    }

    /// Enroll the flow's eligible subjects.
    pub async fn fire_flow(
        &self,
        flow: &FlowDefinition,
        fired_at: DateTime<Utc>,
    ) -> Result<FireSummary, EngineError> {
        let subjects = self.subjects.candidates(flow).await?;
        let mut summary = FireSummary {
            candidates: subjects.len(),
            ..FireSummary::default()
        };

        for subject in &subjects {
            let history = self
                .flows
                .subject_history(&flow.tenant_id, &flow.id, &subject.id)
                .await?;
            if !reenrollment_allows(flow.reenrollment.as_ref(), &history, fired_at) {
                tracing::debug!(flow_id = %flow.id, subject_id = %subject.id, "skipped by re-enrollment policy");
                summary.skipped_by_policy += 1;
                continue;
            }

            let payload = schedule_payload(subject, fired_at);
            if let Some(criteria) = flow.criteria() {
                let context = criteria_context(subject, &payload, "schedule");
                match self.evaluator.evaluate(criteria, &context) {
                    Ok(true) => {}
                    Ok(false) => {
                        summary.skipped_by_criteria += 1;
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(flow_id = %flow.id, error = %e, "invalid trigger criteria");
                        summary.skipped_by_criteria += 1;
                        continue;
                    }
                }
            }

            let request = EnrollmentRequest::new("schedule", payload).for_subject(subject.id.clone());
            match self.enrollment.enroll(flow, request).await {
                Ok(_) => summary.enrolled += 1,
                Err(e) => {
                    tracing::error!(flow_id = %flow.id, subject_id = %subject.id, error = %e, "enrollment failed");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}

/// Stable identity of a flow's schedule, used to detect edits on reload.
fn schedule_signature(flow: &FlowDefinition) -> Option<String> {
    flow.schedule()
        .and_then(|s| serde_json::to_value(s).ok())
        .map(|v| v.to_string())
}
