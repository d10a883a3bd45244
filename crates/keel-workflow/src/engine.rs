//! Workflow engine
//!
//! Subscribes to trigger events, creates executions, and drives every
//! running execution forward one step per tick. Step configs are rendered
//! against the execution context before dispatch; work-producing steps run
//! through registered [`StepRunner`]s while `delay` and `conditional` are
//! handled by the engine itself. A step that keeps failing retries up to a
//! cap, then fails the whole execution with the error preserved.

use crate::execution::{ExecutionStatus, StepState, StepStatus, WorkflowExecution};
use crate::path::{self, PathError};
use crate::steps::{EnqueueStep, RecordStep, ValidationStep};
use crate::template::{StepKind, TemplateRegistry};
use chrono::Utc;
use keel_events::{Event, EventBus, EventHandler, HandlerError};
use keel_queue::JobQueue;
use keel_store::RecordStore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Workflow engine error types.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// No template with the given id
    #[error("Unknown workflow template: {0}")]
    UnknownTemplate(String),

    /// A placeholder path did not resolve
    #[error(transparent)]
    Path(#[from] PathError),

    /// A conditional branch names a step that does not exist
    #[error("Branch target not found: {step_id}")]
    UnknownStep { step_id: String },

    /// A step config is structurally invalid
    #[error("Invalid step config: {0}")]
    InvalidConfig(String),

    /// A step runner failed
    #[error("Step failed: {0}")]
    Step(String),

    /// No runner registered for a step kind the templates use
    #[error("No runner registered for step kind {}", .0.as_str())]
    MissingRunner(StepKind),

    /// Job submission failed
    #[error(transparent)]
    Queue(#[from] keel_queue::QueueError),

    /// Record store failure
    #[error(transparent)]
    Store(#[from] keel_store::StoreError),
}

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Driver tick interval in milliseconds
    #[serde(default = "default_drive_interval_ms")]
    pub drive_interval_ms: u64,

    /// Attempts per step before the execution fails
    #[serde(default = "default_step_retry_limit")]
    pub step_retry_limit: u32,

    /// Terminal executions kept in the history table
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_drive_interval_ms() -> u64 {
    100
}

fn default_step_retry_limit() -> u32 {
    3
}

fn default_history_capacity() -> usize {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            drive_interval_ms: default_drive_interval_ms(),
            step_retry_limit: default_step_retry_limit(),
            history_capacity: default_history_capacity(),
        }
    }
}

/// Everything a step runner needs for one step execution.
pub struct StepContext<'a> {
    /// Execution id
    pub execution_id: Uuid,
    /// Template id
    pub workflow_id: &'a str,
    /// Step id
    pub step_id: &'a str,
    /// Config with placeholders already rendered
    pub config: serde_json::Value,
    /// The execution context, for runners that inspect state directly
    pub scope: &'a serde_json::Value,
}

/// Executes one kind of work-producing step.
#[async_trait::async_trait]
pub trait StepRunner: Send + Sync {
    /// Run the step; the returned value is stored in the execution context
    /// under the step's id.
    async fn run(&self, ctx: StepContext<'_>) -> WorkflowResult<serde_json::Value>;
}

struct Inner {
    config: EngineConfig,
    templates: TemplateRegistry,
    runners: HashMap<StepKind, Arc<dyn StepRunner>>,
    active: RwLock<HashMap<Uuid, WorkflowExecution>>,
    history: RwLock<VecDeque<WorkflowExecution>>,
    driver: RwLock<Option<JoinHandle<()>>>,
}

/// Event-triggered workflow engine.
///
/// Cheap to clone; clones share the same executions and driver.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("templates", &self.inner.templates.templates.len())
            .finish()
    }
}

/// Bus handler creating executions on trigger events.
struct WorkflowTriggerHandler {
    engine: WorkflowEngine,
}

#[async_trait::async_trait]
impl EventHandler for WorkflowTriggerHandler {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        self.engine.on_trigger(event).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "workflow-engine"
    }
}

impl WorkflowEngine {
    /// Create an engine with the standard runner set: notification, payment,
    /// and calendar steps enqueue jobs on their namesake queues; record
    /// steps write through the store; validation runs in-engine.
    pub fn new(
        config: EngineConfig,
        templates: TemplateRegistry,
        queue: JobQueue,
        store: Arc<dyn RecordStore>,
    ) -> WorkflowResult<Self> {
        let mut runners: HashMap<StepKind, Arc<dyn StepRunner>> = HashMap::new();
        runners.insert(
            StepKind::Notification,
            Arc::new(EnqueueStep::new("notifications", queue.clone())),
        );
        runners.insert(
            StepKind::Payment,
            Arc::new(EnqueueStep::new("payments", queue.clone())),
        );
        runners.insert(
            StepKind::Calendar,
            Arc::new(EnqueueStep::new("calendar", queue)),
        );
        runners.insert(StepKind::Record, Arc::new(RecordStep::new(store)));
        runners.insert(StepKind::Validation, Arc::new(ValidationStep));

        Self::with_runners(config, templates, runners)
    }

    /// Create an engine with a custom runner registry.
    ///
    /// Fails at startup when a template uses a step kind that has neither a
    /// runner nor in-engine handling, rather than at first dispatch.
    pub fn with_runners(
        config: EngineConfig,
        templates: TemplateRegistry,
        runners: HashMap<StepKind, Arc<dyn StepRunner>>,
    ) -> WorkflowResult<Self> {
        for kind in templates.used_kinds() {
            if !kind.is_control() && !runners.contains_key(&kind) {
                return Err(WorkflowError::MissingRunner(kind));
            }
        }

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                templates,
                runners,
                active: RwLock::new(HashMap::new()),
                history: RwLock::new(VecDeque::new()),
                driver: RwLock::new(None),
            }),
        })
    }

    /// Subscribe the engine to every trigger event type in its templates.
    pub async fn attach(&self, bus: &EventBus) {
        let handler: Arc<dyn EventHandler> = Arc::new(WorkflowTriggerHandler {
            engine: self.clone(),
        });
        for trigger in self.inner.templates.trigger_types() {
            bus.subscribe(trigger, handler.clone()).await;
        }
    }

    /// Start the driver loop. Idempotent.
    pub async fn start(&self) {
        let mut driver = self.inner.driver.write().await;
        if driver.is_some() {
            return;
        }

        let engine = self.clone();
        *driver = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(
                engine.inner.config.drive_interval_ms.max(1),
            ));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.tick().await;
            }
        }));
    }

    /// Stop the driver loop.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.driver.write().await.take() {
            handle.abort();
        }
    }

    /// Start an execution of a template directly (without a trigger event).
    pub async fn start_execution(
        &self,
        template_id: &str,
        trigger: serde_json::Value,
    ) -> WorkflowResult<WorkflowExecution> {
        let template = self
            .inner
            .templates
            .by_id(template_id)
            .ok_or_else(|| WorkflowError::UnknownTemplate(template_id.to_string()))?;

        let execution = WorkflowExecution::new(template, trigger);
        tracing::info!(
            workflow_id = %template.id,
            execution_id = %execution.id,
            "Workflow execution started"
        );
        self.inner
            .active
            .write()
            .await
            .insert(execution.id, execution.clone());
        Ok(execution)
    }

    /// Create executions for every template triggered by an event.
    async fn on_trigger(&self, event: &Event) {
        let template_ids: Vec<String> = self
            .inner
            .templates
            .by_trigger(&event.event_type)
            .into_iter()
            .map(|t| t.id.clone())
            .collect();

        for template_id in template_ids {
            if let Err(e) = self
                .start_execution(&template_id, event.payload.clone())
                .await
            {
                tracing::error!(
                    workflow_id = %template_id,
                    event_type = %event.event_type,
                    error = %e,
                    "Failed to start workflow execution"
                );
            }
        }
    }

    /// Look up an execution in the active table, then in history.
    pub async fn get_execution(&self, id: Uuid) -> Option<WorkflowExecution> {
        if let Some(execution) = self.inner.active.read().await.get(&id).cloned() {
            return Some(execution);
        }
        self.inner
            .history
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// Number of executions still running.
    pub async fn active_count(&self) -> usize {
        self.inner.active.read().await.len()
    }

    /// Terminal executions, newest first.
    pub async fn history(&self, limit: usize) -> Vec<WorkflowExecution> {
        let history = self.inner.history.read().await;
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Advance every due execution one step.
    ///
    /// Runs on the driver interval; also callable directly for deterministic
    /// stepping in tests and tooling.
    pub async fn tick(&self) {
        let now = Utc::now();
        let due: Vec<Uuid> = {
            let active = self.inner.active.read().await;
            active
                .values()
                .filter(|e| {
                    e.status == ExecutionStatus::Running
                        && e.resume_at.map_or(true, |at| at <= now)
                })
                .map(|e| e.id)
                .collect()
        };

        for id in due {
            self.advance(id).await;
        }
    }

    /// Advance one execution one step.
    async fn advance(&self, id: Uuid) {
        let Some(mut execution) = self.inner.active.read().await.get(&id).cloned() else {
            return;
        };
        if execution.status != ExecutionStatus::Running {
            return;
        }

        let step = execution.current().cloned();
        match step {
            None => execution.complete(),
            Some(step) => match step.kind {
                StepKind::Delay => self.advance_delay(&mut execution, &step),
                StepKind::Conditional => self.advance_conditional(&mut execution, &step),
                _ => self.advance_runner(&mut execution, &step).await,
            },
        }

        if execution.is_terminal() {
            self.finish(execution).await;
        } else {
            self.inner.active.write().await.insert(id, execution);
        }
    }

    /// Arm a delay step, or complete it once its timer has fired.
    fn advance_delay(&self, execution: &mut WorkflowExecution, step: &StepState) {
        let idx = execution.current_step;

        if execution.steps[idx].status == StepStatus::Running {
            // The driver only reaches a running delay once resume_at passed.
            execution.steps[idx].status = StepStatus::Completed;
            execution.resume_at = None;
            execution.record_result(&step.id, serde_json::json!({ "resumed": true }));
            self.advance_cursor(execution);
            return;
        }

        execution.steps[idx].attempts += 1;
        let rendered = match path::render(&step.config, &execution.context) {
            Ok(rendered) => rendered,
            Err(e) => return self.step_failure(execution, idx, e.into()),
        };
        let Some(duration_ms) = rendered.get("duration_ms").and_then(|v| v.as_u64()) else {
            return self.step_failure(
                execution,
                idx,
                WorkflowError::InvalidConfig("delay step requires duration_ms".to_string()),
            );
        };

        execution.steps[idx].status = StepStatus::Running;
        execution.resume_at = Some(Utc::now() + chrono::Duration::milliseconds(duration_ms as i64));
        tracing::debug!(
            execution_id = %execution.id,
            step_id = %step.id,
            duration_ms,
            "Delay step armed"
        );
    }

    /// Evaluate a conditional and jump the cursor to the selected step.
    fn advance_conditional(&self, execution: &mut WorkflowExecution, step: &StepState) {
        let idx = execution.current_step;
        execution.steps[idx].attempts += 1;

        let Some(condition) = step.config.get("condition").and_then(|v| v.as_str()) else {
            return self.step_failure(
                execution,
                idx,
                WorkflowError::InvalidConfig("conditional step requires condition".to_string()),
            );
        };

        // A boolean lookup over absent state is false, not an error.
        let result = match path::lookup(&execution.context, condition) {
            Ok(value) => path::truthy(value),
            Err(_) => {
                tracing::debug!(
                    execution_id = %execution.id,
                    condition,
                    "Condition path absent, treated as false"
                );
                false
            }
        };

        let branch = if result { "on_true" } else { "on_false" };
        let Some(target) = step.config.get(branch).and_then(|v| v.as_str()) else {
            return self.step_failure(
                execution,
                idx,
                WorkflowError::InvalidConfig(format!("conditional step requires {branch}")),
            );
        };
        let Some(target_idx) = execution.step_index(target) else {
            return self.step_failure(
                execution,
                idx,
                WorkflowError::UnknownStep {
                    step_id: target.to_string(),
                },
            );
        };

        execution.steps[idx].status = StepStatus::Completed;
        execution.record_result(
            &step.id,
            serde_json::json!({ "condition": condition, "result": result, "next": target }),
        );
        execution.current_step = target_idx;
        tracing::debug!(
            execution_id = %execution.id,
            step_id = %step.id,
            result,
            next = target,
            "Conditional branched"
        );
    }

    /// Render the config and dispatch to the runner for the step's kind.
    async fn advance_runner(&self, execution: &mut WorkflowExecution, step: &StepState) {
        let idx = execution.current_step;
        execution.steps[idx].status = StepStatus::Running;
        execution.steps[idx].attempts += 1;

        let Some(runner) = self.inner.runners.get(&step.kind).cloned() else {
            return self.step_failure(execution, idx, WorkflowError::MissingRunner(step.kind));
        };

        let rendered = match path::render(&step.config, &execution.context) {
            Ok(rendered) => rendered,
            Err(e) => return self.step_failure(execution, idx, e.into()),
        };

        let ctx = StepContext {
            execution_id: execution.id,
            workflow_id: &execution.workflow_id,
            step_id: &step.id,
            config: rendered,
            scope: &execution.context,
        };

        let outcome = runner.run(ctx).await;
        match outcome {
            Ok(result) => {
                execution.steps[idx].status = StepStatus::Completed;
                execution.steps[idx].error = None;
                execution.record_result(&step.id, result);
                self.advance_cursor(execution);
            }
            Err(e) => self.step_failure(execution, idx, e),
        }
    }

    /// Move the cursor forward, completing the execution past the last step.
    fn advance_cursor(&self, execution: &mut WorkflowExecution) {
        execution.current_step += 1;
        if execution.current_step >= execution.steps.len() {
            execution.complete();
        }
    }

    /// Record a failed attempt: leave the step pending for a retry, or fail
    /// the whole execution once the retry cap is hit.
    fn step_failure(&self, execution: &mut WorkflowExecution, idx: usize, error: WorkflowError) {
        let message = error.to_string();
        let step_id = execution.steps[idx].id.clone();
        execution.steps[idx].error = Some(message.clone());

        if execution.steps[idx].attempts >= self.inner.config.step_retry_limit {
            execution.steps[idx].status = StepStatus::Failed;
            tracing::warn!(
                execution_id = %execution.id,
                workflow_id = %execution.workflow_id,
                step_id = %step_id,
                attempts = execution.steps[idx].attempts,
                error = %message,
                "Step retries exhausted, execution failed"
            );
            execution.fail(format!("step {step_id} failed: {message}"));
        } else {
            execution.steps[idx].status = StepStatus::Pending;
            tracing::debug!(
                execution_id = %execution.id,
                step_id = %step_id,
                attempt = execution.steps[idx].attempts,
                error = %message,
                "Step attempt failed, will retry"
            );
        }
    }

    /// Move a terminal execution from the active table to history.
    async fn finish(&self, execution: WorkflowExecution) {
        match execution.status {
            ExecutionStatus::Completed => tracing::info!(
                execution_id = %execution.id,
                workflow_id = %execution.workflow_id,
                "Workflow execution completed"
            ),
            _ => tracing::warn!(
                execution_id = %execution.id,
                workflow_id = %execution.workflow_id,
                error = execution.error.as_deref().unwrap_or("unknown"),
                "Workflow execution failed"
            ),
        }

        self.inner.active.write().await.remove(&execution.id);
        let mut history = self.inner.history.write().await;
        history.push_back(execution);
        while history.len() > self.inner.config.history_capacity {
            history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{StepDefinition, WorkflowTemplate};
    use keel_events::PublishOptions;
    use keel_queue::QueueConfig;
    use keel_store::MemoryStore;

    fn engine_with(templates: TemplateRegistry) -> (WorkflowEngine, JobQueue) {
        let queue = JobQueue::new([
            QueueConfig::new("notifications"),
            QueueConfig::new("payments"),
            QueueConfig::new("calendar"),
        ]);
        let engine = WorkflowEngine::new(
            EngineConfig::default(),
            templates,
            queue.clone(),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        (engine, queue)
    }

    fn onboarding_template() -> WorkflowTemplate {
        WorkflowTemplate::new(
            "venture-onboarding",
            "Venture onboarding",
            ["venture.created"],
            [
                StepDefinition::new(
                    "check",
                    StepKind::Validation,
                    serde_json::json!({"required": ["trigger.venture_id", "trigger.founder_id"]}),
                ),
                StepDefinition::new(
                    "record",
                    StepKind::Record,
                    serde_json::json!({
                        "entity_type": "onboarding",
                        "id": "{{trigger.venture_id}}",
                        "record": {"venture_id": "{{trigger.venture_id}}", "status": "started"}
                    }),
                ),
                StepDefinition::new(
                    "welcome",
                    StepKind::Notification,
                    serde_json::json!({
                        "payload": {"user_id": "{{trigger.founder_id}}", "template": "welcome"}
                    }),
                ),
            ],
        )
    }

    #[tokio::test]
    async fn test_happy_path_runs_all_steps() {
        let (engine, queue) = engine_with(TemplateRegistry::new([onboarding_template()]));
        let execution = engine
            .start_execution(
                "venture-onboarding",
                serde_json::json!({"venture_id": "v-1", "founder_id": "u-1"}),
            )
            .await
            .unwrap();

        for _ in 0..3 {
            engine.tick().await;
        }

        let finished = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert!(finished.completed_at.is_some());
        assert_eq!(finished.context["steps"]["check"]["valid"], true);
        assert_eq!(finished.context["steps"]["record"]["id"], "v-1");

        // The notification step enqueued a correlated job.
        let job_id: Uuid =
            serde_json::from_value(finished.context["steps"]["welcome"]["job_id"].clone()).unwrap();
        let job = queue.get_job(job_id).await.unwrap();
        assert_eq!(job.payload["user_id"], "u-1");
        assert_eq!(
            job.payload["workflow_execution_id"],
            serde_json::json!(execution.id)
        );

        // Terminal executions move to history.
        assert_eq!(engine.active_count().await, 0);
        assert_eq!(engine.history(10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_one_step_per_tick() {
        let (engine, _queue) = engine_with(TemplateRegistry::new([onboarding_template()]));
        let execution = engine
            .start_execution(
                "venture-onboarding",
                serde_json::json!({"venture_id": "v-1", "founder_id": "u-1"}),
            )
            .await
            .unwrap();

        engine.tick().await;
        let after_one = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(after_one.current_step, 1);
        assert_eq!(after_one.status, ExecutionStatus::Running);
    }

    fn approval_template() -> WorkflowTemplate {
        WorkflowTemplate::new(
            "agreement-approval",
            "Agreement approval",
            ["agreement.signed"],
            [
                StepDefinition::new(
                    "branch",
                    StepKind::Conditional,
                    serde_json::json!({
                        "condition": "trigger.countersigned",
                        "on_true": "archive",
                        "on_false": "chase"
                    }),
                ),
                StepDefinition::new(
                    "chase",
                    StepKind::Notification,
                    serde_json::json!({"payload": {"template": "signature_reminder"}}),
                ),
                StepDefinition::new(
                    "archive",
                    StepKind::Record,
                    serde_json::json!({
                        "entity_type": "archive",
                        "id": "{{trigger.agreement_id}}",
                        "record": {"state": "complete"}
                    }),
                ),
            ],
        )
    }

    #[tokio::test]
    async fn test_conditional_true_branch() {
        let (engine, _queue) = engine_with(TemplateRegistry::new([approval_template()]));
        let execution = engine
            .start_execution(
                "agreement-approval",
                serde_json::json!({"agreement_id": "a-1", "countersigned": true}),
            )
            .await
            .unwrap();

        engine.tick().await;
        let branched = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(branched.context["steps"]["branch"]["next"], "archive");
        assert_eq!(branched.current_step, branched.step_index("archive").unwrap());
    }

    #[tokio::test]
    async fn test_conditional_false_branch() {
        let (engine, _queue) = engine_with(TemplateRegistry::new([approval_template()]));
        let execution = engine
            .start_execution(
                "agreement-approval",
                serde_json::json!({"agreement_id": "a-1", "countersigned": false}),
            )
            .await
            .unwrap();

        engine.tick().await;
        let branched = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(branched.context["steps"]["branch"]["next"], "chase");
        assert_eq!(branched.current_step, branched.step_index("chase").unwrap());
    }

    #[tokio::test]
    async fn test_conditional_absent_path_is_false() {
        let (engine, _queue) = engine_with(TemplateRegistry::new([approval_template()]));
        let execution = engine
            .start_execution(
                "agreement-approval",
                serde_json::json!({"agreement_id": "a-1"}),
            )
            .await
            .unwrap();

        engine.tick().await;
        let branched = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(branched.context["steps"]["branch"]["result"], false);
        assert_eq!(branched.context["steps"]["branch"]["next"], "chase");
    }

    #[tokio::test]
    async fn test_step_retries_then_fails_execution() {
        // The notification payload references a path the trigger never has.
        let template = WorkflowTemplate::new(
            "broken",
            "Broken",
            ["x.created"],
            [StepDefinition::new(
                "notify",
                StepKind::Notification,
                serde_json::json!({"payload": {"user_id": "{{trigger.missing}}"}}),
            )],
        );
        let (engine, _queue) = engine_with(TemplateRegistry::new([template]));
        let execution = engine
            .start_execution("broken", serde_json::json!({}))
            .await
            .unwrap();

        for _ in 0..4 {
            engine.tick().await;
        }

        let failed = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert_eq!(failed.steps[0].status, StepStatus::Failed);
        assert_eq!(failed.steps[0].attempts, 3);
        assert!(failed.error.as_deref().unwrap().contains("trigger.missing"));
        assert_eq!(engine.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_delay_suspends_only_until_timer() {
        let template = WorkflowTemplate::new(
            "paced",
            "Paced",
            ["x.created"],
            [
                StepDefinition::new(
                    "wait",
                    StepKind::Delay,
                    serde_json::json!({"duration_ms": 80}),
                ),
                StepDefinition::new(
                    "record",
                    StepKind::Record,
                    serde_json::json!({"entity_type": "marker", "id": "m-1", "record": {}}),
                ),
            ],
        );
        let (engine, _queue) = engine_with(TemplateRegistry::new([template]));
        let execution = engine
            .start_execution("paced", serde_json::json!({}))
            .await
            .unwrap();

        // First tick arms the timer.
        engine.tick().await;
        let armed = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(armed.steps[0].status, StepStatus::Running);
        assert!(armed.resume_at.is_some());

        // Before the timer fires the driver skips the execution.
        engine.tick().await;
        let still_armed = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(still_armed.current_step, 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.tick().await; // completes the delay
        engine.tick().await; // runs the record step

        let finished = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(finished.context["steps"]["wait"]["resumed"], true);
    }

    #[tokio::test]
    async fn test_trigger_event_starts_execution() {
        let bus = EventBus::default();
        let (engine, _queue) = engine_with(TemplateRegistry::new([onboarding_template()]));
        engine.attach(&bus).await;

        bus.publish(
            "venture.created",
            serde_json::json!({"venture_id": "v-9", "founder_id": "u-9"}),
            PublishOptions::default().source("ventures"),
        )
        .await;

        assert_eq!(engine.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_missing_runner_rejected_at_startup() {
        let template = WorkflowTemplate::new(
            "pay",
            "Pay",
            ["invoice.due"],
            [StepDefinition::new(
                "charge",
                StepKind::Payment,
                serde_json::json!({}),
            )],
        );
        let err = WorkflowEngine::with_runners(
            EngineConfig::default(),
            TemplateRegistry::new([template]),
            HashMap::new(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, WorkflowError::MissingRunner(StepKind::Payment)));
    }

    #[tokio::test]
    async fn test_unknown_template_rejected() {
        let (engine, _queue) = engine_with(TemplateRegistry::default());
        let err = engine
            .start_execution("ghost", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownTemplate(_)));
    }
}
