//! Workflow executions
//!
//! One execution is a run of a template: per-step status, a cursor over the
//! step list, and the accumulated context (trigger payload plus each
//! completed step's result) later steps resolve placeholders against.

use crate::template::{StepKind, WorkflowTemplate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Step lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Not yet reached, or awaiting a retry
    Pending,
    /// Currently executing (or, for a delay step, waiting on its timer)
    Running,
    /// Finished successfully
    Completed,
    /// Exhausted its retries
    Failed,
}

/// Execution lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Advancing through its steps
    Running,
    /// All steps completed
    Completed,
    /// A step exhausted its retries
    Failed,
}

/// Runtime state of one step within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    /// Step id from the template
    pub id: String,
    /// Step type
    pub kind: StepKind,
    /// Raw (unrendered) config from the template
    pub config: serde_json::Value,
    /// Lifecycle state
    pub status: StepStatus,
    /// Execution attempts so far
    pub attempts: u32,
    /// Error from the most recent failed attempt
    pub error: Option<String>,
}

/// One run of a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Execution id
    pub id: Uuid,

    /// Template id
    pub workflow_id: String,

    /// Payload of the triggering event
    pub trigger: serde_json::Value,

    /// Lifecycle state
    pub status: ExecutionStatus,

    /// Cursor into `steps`; advances forward except for conditional jumps
    pub current_step: usize,

    /// Per-step runtime state
    pub steps: Vec<StepState>,

    /// Accumulated state: `{"trigger": …, "steps": {step_id: result}}`
    pub context: serde_json::Value,

    /// Set while a delay step is waiting; the driver skips the execution
    /// until this time
    pub resume_at: Option<DateTime<Utc>>,

    /// When the execution started
    pub started_at: DateTime<Utc>,

    /// When the execution reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Error that failed the execution
    pub error: Option<String>,
}

impl WorkflowExecution {
    /// Start an execution of a template.
    pub fn new(template: &WorkflowTemplate, trigger: serde_json::Value) -> Self {
        let steps = template
            .steps
            .iter()
            .map(|step| StepState {
                id: step.id.clone(),
                kind: step.kind,
                config: step.config.clone(),
                status: StepStatus::Pending,
                attempts: 0,
                error: None,
            })
            .collect();

        Self {
            id: Uuid::now_v7(),
            workflow_id: template.id.clone(),
            trigger: trigger.clone(),
            status: ExecutionStatus::Running,
            current_step: 0,
            steps,
            context: serde_json::json!({ "trigger": trigger, "steps": {} }),
            resume_at: None,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// The step the cursor points at, if any remain.
    pub fn current(&self) -> Option<&StepState> {
        self.steps.get(self.current_step)
    }

    /// Index of a step by id.
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    /// Store a completed step's result in the context.
    pub fn record_result(&mut self, step_id: &str, result: serde_json::Value) {
        if let Some(steps) = self
            .context
            .get_mut("steps")
            .and_then(serde_json::Value::as_object_mut)
        {
            steps.insert(step_id.to_string(), result);
        }
    }

    /// Whether the execution reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Completed | ExecutionStatus::Failed
        )
    }

    /// Mark the execution completed.
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.resume_at = None;
    }

    /// Mark the execution failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.resume_at = None;
        self.error = Some(error.into());
    }
}
