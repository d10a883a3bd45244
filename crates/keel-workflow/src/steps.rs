//! Built-in step runners
//!
//! Work-producing steps delegate to the platform's other components: the
//! enqueue-style steps (notification, payment, calendar) hand a job to the
//! queue so slow work never runs inside the engine's driver loop, the
//! record step writes through the store, and the validation step asserts
//! required paths resolve in execution state.

use crate::engine::{StepContext, StepRunner, WorkflowError};
use crate::path;
use keel_queue::{JobOptions, JobQueue};
use keel_store::RecordStore;
use std::sync::Arc;
use uuid::Uuid;

/// Runner that enqueues a job on a configured queue.
///
/// Config: `payload` (object, rendered), optional `queue` override and
/// `priority`. The execution and step ids are stamped into the payload so
/// job handlers can correlate back.
pub struct EnqueueStep {
    default_queue: String,
    queue: JobQueue,
}

impl EnqueueStep {
    pub fn new(default_queue: impl Into<String>, queue: JobQueue) -> Self {
        Self {
            default_queue: default_queue.into(),
            queue,
        }
    }
}

#[async_trait::async_trait]
impl StepRunner for EnqueueStep {
    async fn run(&self, ctx: StepContext<'_>) -> Result<serde_json::Value, WorkflowError> {
        let queue_name = ctx
            .config
            .get("queue")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.default_queue)
            .to_string();

        let mut payload = ctx
            .config
            .get("payload")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        if let Some(fields) = payload.as_object_mut() {
            fields.insert(
                "workflow_execution_id".to_string(),
                serde_json::json!(ctx.execution_id),
            );
            fields.insert("workflow_step".to_string(), serde_json::json!(ctx.step_id));
        }

        let priority = ctx
            .config
            .get("priority")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        let job = self
            .queue
            .add_job(&queue_name, payload, JobOptions::default().priority(priority))
            .await?;

        Ok(serde_json::json!({ "job_id": job.id, "queue": queue_name }))
    }
}

/// Runner writing a record through the store.
///
/// Config: `entity_type` (required), `record` (object, rendered), optional
/// `id` (a fresh uuid when omitted).
pub struct RecordStep {
    store: Arc<dyn RecordStore>,
}

impl RecordStep {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl StepRunner for RecordStep {
    async fn run(&self, ctx: StepContext<'_>) -> Result<serde_json::Value, WorkflowError> {
        let entity_type = ctx
            .config
            .get("entity_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                WorkflowError::InvalidConfig("record step requires entity_type".to_string())
            })?
            .to_string();

        let record = ctx.config.get("record").cloned().ok_or_else(|| {
            WorkflowError::InvalidConfig("record step requires record".to_string())
        })?;

        let id = ctx
            .config
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        self.store.put(&entity_type, &id, record).await?;

        Ok(serde_json::json!({ "entity_type": entity_type, "id": id }))
    }
}

/// Runner asserting that required paths resolve in execution state.
///
/// Config: `required`, an array of dotted paths into the execution
/// context.
pub struct ValidationStep;

#[async_trait::async_trait]
impl StepRunner for ValidationStep {
    async fn run(&self, ctx: StepContext<'_>) -> Result<serde_json::Value, WorkflowError> {
        let required = ctx
            .config
            .get("required")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                WorkflowError::InvalidConfig("validation step requires required paths".to_string())
            })?;

        let mut missing = Vec::new();
        for entry in required {
            let Some(path) = entry.as_str() else {
                return Err(WorkflowError::InvalidConfig(
                    "validation paths must be strings".to_string(),
                ));
            };
            if path::lookup(ctx.scope, path).is_err() {
                missing.push(path.to_string());
            }
        }

        if !missing.is_empty() {
            return Err(WorkflowError::Step(format!(
                "missing required paths: {}",
                missing.join(", ")
            )));
        }

        Ok(serde_json::json!({ "valid": true, "checked": required.len() }))
    }
}
