//! End-to-end workflow tests over the full coordination stack.
//!
//! These wire a real bus, queue, and store together: a domain event starts
//! an execution, the driver loop advances it unattended, work steps land as
//! jobs that the queue's workers actually execute.

use keel_events::{EventBus, PublishOptions};
use keel_queue::{Job, JobError, JobHandler, JobQueue, QueueConfig};
use keel_store::{MemoryStore, RecordStore};
use keel_workflow::{
    EngineConfig, ExecutionStatus, StepDefinition, StepKind, TemplateRegistry, WorkflowEngine,
    WorkflowTemplate,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Job handler recording every payload it executes.
struct Deliveries {
    payloads: Arc<Mutex<Vec<serde_json::Value>>>,
}

#[async_trait::async_trait]
impl JobHandler for Deliveries {
    async fn execute(&self, job: &Job) -> Result<(), JobError> {
        self.payloads.lock().unwrap().push(job.payload.clone());
        Ok(())
    }
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
                    "record": {
                        "venture_id": "{{trigger.venture_id}}",
                        "status": "started"
                    }
                }),
            ),
            StepDefinition::new(
                "welcome",
                StepKind::Notification,
                serde_json::json!({
                    "payload": {
                        "user_id": "{{trigger.founder_id}}",
                        "template": "welcome"
                    }
                }),
            ),
        ],
    )
}

#[tokio::test]
async fn test_event_drives_workflow_to_completion() {
    let bus = EventBus::default();
    let queue = JobQueue::new([QueueConfig::new("notifications")
        .poll_interval(Duration::from_millis(5))]);
    let store = Arc::new(MemoryStore::new());

    let payloads = Arc::new(Mutex::new(Vec::new()));
    queue
        .register_handler(
            "notifications",
            Arc::new(Deliveries {
                payloads: payloads.clone(),
            }),
        )
        .await
        .unwrap();
    queue.start();

    let engine = WorkflowEngine::new(
        EngineConfig {
            drive_interval_ms: 10,
            ..EngineConfig::default()
        },
        TemplateRegistry::new([onboarding_template()]),
        queue.clone(),
        store.clone(),
    )
    .unwrap();
    engine.attach(&bus).await;
    engine.start().await;

    bus.publish(
        "venture.created",
        serde_json::json!({"venture_id": "v-100", "founder_id": "u-7"}),
        PublishOptions::default().source("ventures"),
    )
    .await;

    // The driver and queue run unattended; wait for the delivery to land.
    let delivered = {
        let start = tokio::time::Instant::now();
        loop {
            if !payloads.lock().unwrap().is_empty() {
                break true;
            }
            if start.elapsed() > Duration::from_secs(5) {
                break false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    assert!(delivered, "welcome notification never delivered");

    let payload = payloads.lock().unwrap()[0].clone();
    assert_eq!(payload["user_id"], "u-7");
    assert_eq!(payload["template"], "welcome");

    // The record step wrote through the store.
    let record = store.fetch("onboarding", "v-100").await.unwrap().unwrap();
    assert_eq!(record["status"], "started");

    // The execution reached history as completed.
    let history = engine.history(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ExecutionStatus::Completed);
    assert_eq!(history[0].workflow_id, "venture-onboarding");

    engine.shutdown().await;
    queue.shutdown().await;
}

#[tokio::test]
async fn test_branching_workflow_chases_missing_countersignature() {
    let bus = EventBus::default();
    let queue = JobQueue::new([QueueConfig::new("notifications")
        .poll_interval(Duration::from_millis(5))]);
    let store = Arc::new(MemoryStore::new());

    let payloads = Arc::new(Mutex::new(Vec::new()));
    queue
        .register_handler(
            "notifications",
            Arc::new(Deliveries {
                payloads: payloads.clone(),
            }),
        )
        .await
        .unwrap();
    queue.start();

    let template = WorkflowTemplate::new(
        "signature-chase",
        "Chase missing signatures",
        ["agreement.signed"],
        [
            StepDefinition::new(
                "branch",
                StepKind::Conditional,
                serde_json::json!({
                    "condition": "trigger.countersigned",
                    "on_true": "archive",
                    "on_false": "remind"
                }),
            ),
            StepDefinition::new(
                "remind",
                StepKind::Notification,
                serde_json::json!({
                    "payload": {
                        "agreement_id": "{{trigger.agreement_id}}",
                        "template": "countersign_reminder"
                    }
                }),
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
    );

    let engine = WorkflowEngine::new(
        EngineConfig {
            drive_interval_ms: 10,
            ..EngineConfig::default()
        },
        TemplateRegistry::new([template]),
        queue.clone(),
        store.clone(),
    )
    .unwrap();
    engine.attach(&bus).await;
    engine.start().await;

    // Not countersigned: the reminder runs, then execution falls through to
    // the archive step.
    bus.publish(
        "agreement.signed",
        serde_json::json!({"agreement_id": "a-55", "countersigned": false}),
        PublishOptions::default().source("agreements"),
    )
    .await;

    // Countersigned: the conditional jumps straight to archive, skipping the
    // reminder.
    bus.publish(
        "agreement.signed",
        serde_json::json!({"agreement_id": "a-56", "countersigned": true}),
        PublishOptions::default().source("agreements"),
    )
    .await;

    let archived = {
        let start = tokio::time::Instant::now();
        loop {
            let both = store.fetch("archive", "a-55").await.unwrap().is_some()
                && store.fetch("archive", "a-56").await.unwrap().is_some()
                && !payloads.lock().unwrap().is_empty();
            if both {
                break true;
            }
            if start.elapsed() > Duration::from_secs(5) {
                break false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    assert!(archived, "agreements never archived");

    let payloads = payloads.lock().unwrap();
    assert_eq!(payloads.len(), 1, "only the uncountersigned agreement reminds");
    assert_eq!(payloads[0]["agreement_id"], "a-55");
    assert_eq!(payloads[0]["template"], "countersign_reminder");

    engine.shutdown().await;
    queue.shutdown().await;
}
