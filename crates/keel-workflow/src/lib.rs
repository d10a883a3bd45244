//! # Keel Workflow
//!
//! Event-triggered workflow automation for the Keel platform. A template
//! names trigger event types and an ordered step list; each matching event
//! starts an execution, and a periodic driver advances every running
//! execution one step per tick until it completes or a step exhausts its
//! retries.
//!
//! ## Overview
//!
//! - **Templates**: static, serde-loadable step lists over a closed
//!   [`StepKind`] set; unknown step kinds are rejected at engine startup
//! - **Placeholders**: step configs reference accumulated execution state
//!   (`{{trigger.venture_id}}`, `{{steps.check.valid}}`) and resolution is
//!   typed: a missing path is an error, never literal text
//! - **Control steps**: `delay` suspends one execution until its timer
//!   fires; `conditional` jumps the cursor by a dotted-path truthiness
//!   check, the only non-linear advancement
//! - **Work steps**: notification/payment/calendar enqueue jobs, record
//!   writes through the store, validation asserts required paths
//! - **Failure policy**: a step retries up to a cap, then the execution
//!   fails with the error preserved; terminal executions move to a bounded
//!   history table
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keel_events::EventBus;
//! use keel_queue::{JobQueue, QueueConfig};
//! use keel_store::MemoryStore;
//! use keel_workflow::{
//!     EngineConfig, StepDefinition, StepKind, TemplateRegistry, WorkflowEngine, WorkflowTemplate,
//! };
//!
//! async fn example() {
//!     let bus = EventBus::default();
//!     let queue = JobQueue::new([QueueConfig::new("notifications")]);
//!
//!     let templates = TemplateRegistry::new([WorkflowTemplate::new(
//!         "venture-onboarding",
//!         "Venture onboarding",
//!         ["venture.created"],
//!         [StepDefinition::new(
//!             "welcome",
//!             StepKind::Notification,
//!             serde_json::json!({"payload": {"user_id": "{{trigger.founder_id}}"}}),
//!         )],
//!     )]);
//!
//!     let engine = WorkflowEngine::new(
//!         EngineConfig::default(),
//!         templates,
//!         queue.clone(),
//!         MemoryStore::shared(),
//!     )
//!     .unwrap();
//!     engine.attach(&bus).await;
//!     engine.start().await;
//! }
//! ```

pub mod engine;
pub mod execution;
pub mod path;
pub mod steps;
pub mod template;

// Re-export main types
pub use engine::{
    EngineConfig, StepContext, StepRunner, WorkflowEngine, WorkflowError, WorkflowResult,
};
pub use execution::{ExecutionStatus, StepState, StepStatus, WorkflowExecution};
pub use path::{lookup, render, truthy, PathError};
pub use steps::{EnqueueStep, RecordStep, ValidationStep};
pub use template::{StepDefinition, StepKind, TemplateRegistry, WorkflowTemplate};
