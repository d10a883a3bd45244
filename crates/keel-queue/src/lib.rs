//! # Keel Queue
//!
//! Background job queue for the Keel startup-operations platform. Work that
//! must not run on the request path (notification delivery, payment
//! capture, data propagation) is submitted to a named queue and executed by
//! that queue's polling worker under a concurrency ceiling, with retry and
//! backoff on failure.
//!
//! ## Overview
//!
//! - **Static queues**: queue names, concurrency, retry policy, and timeout
//!   are configuration fixed at startup; submitting to an unknown queue is
//!   an error
//! - **Prioritized dispatch**: higher priority first, FIFO within a
//!   priority; delayed jobs become ready when their delay elapses
//! - **Retry with backoff**: none / linear / exponential over the queue's
//!   base delay, up to `max_attempts`, then terminal failure with the error
//!   preserved on the record
//! - **Observability**: job outcomes are broadcast as [`JobEvent`]s;
//!   records are queryable by id, queues report occupancy stats
//!
//! Acceptance is not completion: `add_job` returning `Ok` means the work
//! was queued. Outcomes arrive later via [`JobQueue::events`] or polling.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keel_queue::{Job, JobError, JobHandler, JobOptions, JobQueue, QueueConfig};
//! use std::sync::Arc;
//!
//! struct SendEmail;
//!
//! #[async_trait::async_trait]
//! impl JobHandler for SendEmail {
//!     async fn execute(&self, job: &Job) -> Result<(), JobError> {
//!         tracing::info!(job_id = %job.id, "email sent");
//!         Ok(())
//!     }
//! }
//!
//! async fn example() {
//!     let queue = JobQueue::new([QueueConfig::new("emails").concurrency(4)]);
//!     queue.register_handler("emails", Arc::new(SendEmail)).await.unwrap();
//!     queue.start();
//!
//!     queue
//!         .add_job(
//!             "emails",
//!             serde_json::json!({"to": "founder@example.com"}),
//!             JobOptions::default(),
//!         )
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod job;
pub mod queue;

// Re-export main types
pub use job::{Backoff, Job, JobOptions, JobStatus};
pub use queue::{
    JobError, JobEvent, JobHandler, JobQueue, QueueConfig, QueueError, QueueResult, QueueStats,
};
