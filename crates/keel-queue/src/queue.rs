//! Named job queues with polling workers
//!
//! Queues are registered statically at construction. Each queue runs one
//! scheduler task that polls on a fixed interval and dispatches the
//! highest-priority ready job to the handler registered for the queue,
//! keeping at most `concurrency` jobs in flight. Failed attempts are
//! re-enqueued with backoff until `max_attempts` is reached.

use crate::job::{Job, JobOptions, JobStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Job queue error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue name was not registered at startup
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Error returned by a job handler.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct JobError(pub String);

impl From<String> for JobError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

impl From<&str> for JobError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

/// Handler executing jobs for one queue.
///
/// Execution is at-least-once: a job may be re-dispatched after a crash
/// between execution and status persistence, so handlers must be safe to
/// run twice for the same `Job::id`.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute a job. Returning an error consumes one attempt.
    async fn execute(&self, job: &Job) -> Result<(), JobError>;
}

/// Static configuration for one queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name
    pub name: String,

    /// Maximum jobs in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Default attempt cap for jobs on this queue
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base retry delay in milliseconds fed into the backoff strategy
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Scheduler polling interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-job execution timeout in milliseconds (0 disables the timeout)
    #[serde(default = "default_job_timeout_ms")]
    pub job_timeout_ms: u64,
}

fn default_concurrency() -> usize {
    1
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_job_timeout_ms() -> u64 {
    30_000
}

impl QueueConfig {
    /// Create a config with defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concurrency: default_concurrency(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            job_timeout_ms: default_job_timeout_ms(),
        }
    }

    /// Set the concurrency ceiling.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the default attempt cap.
    pub fn retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    /// Set the base retry delay.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the scheduler polling interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the per-job execution timeout.
    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

/// Notification of a job outcome, observable via [`JobQueue::events`].
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// Job finished successfully
    Completed { job: Job },
    /// Job exhausted its attempts
    Failed { job: Job },
    /// Job attempt failed and was re-enqueued
    Retried { job: Job, delay: Duration },
}

impl JobEvent {
    /// The job record the event refers to.
    pub fn job(&self) -> &Job {
        match self {
            JobEvent::Completed { job } => job,
            JobEvent::Failed { job } => job,
            JobEvent::Retried { job, .. } => job,
        }
    }
}

/// Queue occupancy counters.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    /// Jobs waiting (including delayed)
    pub waiting: usize,
    /// Jobs currently executing
    pub processing: usize,
    /// Configured concurrency ceiling
    pub concurrency: usize,
}

/// Pending-set entry ordered by priority (desc) then submission (FIFO).
#[derive(Debug)]
struct PendingEntry {
    priority: i64,
    seq: u64,
    not_before: Option<chrono::DateTime<Utc>>,
    job_id: Uuid,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    config: QueueConfig,
    pending: Mutex<BinaryHeap<PendingEntry>>,
    in_flight: AtomicUsize,
    handler: RwLock<Option<Arc<dyn JobHandler>>>,
    seq: AtomicU64,
}

struct Inner {
    queues: HashMap<String, QueueState>,
    jobs: RwLock<HashMap<Uuid, Job>>,
    events: broadcast::Sender<JobEvent>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

/// Manager for a static set of named job queues.
///
/// Cheap to clone; clones share the same queues, job records, and workers.
///
/// # Example
///
/// ```rust,no_run
/// use keel_queue::{JobQueue, JobOptions, QueueConfig};
///
/// async fn example() {
///     let queue = JobQueue::new([QueueConfig::new("notifications").concurrency(4)]);
///     // register handlers, then:
///     queue.start();
///
///     queue
///         .add_job(
///             "notifications",
///             serde_json::json!({"user_id": "u-1", "template": "welcome"}),
///             JobOptions::default().priority(10),
///         )
///         .await
///         .unwrap();
/// }
/// ```
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("queues", &self.inner.queues.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl JobQueue {
    /// Create a queue manager from static queue configurations.
    pub fn new(configs: impl IntoIterator<Item = QueueConfig>) -> Self {
        let mut queues = HashMap::new();
        for config in configs {
            let name = config.name.clone();
            let state = QueueState {
                config,
                pending: Mutex::new(BinaryHeap::new()),
                in_flight: AtomicUsize::new(0),
                handler: RwLock::new(None),
                seq: AtomicU64::new(0),
            };
            if queues.insert(name.clone(), state).is_some() {
                tracing::warn!(queue = %name, "Duplicate queue config, keeping the last");
            }
        }

        let (events, _) = broadcast::channel(256);

        Self {
            inner: Arc::new(Inner {
                queues,
                jobs: RwLock::new(HashMap::new()),
                events,
                workers: std::sync::Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Register the handler executing jobs for a queue.
    pub async fn register_handler(
        &self,
        queue: &str,
        handler: Arc<dyn JobHandler>,
    ) -> QueueResult<()> {
        let state = self
            .inner
            .queues
            .get(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
        *state.handler.write().await = Some(handler);
        Ok(())
    }

    /// Submit a job.
    ///
    /// Fails with [`QueueError::UnknownQueue`] for unregistered queue names.
    /// Omitted options fall back to the queue's configured defaults. The
    /// returned record is a snapshot at submission time; acceptance does not
    /// mean completion; observe [`JobQueue::events`] or poll
    /// [`JobQueue::get_job`] for the outcome.
    pub async fn add_job(
        &self,
        queue: &str,
        payload: serde_json::Value,
        opts: JobOptions,
    ) -> QueueResult<Job> {
        let state = self
            .inner
            .queues
            .get(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;

        let now = Utc::now();
        let not_before = if opts.delay > Duration::ZERO {
            Some(now + chrono::Duration::milliseconds(opts.delay.as_millis() as i64))
        } else {
            None
        };

        let job = Job {
            id: Uuid::now_v7(),
            queue: queue.to_string(),
            payload,
            priority: opts.priority,
            max_attempts: opts.max_attempts.unwrap_or(state.config.retry_attempts).max(1),
            backoff: opts.backoff.unwrap_or_default(),
            remove_on_complete: opts.remove_on_complete,
            remove_on_fail: opts.remove_on_fail,
            status: JobStatus::Waiting,
            attempts: 0,
            created_at: now,
            not_before,
            processed_at: None,
            completed_at: None,
            failed_at: None,
            last_error: None,
        };

        self.inner.jobs.write().await.insert(job.id, job.clone());
        state.pending.lock().await.push(PendingEntry {
            priority: job.priority,
            seq: state.seq.fetch_add(1, Ordering::Relaxed),
            not_before: job.not_before,
            job_id: job.id,
        });

        tracing::debug!(queue = %queue, job_id = %job.id, priority = job.priority, "Job enqueued");
        Ok(job)
    }

    /// Start one scheduler task per queue. Idempotent.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let names: Vec<String> = self.inner.queues.keys().cloned().collect();
        let mut workers = self.inner.workers.lock().expect("workers poisoned");
        for name in names {
            let queue = self.clone();
            workers.push(tokio::spawn(async move {
                queue.run_scheduler(name).await;
            }));
        }
    }

    /// Stop all scheduler tasks.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.inner.workers.lock().expect("workers poisoned");
            workers.drain(..).collect()
        };
        for handle in handles {
            handle.abort();
        }
        self.inner.started.store(false, Ordering::SeqCst);
    }

    /// Stream of job outcomes across all queues.
    pub fn events(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Look up a job record.
    pub async fn get_job(&self, id: Uuid) -> Option<Job> {
        self.inner.jobs.read().await.get(&id).cloned()
    }

    /// Occupancy counters for one queue.
    pub async fn queue_stats(&self, queue: &str) -> QueueResult<QueueStats> {
        let state = self
            .inner
            .queues
            .get(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;

        let jobs = self.inner.jobs.read().await;
        let mut stats = QueueStats {
            concurrency: state.config.concurrency,
            ..QueueStats::default()
        };
        for job in jobs.values().filter(|j| j.queue == queue) {
            match job.status {
                JobStatus::Waiting => stats.waiting += 1,
                JobStatus::Processing => stats.processing += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Scheduler loop for one queue.
    async fn run_scheduler(&self, name: String) {
        let Some(state) = self.inner.queues.get(&name) else {
            return;
        };
        let mut ticker =
            tokio::time::interval(Duration::from_millis(state.config.poll_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.drain(&name).await;
        }
    }

    /// Dispatch ready jobs until the queue is empty or at capacity.
    async fn drain(&self, name: &str) {
        let Some(state) = self.inner.queues.get(name) else {
            return;
        };

        loop {
            if state.in_flight.load(Ordering::SeqCst) >= state.config.concurrency {
                break;
            }

            let Some(entry) = self.pop_ready(state).await else {
                break;
            };

            let handler = state.handler.read().await.clone();
            let Some(handler) = handler else {
                // Leave the job queued so a later registration picks it up.
                tracing::error!(queue = %name, job_id = %entry.job_id, "No handler registered for queue");
                state.pending.lock().await.push(entry);
                break;
            };

            let job = {
                let mut jobs = self.inner.jobs.write().await;
                match jobs.get_mut(&entry.job_id) {
                    Some(job) => {
                        job.status = JobStatus::Processing;
                        job.attempts += 1;
                        job.processed_at = Some(Utc::now());
                        job.not_before = None;
                        job.clone()
                    }
                    // Record was removed; drop the stale entry.
                    None => continue,
                }
            };

            state.in_flight.fetch_add(1, Ordering::SeqCst);

            let queue = self.clone();
            let name = name.to_string();
            tokio::spawn(async move {
                queue.run_job(&name, job, handler).await;
            });
        }
    }

    /// Pop the highest-priority entry whose delay has elapsed.
    async fn pop_ready(&self, state: &QueueState) -> Option<PendingEntry> {
        let mut pending = state.pending.lock().await;
        let now = Utc::now();
        let mut deferred = Vec::new();
        let mut found = None;

        while let Some(entry) = pending.pop() {
            if entry.not_before.map_or(false, |t| t > now) {
                deferred.push(entry);
                continue;
            }
            found = Some(entry);
            break;
        }

        for entry in deferred {
            pending.push(entry);
        }
        found
    }

    /// Execute one attempt and settle the outcome.
    async fn run_job(&self, name: &str, job: Job, handler: Arc<dyn JobHandler>) {
        let Some(state) = self.inner.queues.get(name) else {
            return;
        };

        let result = if state.config.job_timeout_ms == 0 {
            handler.execute(&job).await
        } else {
            let timeout = Duration::from_millis(state.config.job_timeout_ms);
            match tokio::time::timeout(timeout, handler.execute(&job)).await {
                Ok(result) => result,
                Err(_) => Err(JobError(format!(
                    "timed out after {}ms",
                    timeout.as_millis()
                ))),
            }
        };

        match result {
            Ok(()) => self.complete_job(job.id).await,
            Err(e) => self.fail_attempt(state, job.id, e.to_string()).await,
        }

        state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    async fn complete_job(&self, id: Uuid) {
        let snapshot = {
            let mut jobs = self.inner.jobs.write().await;
            let Some(job) = jobs.get_mut(&id) else {
                return;
            };
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
            let snapshot = job.clone();
            if snapshot.remove_on_complete {
                jobs.remove(&id);
            }
            snapshot
        };

        tracing::debug!(queue = %snapshot.queue, job_id = %id, attempts = snapshot.attempts, "Job completed");
        let _ = self.inner.events.send(JobEvent::Completed { job: snapshot });
    }

    async fn fail_attempt(&self, state: &QueueState, id: Uuid, error: String) {
        let (snapshot, retry_delay) = {
            let mut jobs = self.inner.jobs.write().await;
            let Some(job) = jobs.get_mut(&id) else {
                return;
            };
            job.last_error = Some(error.clone());

            if job.attempts >= job.max_attempts {
                job.status = JobStatus::Failed;
                job.failed_at = Some(Utc::now());
                let snapshot = job.clone();
                if snapshot.remove_on_fail {
                    jobs.remove(&id);
                }
                (snapshot, None)
            } else {
                let delay = job
                    .backoff
                    .delay(job.attempts, Duration::from_millis(state.config.retry_delay_ms));
                job.status = JobStatus::Waiting;
                job.not_before =
                    Some(Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64));
                (job.clone(), Some(delay))
            }
        };

        match retry_delay {
            Some(delay) => {
                state.pending.lock().await.push(PendingEntry {
                    priority: snapshot.priority,
                    seq: state.seq.fetch_add(1, Ordering::Relaxed),
                    not_before: snapshot.not_before,
                    job_id: id,
                });
                tracing::debug!(
                    queue = %snapshot.queue,
                    job_id = %id,
                    attempt = snapshot.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Job attempt failed, retrying"
                );
                let _ = self.inner.events.send(JobEvent::Retried {
                    job: snapshot,
                    delay,
                });
            }
            None => {
                tracing::warn!(
                    queue = %snapshot.queue,
                    job_id = %id,
                    attempts = snapshot.attempts,
                    error = %error,
                    "Job failed, retries exhausted"
                );
                let _ = self.inner.events.send(JobEvent::Failed { job: snapshot });
            }
        }
    }
}
