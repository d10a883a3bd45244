//! Job records and retry policy
//!
//! A job is a unit of asynchronous work submitted to a named queue. Its
//! record tracks the full lifecycle: waiting → processing → completed, or
//! back to waiting for a retry, or failed once attempts are exhausted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Strategy mapping attempt count to retry delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Fixed delay on every retry
    None,
    /// `attempts × base`
    Linear,
    /// `2^attempts × base`
    #[default]
    Exponential,
}

impl Backoff {
    /// Delay before re-enqueueing after the given number of completed
    /// attempts.
    pub fn delay(&self, attempts: u32, base: Duration) -> Duration {
        match self {
            Backoff::None => base,
            Backoff::Linear => base.saturating_mul(attempts.max(1)),
            Backoff::Exponential => {
                // Exponent capped so the multiplication cannot overflow.
                base.saturating_mul(2u32.saturating_pow(attempts.min(20)))
            }
        }
    }
}

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued, waiting to be picked up
    Waiting,
    /// Currently executing
    Processing,
    /// Finished successfully
    Completed,
    /// Exhausted its attempts
    Failed,
}

/// Options supplied with a job submission.
///
/// Unset fields fall back to the queue's configured defaults.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Higher priority is dequeued first (ties broken FIFO). Default 0.
    pub priority: i64,
    /// Initial delay before the job becomes ready.
    pub delay: Duration,
    /// Maximum execution attempts; defaults to the queue's retry count.
    pub max_attempts: Option<u32>,
    /// Retry delay strategy; defaults to exponential.
    pub backoff: Option<Backoff>,
    /// Drop the job record once completed.
    pub remove_on_complete: bool,
    /// Drop the job record once terminally failed.
    pub remove_on_fail: bool,
}

impl JobOptions {
    /// Set the priority.
    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Delay the job's first execution.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Cap the number of attempts.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Choose the backoff strategy.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Drop the record after successful completion.
    pub fn remove_on_complete(mut self) -> Self {
        self.remove_on_complete = true;
        self
    }

    /// Drop the record after terminal failure.
    pub fn remove_on_fail(mut self) -> Self {
        self.remove_on_fail = true;
        self
    }
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: Uuid,

    /// Queue the job belongs to
    pub queue: String,

    /// Job payload handed to the handler
    pub payload: serde_json::Value,

    /// Effective priority
    pub priority: i64,

    /// Effective attempt cap
    pub max_attempts: u32,

    /// Effective backoff strategy
    pub backoff: Backoff,

    /// Drop the record once completed
    pub remove_on_complete: bool,

    /// Drop the record once failed
    pub remove_on_fail: bool,

    /// Current lifecycle state
    pub status: JobStatus,

    /// Execution attempts so far; increments when processing starts
    pub attempts: u32,

    /// When the job was submitted
    pub created_at: DateTime<Utc>,

    /// Earliest time the job may run (delay / retry backoff)
    pub not_before: Option<DateTime<Utc>>,

    /// When the latest attempt started
    pub processed_at: Option<DateTime<Utc>>,

    /// When the job completed
    pub completed_at: Option<DateTime<Utc>>,

    /// When the job terminally failed
    pub failed_at: Option<DateTime<Utc>>,

    /// Error from the most recent failed attempt
    pub last_error: Option<String>,
}

impl Job {
    /// Whether the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_none_constant() {
        let base = Duration::from_millis(100);
        assert_eq!(Backoff::None.delay(1, base), base);
        assert_eq!(Backoff::None.delay(5, base), base);
    }

    #[test]
    fn test_backoff_linear() {
        let base = Duration::from_millis(100);
        assert_eq!(Backoff::Linear.delay(1, base), Duration::from_millis(100));
        assert_eq!(Backoff::Linear.delay(2, base), Duration::from_millis(200));
        assert_eq!(Backoff::Linear.delay(3, base), Duration::from_millis(300));
    }

    #[test]
    fn test_backoff_exponential() {
        let base = Duration::from_millis(100);
        assert_eq!(
            Backoff::Exponential.delay(1, base),
            Duration::from_millis(200)
        );
        assert_eq!(
            Backoff::Exponential.delay(2, base),
            Duration::from_millis(400)
        );
        assert_eq!(
            Backoff::Exponential.delay(3, base),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn test_backoff_monotonic_non_decreasing() {
        let base = Duration::from_millis(50);
        for strategy in [Backoff::None, Backoff::Linear, Backoff::Exponential] {
            let mut previous = Duration::ZERO;
            for attempts in 1..10 {
                let delay = strategy.delay(attempts, base);
                assert!(
                    delay >= previous,
                    "{strategy:?} decreased at attempt {attempts}"
                );
                previous = delay;
            }
        }
    }

    #[test]
    fn test_backoff_exponential_saturates() {
        let base = Duration::from_secs(1);
        // Large attempt counts must not overflow.
        let delay = Backoff::Exponential.delay(1000, base);
        assert!(delay >= Backoff::Exponential.delay(20, base));
    }
}
