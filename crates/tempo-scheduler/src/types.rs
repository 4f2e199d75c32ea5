//! Scheduler types.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use cron::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Duration;

use crate::SchedulerError;

/// Opaque caller payload. The scheduler never inspects it.
pub type JobData = Value;

/// Opaque job identity, caller-supplied or generated.
pub type JobId = String;

/// Type alias for the asynchronous, fallible job handler.
pub type JobHandler = Arc<
    dyn Fn(JobData) -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>> + Send + Sync,
>;

/// Type alias for the completion callback, invoked with `(data, output)`.
pub type CompletedCallback =
    Arc<dyn Fn(JobData, JobOutput) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Type alias for the failure callback, invoked with `(data, failure)`.
pub type FailedCallback =
    Arc<dyn Fn(JobData, JobFailure) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Result of a job's successful attempt, delivered to the completion
/// callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    /// Value returned by the handler.
    pub value: Value,
    /// Which attempt succeeded (1-based).
    pub attempt: u32,
}

/// Terminal failure of a job's attempt sequence, delivered to the failure
/// callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Error message from the last failed attempt.
    pub message: String,
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Per-job scheduling and retry options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// How many times a failed run is retried before the failure callback
    /// fires. Zero means a single attempt.
    pub retry_limit: u32,
    /// Cron expression (`sec min hour dom mon dow`). Mutually exclusive
    /// with `delay_ms`.
    pub cron: Option<String>,
    /// One-shot delay before the first (and only) run, in milliseconds.
    /// Mutually exclusive with `cron`.
    pub delay_ms: Option<u64>,
    /// Explicit job id; generated when absent. Re-scheduling an id
    /// replaces the live job with that id.
    pub job_id: Option<String>,
    /// Delivery priority, durable backend only (lower runs first). The
    /// in-process backend ignores it.
    pub priority: Option<i64>,
}

impl JobOptions {
    /// Resolve these options into a concrete scheduling mode.
    ///
    /// This is where configuration errors surface: an unparseable cron
    /// expression or `cron` combined with `delay_ms` fail here, before any
    /// timer is armed.
    pub fn schedule_mode(&self) -> Result<ScheduleMode, SchedulerError> {
        match (&self.cron, self.delay_ms) {
            (Some(_), Some(_)) => Err(SchedulerError::ConflictingOptions),
            (Some(expression), None) => {
                let schedule = Schedule::from_str(expression).map_err(|source| {
                    SchedulerError::InvalidCron {
                        expression: expression.clone(),
                        source,
                    }
                })?;
                Ok(ScheduleMode::Cron(Box::new(schedule)))
            }
            (None, Some(0) | None) => Ok(ScheduleMode::Immediate),
            (None, Some(ms)) => Ok(ScheduleMode::Delayed(Duration::from_millis(ms))),
        }
    }
}

/// When a job's first run fires.
#[derive(Debug, Clone)]
pub enum ScheduleMode {
    /// Run once, as soon as possible.
    Immediate,
    /// Run once after a fixed delay.
    Delayed(Duration),
    /// Run repeatedly per a cron schedule. Each firing is an independent
    /// attempt sequence with its own retry counter.
    Cron(Box<Schedule>),
}

impl ScheduleMode {
    /// Whether the job is torn down after one terminal outcome.
    pub fn is_one_shot(&self) -> bool {
        !matches!(self, ScheduleMode::Cron(_))
    }
}
