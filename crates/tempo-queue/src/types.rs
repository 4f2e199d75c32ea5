//! Queue job and event types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A job handed to a durable queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    /// Stable job identity within the queue.
    pub job_id: String,
    /// Opaque caller payload, passed through to the processor and events.
    pub payload: Value,
    /// Total number of tries the queue may make (at least 1). The queue
    /// owns this counter; there is no backoff between tries.
    pub attempts: u32,
    /// Delay before the job becomes due, in milliseconds.
    pub delay_ms: u64,
    /// Delivery priority among due jobs. Lower values run first.
    pub priority: i64,
    /// Repeat schedule; when set, the job re-arms after each run.
    pub repeat: Option<RepeatSpec>,
}

impl QueueJob {
    /// Create an immediate, single-try job with default priority.
    pub fn new(job_id: impl Into<String>, payload: Value) -> Self {
        Self {
            job_id: job_id.into(),
            payload,
            attempts: 1,
            delay_ms: 0,
            priority: 0,
            repeat: None,
        }
    }
}

/// Repeat schedule for a queue job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatSpec {
    /// Cron expression (seconds-resolution, `sec min hour dom mon dow`).
    pub cron: String,
}

/// Terminal outcome of one queue job run.
///
/// `attempt` is the try number (1-based) on which the run ended: the
/// successful try, or the last exhausted try.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// The processor returned a value within the allowed tries.
    Completed {
        job_id: String,
        payload: Value,
        result: Value,
        attempt: u32,
    },
    /// Every allowed try failed.
    Failed {
        job_id: String,
        payload: Value,
        error: String,
        attempt: u32,
    },
}
