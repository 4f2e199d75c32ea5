//! Error types for the scheduler.

use thiserror::Error;

/// Errors that can occur in scheduler operations.
///
/// Configuration errors (`InvalidCron`, `ConflictingOptions`) are raised
/// synchronously by `schedule`. Handler failures never appear here — they
/// flow through the failure callback after retries are exhausted.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The cron expression did not parse.
    #[error("invalid cron expression '{expression}': {source}")]
    InvalidCron {
        expression: String,
        #[source]
        source: cron::error::Error,
    },

    /// `cron` and `delay_ms` were both set; they are mutually exclusive
    /// scheduling modes.
    #[error("job options set both a cron expression and a delay")]
    ConflictingOptions,

    /// The scheduler has been stopped and accepts no new jobs.
    #[error("scheduler is stopped")]
    Stopped,

    /// Durable backend error.
    #[error("queue error: {0}")]
    Queue(#[from] tempo_queue::QueueError),
}
