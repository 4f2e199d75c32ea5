//! Error types for the queue contract.

use thiserror::Error;

/// Errors that can occur in queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A job was added before any processor was bound.
    #[error("no processor bound for queue '{0}'")]
    NoProcessor(String),

    /// The queue has been closed.
    #[error("queue '{0}' is closed")]
    Closed(String),

    /// A repeating job carried an invalid cron expression.
    #[error("invalid cron expression '{expression}': {source}")]
    InvalidCron {
        expression: String,
        #[source]
        source: cron::error::Error,
    },
}
