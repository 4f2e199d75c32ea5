//! Durable job queue contract for tempo.
//!
//! The scheduler's durable backend is an external service: a persistent
//! priority queue with its own worker pool and native retry counting. This
//! crate defines the boundary the scheduler talks through:
//!
//! - **Types**: [`QueueJob`], [`RepeatSpec`], [`QueueEvent`]
//! - **Contract**: the [`JobQueue`] trait (add jobs, bind a processor,
//!   subscribe to completed/failed events, close)
//! - **Reference implementation**: [`MemoryQueue`], an in-process queue
//!   with priority ordering, delayed delivery, and cron repeats, used for
//!   tests and local development

mod error;
mod memory;
mod types;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

pub use error::QueueError;
pub use memory::MemoryQueue;
pub use types::{QueueEvent, QueueJob, RepeatSpec};

/// Type alias for the function a queue runs against each job's payload.
pub type JobProcessor = Arc<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>> + Send + Sync,
>;

/// A durable priority queue the scheduler can delegate jobs to.
///
/// Implementations own delivery order, delayed and repeating jobs, and the
/// retry/attempt counter. They report terminal outcomes as [`QueueEvent`]s;
/// intermediate failed attempts are internal to the queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job for processing.
    ///
    /// Fails with [`QueueError::NoProcessor`] if no processor has been
    /// bound yet, and with [`QueueError::InvalidCron`] if the job carries
    /// an unparseable repeat expression. Both are checked here, before the
    /// job is accepted.
    async fn add(&self, job: QueueJob) -> Result<(), QueueError>;

    /// Bind the processor run against each job. A later call replaces the
    /// previous processor for jobs not yet started.
    async fn process(&self, processor: JobProcessor) -> Result<(), QueueError>;

    /// Subscribe to terminal job outcomes.
    fn subscribe(&self) -> broadcast::Receiver<QueueEvent>;

    /// Shut the queue down. No job or event is delivered afterwards.
    async fn close(&self) -> Result<(), QueueError>;
}
