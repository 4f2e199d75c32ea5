//! Backend selection.
//!
//! Both backends expose the same capability surface — schedule, register
//! callbacks, stop — behind the [`Scheduler`] trait, so callers can stay
//! backend-agnostic. They do not promise feature parity: the durable
//! variant adds priority and whatever durability its queue provides, and
//! owns retry counting natively (total tries, no backoff), while the
//! in-process variant runs the exponential-backoff retry policy and
//! ignores priority.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tempo_queue::MemoryQueue;

use crate::{
    CompletedCallback, DurableScheduler, FailedCallback, InProcessScheduler, JobData, JobHandler,
    JobId, JobOptions, SchedulerError,
};

/// Uniform contract over scheduler backends.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Submit a job: the handler runs against `data` per `options`.
    /// Configuration errors are returned synchronously; handler failures
    /// go to the failure callback.
    async fn schedule(
        &self,
        handler: JobHandler,
        data: JobData,
        options: JobOptions,
    ) -> Result<JobId, SchedulerError>;

    /// Set the completion callback, replacing any previous one.
    fn on_completed(&self, callback: CompletedCallback);

    /// Set the failure callback, replacing any previous one.
    fn on_failed(&self, callback: FailedCallback);

    /// Stop the scheduler. Resolves once no further handler or callback
    /// invocation can happen; immediate for the in-process backend.
    async fn stop(&self);
}

/// Which backend a scheduler runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Timer-driven, in-memory. Jobs do not survive the process.
    #[default]
    InProcess,
    /// Backed by a durable queue.
    Durable,
}

/// Scheduler construction options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub backend: BackendKind,
    /// Queue name for the durable backend; also used in its logs.
    pub queue_name: Option<String>,
}

/// Construct a scheduler for the configured backend.
///
/// The durable variant is built on the in-memory reference queue; to run
/// against an external queue service, construct [`DurableScheduler`]
/// directly with that queue.
pub fn create_scheduler(config: SchedulerConfig) -> Arc<dyn Scheduler> {
    match config.backend {
        BackendKind::InProcess => Arc::new(InProcessScheduler::new()),
        BackendKind::Durable => {
            let name = config.queue_name.unwrap_or_else(|| "tempo".to_string());
            Arc::new(DurableScheduler::new(Arc::new(MemoryQueue::new(name))))
        }
    }
}
