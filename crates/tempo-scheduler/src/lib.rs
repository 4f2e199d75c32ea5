//! Unified job scheduler for tempo.
//!
//! Callers register completion/failure callbacks once, then submit jobs
//! that run immediately, after a fixed delay, or repeatedly on a cron
//! expression. Failed runs are retried with exponential backoff up to a
//! per-job limit, and exactly one callback fires per terminal outcome.
//!
//! Two backends implement the same [`Scheduler`] contract:
//!
//! - [`InProcessScheduler`] — timer-driven, nothing survives a restart.
//!   Retry counting and backoff live here, in [`RetryPolicy`].
//! - [`DurableScheduler`] — delegates storage, delivery, and retry
//!   counting to an external [`tempo_queue::JobQueue`]. Supports per-job
//!   priority; there is no backoff between the queue's native tries.
//!
//! Pick a backend directly or through [`create_scheduler`].

mod backend;
mod callbacks;
mod durable;
mod error;
mod inprocess;
mod retry;
mod types;

pub use backend::{BackendKind, Scheduler, SchedulerConfig, create_scheduler};
pub use callbacks::CallbackRegistry;
pub use durable::DurableScheduler;
pub use error::SchedulerError;
pub use inprocess::InProcessScheduler;
pub use retry::{BACKOFF_BASE_MS, RetryDecision, RetryPolicy};
pub use types::{
    CompletedCallback, FailedCallback, JobData, JobFailure, JobHandler, JobId, JobOptions,
    JobOutput, ScheduleMode,
};
