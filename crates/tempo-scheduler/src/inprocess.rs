//! In-process scheduler backend.
//!
//! Timer-driven and entirely in-memory: each job gets a driver task that
//! arms its own timers (initial delay, cron ticks, retry backoff) and runs
//! the attempt sequence. A generation counter per scheduled job makes late
//! timer fires no-ops after teardown or after the same explicit id is
//! re-scheduled, and `stop` aborts every driver before its next fire.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::Scheduler;
use crate::callbacks::CallbackRegistry;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::{
    CompletedCallback, FailedCallback, JobData, JobFailure, JobHandler, JobId, JobOptions,
    JobOutput, ScheduleMode, SchedulerError,
};

/// Scheduler that runs jobs on in-process timers.
///
/// Cheap to clone; all clones share the same job table and callbacks.
#[derive(Clone)]
pub struct InProcessScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    /// Live jobs by id. At most one entry (and one driver) per id.
    tasks: RwLock<HashMap<JobId, TaskEntry>>,
    callbacks: CallbackRegistry,
    stopped: AtomicBool,
    generations: AtomicU64,
}

struct TaskEntry {
    /// Generation the entry was created under. A timer fire whose
    /// generation no longer matches belongs to a torn-down or replaced
    /// job and must do nothing.
    generation: u64,
    driver: JoinHandle<()>,
}

impl InProcessScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: RwLock::new(HashMap::new()),
                callbacks: CallbackRegistry::new(),
                stopped: AtomicBool::new(false),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Submit a job.
    ///
    /// Scheduling mode comes from `options`: immediate when neither `cron`
    /// nor `delay_ms` is set, one-shot delayed, or repeating cron.
    /// Configuration errors surface here, synchronously; handler failures
    /// only ever reach the failure callback. Re-using a live explicit
    /// `job_id` cancels the previous job with that id.
    #[tracing::instrument(skip(self, handler, data))]
    pub async fn schedule(
        &self,
        handler: JobHandler,
        data: JobData,
        options: JobOptions,
    ) -> Result<JobId, SchedulerError> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(SchedulerError::Stopped);
        }

        let mode = options.schedule_mode()?;
        let id = options
            .job_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst);
        let policy = RetryPolicy::new(options.retry_limit);

        // Hold the write lock across spawn+insert so the driver's first
        // liveness check cannot run before its entry exists.
        let mut tasks = self.inner.tasks.write().await;
        // `stop` sets the flag before draining under this lock, so a
        // check under the lock cannot race it. The unlocked check above
        // is only a fast path.
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(SchedulerError::Stopped);
        }
        if let Some(previous) = tasks.remove(&id) {
            previous.driver.abort();
            debug!(job_id = %id, "replaced live job with same id");
        }
        let driver = tokio::spawn(drive_job(
            Arc::clone(&self.inner),
            id.clone(),
            generation,
            handler,
            data,
            policy,
            mode,
        ));
        tasks.insert(id.clone(), TaskEntry { generation, driver });
        drop(tasks);

        info!(job_id = %id, retry_limit = options.retry_limit, "scheduled job");
        Ok(id)
    }

    /// Set the completion callback, replacing any previous one.
    pub fn on_completed(&self, callback: CompletedCallback) -> &Self {
        self.inner.callbacks.set_completed(callback);
        self
    }

    /// Set the failure callback, replacing any previous one.
    pub fn on_failed(&self, callback: FailedCallback) -> &Self {
        self.inner.callbacks.set_failed(callback);
        self
    }

    /// Stop the scheduler.
    ///
    /// Cancels every pending timer — initial runs, delayed runs, cron
    /// ticks, and backoff retries — so no handler or callback is invoked
    /// afterwards. Idempotent; the scheduler accepts no new jobs.
    pub async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let mut tasks = self.inner.tasks.write().await;
        for (id, entry) in tasks.drain() {
            entry.driver.abort();
            debug!(job_id = %id, "cancelled job");
        }
        info!("scheduler stopped");
    }

    /// Number of live jobs.
    pub async fn job_count(&self) -> usize {
        self.inner.tasks.read().await.len()
    }
}

impl Default for InProcessScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scheduler for InProcessScheduler {
    async fn schedule(
        &self,
        handler: JobHandler,
        data: JobData,
        options: JobOptions,
    ) -> Result<JobId, SchedulerError> {
        InProcessScheduler::schedule(self, handler, data, options).await
    }

    fn on_completed(&self, callback: CompletedCallback) {
        InProcessScheduler::on_completed(self, callback);
    }

    fn on_failed(&self, callback: FailedCallback) {
        InProcessScheduler::on_failed(self, callback);
    }

    async fn stop(&self) {
        InProcessScheduler::stop(self).await;
    }
}

impl Inner {
    /// Whether the job is still the live occupant of its id.
    async fn is_live(&self, id: &str, generation: u64) -> bool {
        self.tasks
            .read()
            .await
            .get(id)
            .is_some_and(|entry| entry.generation == generation)
    }

    /// Remove the job's bookkeeping, if it is still this generation's.
    /// Idempotent; late calls for replaced jobs do nothing.
    async fn teardown(&self, id: &str, generation: u64) {
        let mut tasks = self.tasks.write().await;
        if tasks
            .get(id)
            .is_some_and(|entry| entry.generation == generation)
        {
            tasks.remove(id);
            debug!(job_id = %id, "job torn down");
        }
    }
}

/// Drive one scheduled job: wait for each firing, run its attempt
/// sequence, and tear the job down once it has no further firings.
async fn drive_job(
    inner: Arc<Inner>,
    id: JobId,
    generation: u64,
    handler: JobHandler,
    data: JobData,
    policy: RetryPolicy,
    mode: ScheduleMode,
) {
    match mode {
        ScheduleMode::Immediate => {
            run_attempt_sequence(&inner, &id, generation, &handler, &data, policy).await;
            inner.teardown(&id, generation).await;
        }
        ScheduleMode::Delayed(delay) => {
            sleep(delay).await;
            if !inner.is_live(&id, generation).await {
                debug!(job_id = %id, "delay timer fired for removed job, ignoring");
                return;
            }
            run_attempt_sequence(&inner, &id, generation, &handler, &data, policy).await;
            inner.teardown(&id, generation).await;
        }
        ScheduleMode::Cron(schedule) => loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                debug!(job_id = %id, "cron schedule exhausted");
                inner.teardown(&id, generation).await;
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            sleep(wait).await;
            if !inner.is_live(&id, generation).await {
                debug!(job_id = %id, "cron tick fired for removed job, ignoring");
                return;
            }
            // Each firing is an independent attempt sequence: the retry
            // counter starts at zero again.
            run_attempt_sequence(&inner, &id, generation, &handler, &data, policy).await;
        },
    }
}

/// Run the handler until it succeeds, retries exhaust, or the job is torn
/// down, and deliver exactly one terminal callback.
async fn run_attempt_sequence(
    inner: &Inner,
    id: &str,
    generation: u64,
    handler: &JobHandler,
    data: &JobData,
    policy: RetryPolicy,
) {
    let mut attempts = 0u32;
    loop {
        // Also reached on retry timer fire: a torn-down job must not
        // re-execute.
        if !inner.is_live(id, generation).await {
            debug!(job_id = %id, "attempt timer fired for removed job, ignoring");
            return;
        }

        let attempt = attempts + 1;
        match handler(data.clone()).await {
            Ok(value) => {
                debug!(job_id = %id, attempt, "job completed");
                inner
                    .callbacks
                    .notify_completed(data.clone(), JobOutput { value, attempt })
                    .await;
                return;
            }
            Err(message) => match policy.on_failure(&mut attempts) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        job_id = %id,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %message,
                        "job attempt failed, retrying after backoff"
                    );
                    sleep(delay).await;
                }
                RetryDecision::Exhausted => {
                    error!(
                        job_id = %id,
                        attempt,
                        error = %message,
                        "job failed, retries exhausted"
                    );
                    inner
                        .callbacks
                        .notify_failed(data.clone(), JobFailure { message })
                        .await;
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_handler() -> JobHandler {
        Arc::new(|data| Box::pin(async move { Ok(data) }))
    }

    #[tokio::test]
    async fn test_schedule_after_stop_fails() {
        let scheduler = InProcessScheduler::new();
        scheduler.stop().await;
        let err = scheduler
            .schedule(noop_handler(), json!({}), JobOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Stopped));
    }

    #[tokio::test]
    async fn test_generated_ids_are_distinct() {
        let scheduler = InProcessScheduler::new();
        let a = scheduler
            .schedule(noop_handler(), json!({}), JobOptions::default())
            .await
            .unwrap();
        let b = scheduler
            .schedule(noop_handler(), json!({}), JobOptions::default())
            .await
            .unwrap();
        assert_ne!(a, b);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_explicit_id_is_kept() {
        let scheduler = InProcessScheduler::new();
        let id = scheduler
            .schedule(
                noop_handler(),
                json!({}),
                JobOptions {
                    job_id: Some("custom-id".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(id, "custom-id");
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_cron_fails_synchronously() {
        let scheduler = InProcessScheduler::new();
        let err = scheduler
            .schedule(
                noop_handler(),
                json!({}),
                JobOptions {
                    cron: Some("bad expression".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCron { .. }));
        assert_eq!(scheduler.job_count().await, 0);
    }
}
