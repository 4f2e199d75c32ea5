//! In-memory reference queue.
//!
//! Implements the [`JobQueue`] contract without external storage: a single
//! dispatch worker pops due jobs in priority order and runs them one at a
//! time, which also serializes repeats of the same job. Retry counting is
//! native to the queue (`attempts` tries back-to-back, no backoff), matching
//! the semantics of production durable queues this stands in for.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep_until};
use tracing::{debug, warn};

use crate::{JobProcessor, JobQueue, QueueError, QueueEvent, QueueJob};

/// Capacity of the event channel handed to subscribers.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// An in-process [`JobQueue`].
pub struct MemoryQueue {
    state: Arc<QueueState>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct QueueState {
    name: String,
    processor: Mutex<Option<JobProcessor>>,
    pending: Mutex<Vec<PendingJob>>,
    events: broadcast::Sender<QueueEvent>,
    notify: Notify,
    closed: AtomicBool,
    seq: AtomicU64,
}

/// A queued job waiting to become due.
struct PendingJob {
    job: QueueJob,
    due_at: Instant,
    /// Insertion order, used to keep delivery FIFO within a priority.
    seq: u64,
}

impl MemoryQueue {
    /// Create a queue and start its dispatch worker.
    pub fn new(name: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = Arc::new(QueueState {
            name: name.into(),
            processor: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
            events,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            seq: AtomicU64::new(0),
        });

        let worker = tokio::spawn(dispatch_loop(Arc::clone(&state)));

        Self {
            state,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// The queue's name, used in errors and logs.
    pub fn name(&self) -> &str {
        &self.state.name
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn add(&self, job: QueueJob) -> Result<(), QueueError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed(self.state.name.clone()));
        }
        if self.state.processor.lock().await.is_none() {
            return Err(QueueError::NoProcessor(self.state.name.clone()));
        }
        // A repeating job's first run waits for its first cron fire, same
        // as every re-arm after it; only non-repeating jobs use delay_ms.
        let due_at = match &job.repeat {
            Some(repeat) => {
                let schedule =
                    Schedule::from_str(&repeat.cron).map_err(|source| QueueError::InvalidCron {
                        expression: repeat.cron.clone(),
                        source,
                    })?;
                let Some(next) = schedule.upcoming(Utc).next() else {
                    debug!(
                        queue = %self.state.name,
                        job_id = %job.job_id,
                        "repeat schedule has no upcoming fire, dropping job"
                    );
                    return Ok(());
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                Instant::now() + wait
            }
            None => Instant::now() + Duration::from_millis(job.delay_ms),
        };
        let seq = self.state.seq.fetch_add(1, Ordering::SeqCst);
        debug!(
            queue = %self.state.name,
            job_id = %job.job_id,
            attempts = job.attempts,
            delay_ms = job.delay_ms,
            priority = job.priority,
            repeating = job.repeat.is_some(),
            "queued job"
        );
        self.state
            .pending
            .lock()
            .await
            .push(PendingJob { job, due_at, seq });
        self.state.notify.notify_one();
        Ok(())
    }

    async fn process(&self, processor: JobProcessor) -> Result<(), QueueError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed(self.state.name.clone()));
        }
        *self.state.processor.lock().await = Some(processor);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.state.events.subscribe()
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.notify.notify_one();
        if let Some(worker) = self.worker.lock().await.take() {
            worker.abort();
        }
        self.state.pending.lock().await.clear();
        debug!(queue = %self.state.name, "queue closed");
        Ok(())
    }
}

/// Pop due jobs as they arrive and run them, one at a time.
async fn dispatch_loop(state: Arc<QueueState>) {
    loop {
        if state.closed.load(Ordering::SeqCst) {
            return;
        }

        if let Some(pending) = pop_due(&state).await {
            run_job(&state, pending.job).await;
            continue;
        }

        let next_due = next_due_at(&state).await;
        tokio::select! {
            _ = state.notify.notified() => {}
            _ = async {
                match next_due {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {}
        }
    }
}

/// Remove and return the best due job: lowest priority value first, then
/// insertion order. Returns `None` if nothing is due yet.
async fn pop_due(state: &QueueState) -> Option<PendingJob> {
    let mut pending = state.pending.lock().await;
    let now = Instant::now();

    let best = pending
        .iter()
        .enumerate()
        .filter(|(_, p)| p.due_at <= now)
        .min_by_key(|(_, p)| (p.job.priority, p.seq))
        .map(|(i, _)| i)?;

    Some(pending.swap_remove(best))
}

async fn next_due_at(state: &QueueState) -> Option<Instant> {
    state
        .pending
        .lock()
        .await
        .iter()
        .map(|p| p.due_at)
        .min()
}

/// Run one job to a terminal outcome and emit its event.
async fn run_job(state: &Arc<QueueState>, job: QueueJob) {
    let Some(processor) = state.processor.lock().await.clone() else {
        // Unreachable through `add`, which requires a bound processor.
        warn!(queue = %state.name, job_id = %job.job_id, "dropping job with no processor");
        return;
    };

    let max_tries = job.attempts.max(1);
    for attempt in 1..=max_tries {
        match processor(job.payload.clone()).await {
            Ok(result) => {
                debug!(
                    queue = %state.name,
                    job_id = %job.job_id,
                    attempt,
                    "job completed"
                );
                let _ = state.events.send(QueueEvent::Completed {
                    job_id: job.job_id.clone(),
                    payload: job.payload.clone(),
                    result,
                    attempt,
                });
                break;
            }
            Err(error) if attempt < max_tries => {
                debug!(
                    queue = %state.name,
                    job_id = %job.job_id,
                    attempt,
                    error = %error,
                    "job attempt failed, retrying"
                );
            }
            Err(error) => {
                warn!(
                    queue = %state.name,
                    job_id = %job.job_id,
                    attempt,
                    error = %error,
                    "job failed, tries exhausted"
                );
                let _ = state.events.send(QueueEvent::Failed {
                    job_id: job.job_id.clone(),
                    payload: job.payload.clone(),
                    error,
                    attempt,
                });
            }
        }
    }

    rearm_repeat(state, job).await;
}

/// Re-queue a repeating job for its next cron fire.
async fn rearm_repeat(state: &Arc<QueueState>, job: QueueJob) {
    let Some(repeat) = &job.repeat else {
        return;
    };

    // Validated at add time; a parse failure here drops the repeat.
    let Ok(schedule) = Schedule::from_str(&repeat.cron) else {
        warn!(queue = %state.name, job_id = %job.job_id, "repeat cron no longer parses, dropping");
        return;
    };
    let Some(next) = schedule.upcoming(Utc).next() else {
        debug!(queue = %state.name, job_id = %job.job_id, "repeat schedule exhausted");
        return;
    };

    let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    let due_at = Instant::now() + wait;
    let seq = state.seq.fetch_add(1, Ordering::SeqCst);
    debug!(
        queue = %state.name,
        job_id = %job.job_id,
        next_fire = %next,
        "re-armed repeating job"
    );
    state
        .pending
        .lock()
        .await
        .push(PendingJob { job, due_at, seq });
}
