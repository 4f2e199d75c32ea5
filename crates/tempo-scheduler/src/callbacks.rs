//! Callback dispatcher.
//!
//! Holds at most one completion and one failure callback; later
//! registration replaces the earlier callback rather than adding a second
//! listener. Dispatch awaits the callback but swallows anything it does
//! wrong, so a misbehaving callback can delay recognition of an outcome
//! but never reach the scheduling logic.

use std::panic::AssertUnwindSafe;
use std::sync::Mutex;

use futures_util::FutureExt;
use tracing::{debug, warn};

use crate::{CompletedCallback, FailedCallback, JobData, JobFailure, JobOutput};

/// Registry of completion/failure callbacks for one scheduler instance.
#[derive(Default)]
pub struct CallbackRegistry {
    completed: Mutex<Option<CompletedCallback>>,
    failed: Mutex<Option<FailedCallback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the completion callback, replacing any previous one.
    pub fn set_completed(&self, callback: CompletedCallback) {
        *lock_or_recover(&self.completed) = Some(callback);
    }

    /// Set the failure callback, replacing any previous one.
    pub fn set_failed(&self, callback: FailedCallback) {
        *lock_or_recover(&self.failed) = Some(callback);
    }

    /// Deliver a successful terminal outcome.
    ///
    /// With no callback registered the outcome is dropped, not queued.
    pub async fn notify_completed(&self, data: JobData, output: JobOutput) {
        let callback = lock_or_recover(&self.completed).clone();
        match callback {
            Some(callback) => {
                if AssertUnwindSafe(callback(data, output))
                    .catch_unwind()
                    .await
                    .is_err()
                {
                    warn!("completion callback panicked");
                }
            }
            None => debug!("no completion callback registered, dropping result"),
        }
    }

    /// Deliver a failed terminal outcome.
    pub async fn notify_failed(&self, data: JobData, failure: JobFailure) {
        let callback = lock_or_recover(&self.failed).clone();
        match callback {
            Some(callback) => {
                if AssertUnwindSafe(callback(data, failure))
                    .catch_unwind()
                    .await
                    .is_err()
                {
                    warn!("failure callback panicked");
                }
            }
            None => debug!("no failure callback registered, dropping error"),
        }
    }
}

/// Lock a callback slot, recovering the guard if a panicking callback
/// registration ever poisoned it.
fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
