//! Periodic wake for the refresh scheduler
//!
//! A [`WakeScheduler`] holds at most one pending request per task: "run no
//! earlier than T", or "run as soon as possible" when T is `None`. The
//! [`RefreshTask`] re-arms itself after every invocation and on expiry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::scheduler::{NextRun, RefreshScheduler};

/// Identifier the refresh task registers under
pub const UPDATE_TASK_ID: &str = "tunnelkit.update_profiles";

/// Errors submitting a wake request
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Task {0} is not registered")]
    NotRegistered(String),

    #[error("Wake scheduler refused the request: {0}")]
    Refused(String),
}

/// Platform collaborator that wakes registered tasks
pub trait WakeScheduler: Send + Sync {
    /// Register a recurring task
    fn register(&self, task_id: &str);

    /// Whether a run is already requested for the task
    fn has_pending(&self, task_id: &str) -> bool;

    /// Replace the task's pending request
    ///
    /// # Errors
    /// Returns an error if the task is unknown or the request is refused
    fn submit(&self, task_id: &str, earliest: Option<DateTime<Utc>>) -> Result<(), TriggerError>;
}

/// Glue between a [`WakeScheduler`] and the [`RefreshScheduler`]
pub struct RefreshTask {
    scheduler: RefreshScheduler,
    wake: Arc<dyn WakeScheduler>,
}

impl RefreshTask {
    #[must_use]
    pub fn new(scheduler: RefreshScheduler, wake: Arc<dyn WakeScheduler>) -> Self {
        Self { scheduler, wake }
    }

    /// Register the task and request the first run if one is due
    pub fn setup(&self) {
        self.wake.register(UPDATE_TASK_ID);
        if self.wake.has_pending(UPDATE_TASK_ID) {
            return;
        }

        match self.scheduler.next_run(Utc::now()) {
            Ok(NextRun::NotNeeded) => {
                tracing::debug!("no auto-updating profiles, refresh not scheduled");
            }
            Ok(NextRun::Immediate) => self.resubmit(None),
            Ok(NextRun::At(at)) => self.resubmit(Some(at)),
            Err(e) => tracing::warn!(error = %e, "failed to compute next refresh"),
        }
    }

    /// Run one refresh pass and re-arm
    ///
    /// After a completed pass the next run is one interval away, whatever the
    /// per-profile outcome. If the pass could not start, it is retried as
    /// soon as the scheduler allows.
    pub async fn on_invoke(&self) -> bool {
        match self.scheduler.run().await {
            Ok(report) => {
                self.resubmit(Some(Utc::now() + self.scheduler.interval()));
                report.success()
            }
            Err(e) => {
                tracing::warn!(error = %e, "refresh pass could not start");
                self.resubmit(None);
                false
            }
        }
    }

    /// The invocation ran out of time; ask to be woken again
    pub fn on_expire(&self) {
        tracing::warn!("refresh pass expired");
        self.resubmit(None);
    }

    fn resubmit(&self, earliest: Option<DateTime<Utc>>) {
        if let Err(e) = self.wake.submit(UPDATE_TASK_ID, earliest) {
            tracing::warn!(error = %e, "failed to schedule next refresh");
        }
    }
}

#[derive(Debug, Default)]
struct TriggerState {
    registered: HashSet<String>,
    pending: HashMap<String, Option<DateTime<Utc>>>,
}

/// In-process [`WakeScheduler`] driven by tokio timers
#[derive(Debug)]
pub struct TokioTrigger {
    state: Mutex<TriggerState>,
    changed: Notify,
    expiration: StdDuration,
}

impl Default for TokioTrigger {
    fn default() -> Self {
        Self::new(StdDuration::from_secs(5 * 60))
    }
}

impl TokioTrigger {
    /// Trigger whose invocations expire after `expiration`
    #[must_use]
    pub fn new(expiration: StdDuration) -> Self {
        Self {
            state: Mutex::new(TriggerState::default()),
            changed: Notify::new(),
            expiration,
        }
    }

    /// The pending request for a task, if any
    #[must_use]
    pub fn pending(&self, task_id: &str) -> Option<Option<DateTime<Utc>>> {
        self.lock().pending.get(task_id).copied()
    }

    /// Wake `task` whenever its pending request comes due, until cancelled
    pub async fn run(&self, task: &RefreshTask, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            let Some(earliest) = self.pending(UPDATE_TASK_ID) else {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = self.changed.notified() => {}
                }
                continue;
            };

            if let Some(at) = earliest {
                let wait = (at - Utc::now()).to_std().unwrap_or(StdDuration::ZERO);
                if !wait.is_zero() {
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        // a resubmission replaces the deadline
                        () = self.changed.notified() => continue,
                        () = tokio::time::sleep(wait) => {}
                    }
                }
            }

            self.lock().pending.remove(UPDATE_TASK_ID);
            tracing::debug!(task = UPDATE_TASK_ID, "invoking scheduled task");
            let invoked = tokio::select! {
                () = cancel.cancelled() => return,
                invoked = tokio::time::timeout(self.expiration, task.on_invoke()) => invoked,
            };
            if invoked.is_err() {
                task.on_expire();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, TriggerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WakeScheduler for TokioTrigger {
    fn register(&self, task_id: &str) {
        self.lock().registered.insert(task_id.to_string());
    }

    fn has_pending(&self, task_id: &str) -> bool {
        self.lock().pending.contains_key(task_id)
    }

    fn submit(&self, task_id: &str, earliest: Option<DateTime<Utc>>) -> Result<(), TriggerError> {
        {
            let mut state = self.lock();
            if !state.registered.contains(task_id) {
                return Err(TriggerError::NotRegistered(task_id.to_string()));
            }
            state.pending.insert(task_id.to_string(), earliest);
        }
        self.changed.notify_one();
        Ok(())
    }
}
