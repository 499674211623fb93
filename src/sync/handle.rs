//! Single-run-per-source bookkeeping.
//!
//! A [`RunHandle`] owns the published status of one source. Starting a run
//! hands out the only [`RunContext`], which the run's task uses to mutate the
//! status. Pollers read snapshots or subscribe to changes.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::{BurrowError, Result};
use crate::domain::{Counters, RunOutcome, RunStatus};

pub struct RunHandle<C: Counters> {
    label: &'static str,
    status: Arc<watch::Sender<RunStatus<C>>>,
    cancel: Arc<AtomicBool>,
}

impl<C: Counters> RunHandle<C> {
    pub fn new(label: &'static str) -> Self {
        let (status, _) = watch::channel(RunStatus::default());
        Self {
            label,
            status: Arc::new(status),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn status(&self) -> RunStatus<C> {
        self.status.borrow().clone()
    }

    /// Push-style alternative to polling [`status`](Self::status).
    pub fn subscribe(&self) -> watch::Receiver<RunStatus<C>> {
        self.status.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.status.borrow().running
    }

    /// Resets the status and hands out the run's context, unless a run is active.
    pub fn begin(&self, max_new_downloads: Option<u32>) -> Result<RunContext<C>> {
        if max_new_downloads == Some(0) {
            return Err(BurrowError::InvalidOptions(
                "max_new_downloads must be positive".to_string(),
            ));
        }

        let started = self.status.send_if_modified(|status| {
            if status.running {
                return false;
            }
            *status = RunStatus::begin(max_new_downloads);
            true
        });
        if !started {
            return Err(BurrowError::AlreadyRunning(self.label.to_string()));
        }

        self.cancel.store(false, Ordering::SeqCst);
        info!(source = self.label, ?max_new_downloads, "Sync run started");

        Ok(RunContext {
            label: self.label,
            status: self.status.clone(),
            cancel: self.cancel.clone(),
            finished: false,
        })
    }

    /// Begins a run and drives `job` on a background task.
    pub fn start<F, Fut>(&self, max_new_downloads: Option<u32>, job: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce(RunContext<C>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ctx = self.begin(max_new_downloads)?;
        Ok(tokio::spawn(job(ctx)))
    }

    /// Requests a cooperative stop. Observed at the run's next safe point.
    pub fn cancel(&self) -> Result<()> {
        let requested = self.status.send_if_modified(|status| {
            if !status.running {
                return false;
            }
            status.cancelled = true;
            status.current_message = "Cancelling...".to_string();
            true
        });
        if !requested {
            return Err(BurrowError::NotRunning(self.label.to_string()));
        }

        self.cancel.store(true, Ordering::SeqCst);
        info!(source = self.label, "Sync cancel requested");
        Ok(())
    }
}

/// Write access to the status of the one active run.
///
/// Dropping a context that was never finished ends the run as failed, so a
/// panicking or aborted task still returns the source to idle.
pub struct RunContext<C: Counters> {
    label: &'static str,
    status: Arc<watch::Sender<RunStatus<C>>>,
    cancel: Arc<AtomicBool>,
    finished: bool,
}

impl<C: Counters> RunContext<C> {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn update<F: FnOnce(&mut RunStatus<C>)>(&self, f: F) {
        self.status.send_modify(f);
    }

    pub fn counters(&self) -> C {
        self.status.borrow().counters.clone()
    }

    pub fn reached_limit(&self) -> bool {
        self.status.borrow().reached_limit()
    }

    pub fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| s.current_message = message);
    }

    pub fn record_error(&self, error: &BurrowError) {
        let message = error.to_string();
        self.update(|s| s.last_error = Some(message));
    }

    pub fn finish(mut self, outcome: RunOutcome) {
        self.finished = true;
        self.update(|s| s.finish(outcome));
        info!(source = self.label, ?outcome, "Sync run finished");
    }
}

impl<C: Counters> Drop for RunContext<C> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(source = self.label, "Sync run ended without finishing");
        self.status.send_modify(|s| {
            if s.last_error.is_none() {
                s.last_error = Some("run aborted".to_string());
            }
            s.finish(RunOutcome::Failed);
        });
    }
}

/// Consecutive local storage failures within one run.
#[derive(Debug)]
pub struct StorageStreak {
    count: u32,
    limit: u32,
}

impl StorageStreak {
    pub fn new(limit: u32) -> Self {
        Self {
            count: 0,
            limit: limit.max(1),
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Returns true once the limit is reached. Non-storage errors are ignored.
    pub fn record(&mut self, error: &BurrowError) -> bool {
        if !error.is_storage() {
            return false;
        }
        self.count += 1;
        if self.count >= self.limit {
            error!(storage_errors = self.count, "Repeated storage failures, ending run");
            return true;
        }
        false
    }
}
