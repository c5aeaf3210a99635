//! Periodic rescans with a single in-flight guard.
//!
//! The timer task and the manual reindex endpoint share one [`Rescanner`];
//! whichever arrives while a rescan is running is skipped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use crate::error::IndexError;
use crate::indexer::{self, RescanReport};
use crate::probe::ProbeRegistry;
use crate::store::SharedStore;

#[derive(Debug)]
pub enum RescanOutcome {
    Completed(RescanReport),
    /// Another rescan was already running
    Skipped,
    /// A fatal store error aborted the cycle
    Failed(IndexError),
}

pub struct Rescanner {
    store: SharedStore,
    registry: ProbeRegistry,
    running: AtomicBool,
    last_report: Mutex<Option<RescanReport>>,
}

/// Clears the in-flight flag on drop, including on panic
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Rescanner {
    pub fn new(store: SharedStore, registry: ProbeRegistry) -> Self {
        Self {
            store,
            registry,
            running: AtomicBool::new(false),
            last_report: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn last_report(&self) -> Option<RescanReport> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one full rescan on the current thread, unless one is in flight
    pub fn try_rescan(&self) -> RescanOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return RescanOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        match indexer::index_all(&self.store, &self.registry) {
            Ok(report) => {
                *self
                    .last_report
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
                RescanOutcome::Completed(report)
            }
            Err(e) => {
                error!(error = %e, "rescan aborted; retrying on the next tick");
                RescanOutcome::Failed(e)
            }
        }
    }

    /// [`Rescanner::try_rescan`] on the blocking pool
    pub async fn rescan(self: &Arc<Self>) -> RescanOutcome {
        let this = Arc::clone(self);
        match tokio::task::spawn_blocking(move || this.try_rescan()).await {
            Ok(outcome) => outcome,
            Err(e) => RescanOutcome::Failed(IndexError::Aborted(e.to_string())),
        }
    }
}

/// Spawn the periodic rescan task.
///
/// The first tick fires immediately. Each rescan is awaited before the
/// next tick, and ticks missed while it ran are dropped.
pub fn spawn(rescanner: Arc<Rescanner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match rescanner.rescan().await {
                RescanOutcome::Completed(report) => {
                    debug!(duration_ms = report.duration_ms, "rescan complete")
                }
                RescanOutcome::Skipped => debug!("rescan already running; tick skipped"),
                RescanOutcome::Failed(_) => {}
            }
        }
    })
}
