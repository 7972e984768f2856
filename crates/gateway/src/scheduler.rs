//! Background Refresh Scheduler
//!
//! Renews the access credential on a fixed interval while a session is
//! active, so most requests never see a 401. Ticks go through
//! `Gateway::refresh_session`, which means a tick and a 401-triggered
//! refresh can never both be on the wire.
//!
//! At most one timer task exists: `arm` replaces the previous one. Each arm
//! gets a new generation; a failing tick only disarms the scheduler if its
//! generation is still the current one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::gateway::Gateway;

struct Inner {
    gateway: Gateway,
    interval: Duration,
    generation: AtomicU64,
    /// Generation changes happen under this lock.
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = task.take() {
            running.abort();
            debug!("refresh scheduler dropped, timer stopped");
        }
    }
}

/// Handle to the process-wide refresh timer. Clones share it.
#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<Inner>,
}

impl RefreshScheduler {
    pub fn new(gateway: Gateway, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                gateway,
                interval,
                generation: AtomicU64::new(0),
                task: Mutex::new(None),
            }),
        }
    }

    /// Start the timer, replacing any running one. Returns the new generation.
    pub fn arm(&self) -> u64 {
        let mut task = self.lock_task();
        if let Some(previous) = task.take() {
            previous.abort();
            debug!("replacing running refresh timer");
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *task = Some(tokio::spawn(run_timer(
            Arc::downgrade(&self.inner),
            generation,
            self.inner.interval,
        )));
        info!(
            generation,
            interval_secs = self.inner.interval.as_secs(),
            "refresh scheduler armed"
        );
        generation
    }

    /// Stop the timer. Returns `false` if it was not running.
    pub fn disarm(&self) -> bool {
        let mut task = self.lock_task();
        let Some(running) = task.take() else {
            return false;
        };
        running.abort();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        info!("refresh scheduler disarmed");
        true
    }

    pub fn is_armed(&self) -> bool {
        self.lock_task().is_some()
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Run one tick. Returns `false` when the timer should stop.
    async fn tick(&self, generation: u64) -> bool {
        let gateway = &self.inner.gateway;
        if !gateway.store().is_active_session().await {
            debug!("no active session, skipping proactive refresh");
            return true;
        }

        match gateway.refresh_session().await {
            Ok(()) => {
                debug!("proactive refresh succeeded");
                true
            }
            Err(Error::SessionEnded) => {
                debug!("session changed during proactive refresh");
                true
            }
            Err(e) => {
                warn!(error = %e, generation, "proactive refresh failed, disarming scheduler");
                self.retire(generation);
                false
            }
        }
    }

    /// Drop the timer handle from inside its own task, unless a newer arm
    /// already replaced it.
    fn retire(&self, generation: u64) {
        let mut task = self.lock_task();
        if self.generation() != generation {
            return;
        }
        task.take();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_timer(inner: Weak<Inner>, generation: u64, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick is immediate; the session was just established
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let scheduler = RefreshScheduler { inner };
        if !scheduler.tick(generation).await {
            return;
        }
    }
}
