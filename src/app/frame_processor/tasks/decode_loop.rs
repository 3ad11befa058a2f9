// SPDX-License-Identifier: GPL-3.0-only

//! Periodic decode loop with a busy guard
//!
//! A [`DecodeLoop`] fires on a fixed period. Each tick asks the strategy for
//! an attempt; the attempt runs as its own task so ticks keep their cadence,
//! and while it is pending the busy flag makes later ticks skip instead of
//! queueing work. Stopping aborts the ticker and any pending attempt at once.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Clears the busy flag when an attempt finishes, panics or is aborted
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to a running decode loop; stops the loop when dropped
pub struct DecodeLoop {
    name: String,
    stop_signal: Arc<AtomicBool>,
    busy: Arc<AtomicBool>,
    ticker: Option<JoinHandle<()>>,
    in_flight: Arc<Mutex<Option<AbortHandle>>>,
}

impl DecodeLoop {
    /// Start ticking every `period`.
    ///
    /// `attempt` returns `None` to skip a tick (nothing to decode yet) or a
    /// future performing one decode attempt. Must be called from within a
    /// tokio runtime.
    pub fn start<F, Fut>(name: &str, period: Duration, mut attempt: F) -> Self
    where
        F: FnMut() -> Option<Fut> + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let busy = Arc::new(AtomicBool::new(false));
        let in_flight: Arc<Mutex<Option<AbortHandle>>> = Arc::new(Mutex::new(None));

        let loop_stop = Arc::clone(&stop_signal);
        let loop_busy = Arc::clone(&busy);
        let loop_in_flight = Arc::clone(&in_flight);
        let loop_name = name.to_string();
        let period = period.max(Duration::from_millis(1));

        debug!(name = %name, period_ms = period.as_millis(), "Starting decode loop");

        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                if loop_stop.load(Ordering::SeqCst) {
                    break;
                }
                if loop_busy.load(Ordering::SeqCst) {
                    trace!(name = %loop_name, "Previous attempt pending, tick skipped");
                    continue;
                }
                let Some(work) = attempt() else {
                    continue;
                };

                loop_busy.store(true, Ordering::SeqCst);
                let guard = BusyGuard(Arc::clone(&loop_busy));
                let task = tokio::spawn(async move {
                    let _guard = guard;
                    work.await;
                });
                *loop_in_flight.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some(task.abort_handle());
            }

            debug!(name = %loop_name, "Decode loop exiting");
        });

        Self {
            name: name.to_string(),
            stop_signal,
            busy,
            ticker: Some(ticker),
            in_flight,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.ticker.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Whether a decode attempt is pending
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Stop ticking and abort any pending attempt. Idempotent.
    pub fn stop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(ticker) = self.ticker.take() {
            debug!(name = %self.name, "Stopping decode loop");
            ticker.abort();
        }
        if let Some(pending) = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            pending.abort();
        }
    }
}

impl Drop for DecodeLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for DecodeLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeLoop")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("busy", &self.is_busy())
            .finish()
    }
}
