// SPDX-License-Identifier: GPL-3.0-only
//! Capture threads
//!
//! V4L2 reads block, so every open camera runs its capture loop on a
//! dedicated thread. The thread opens the device itself, reports the outcome
//! once through a oneshot channel, then iterates until it is stopped or the
//! loop asks to stop.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Action returned by the capture loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a capture loop running in a separate thread
///
/// Dropping the controller signals the thread without waiting for it; a
/// blocked read finishes on its own timeout.
pub struct CaptureThread {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl CaptureThread {
    /// Start a capture loop that builds its state on the capture thread.
    ///
    /// `init_fn` runs once; its outcome is sent on the returned receiver
    /// before the first iteration. The state never leaves the thread, so it
    /// need not be `Send`.
    pub fn start_with_init<S, E, I, F>(
        name: &str,
        init_fn: I,
        mut loop_fn: F,
    ) -> (Self, oneshot::Receiver<Result<(), E>>)
    where
        S: 'static,
        E: Display + Send + 'static,
        I: FnOnce() -> Result<S, E> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();
        let (ready_tx, ready_rx) = oneshot::channel();

        info!(name = %name, "Starting capture thread");

        let thread_handle = thread::spawn(move || {
            let mut state = match init_fn() {
                Ok(s) => {
                    debug!(name = %name_clone, "Capture initialised");
                    let _ = ready_tx.send(Ok(()));
                    s
                }
                Err(e) => {
                    warn!(name = %name_clone, error = %e, "Capture initialisation failed");
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            loop {
                if stop_signal_clone.load(Ordering::SeqCst) {
                    debug!(name = %name_clone, "Stop signal received");
                    break;
                }

                match loop_fn(&mut state) {
                    LoopAction::Continue => {}
                    LoopAction::Stop => {
                        debug!(name = %name_clone, "Loop requested stop");
                        break;
                    }
                }
            }

            info!(name = %name_clone, "Capture thread exiting");
        });

        let controller = Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        };
        (controller, ready_rx)
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop without waiting
    pub fn request_stop(&self) {
        if !self.stop_signal.swap(true, Ordering::SeqCst) {
            debug!(name = %self.name, "Requesting capture thread stop");
        }
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without sending the stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Capture thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.request_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn test_loop_stops_itself() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let (mut controller, ready) = CaptureThread::start_with_init(
            "test-loop",
            || Ok::<_, String>(()),
            move |_| {
                let count = counter_clone.fetch_add(1, Ordering::SeqCst);
                if count >= 10 {
                    LoopAction::Stop
                } else {
                    LoopAction::Continue
                }
            },
        );

        assert!(ready.blocking_recv().unwrap().is_ok());
        controller.join();
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_stop_signal() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let (mut controller, _ready) = CaptureThread::start_with_init(
            "test-loop",
            || Ok::<_, String>(()),
            move |_| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                LoopAction::Continue
            },
        );

        thread::sleep(Duration::from_millis(50));
        controller.stop();
        assert!(counter.load(Ordering::SeqCst) > 0);
        assert!(!controller.is_running());
    }

    #[test]
    fn test_state_built_on_thread() {
        let result = Arc::new(AtomicU32::new(0));
        let result_clone = Arc::clone(&result);

        let (mut controller, _ready) = CaptureThread::start_with_init(
            "test-init-loop",
            || Ok::<_, String>(std::rc::Rc::new(42u32)),
            move |state| {
                result_clone.store(**state, Ordering::SeqCst);
                LoopAction::Stop
            },
        );

        controller.join();
        assert_eq!(result.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_init_failure_reported() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);

        let (mut controller, ready) = CaptureThread::start_with_init(
            "test-fail-init",
            || Err::<(), _>("Device or resource busy".to_string()),
            move |_: &mut ()| {
                ran_clone.store(true, Ordering::SeqCst);
                LoopAction::Stop
            },
        );

        let outcome = ready.blocking_recv().unwrap();
        assert_eq!(outcome.unwrap_err(), "Device or resource busy");
        controller.join();
        assert!(!ran.load(Ordering::SeqCst));
    }
}
