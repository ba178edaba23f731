//! Time-bounded execution.
//!
//! A [`Watchdog`] is armed right before a script runs and stopped right after
//! it returns. If the deadline passes first, the watchdog asks the runtime to
//! terminate through its [`InterruptHandle`]; QuickJS notices the request
//! while running bytecode and unwinds with an uncatchable
//! `InternalError: interrupted`.
//!
//! Firing and stopping are serialized by a small state machine, so exactly
//! one of them wins:
//!
//! - stop wins: the deadline future is aborted and no termination request is
//!   ever made.
//! - fire wins: the request is made, and [`Watchdog::stop`] withdraws it
//!   again, so it can never leak into a later execution.
//!
//! Termination requests are counted by the handle, which lets watchdogs of
//! nested timed calls come and go without clearing each other's requests.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use jsvm_runtime::InterruptHandle;
use tokio::task::JoinHandle;

use crate::metrics::METRIC_WATCHDOG_FIRED;
use crate::{Result, new_error};

// Shared runtime for watchdog timers
pub(crate) mod runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Armed,
    Fired,
    Stopped,
}

fn record_watchdog_fired(timeout: Duration) {
    metrics::counter!(METRIC_WATCHDOG_FIRED).increment(1);
    tracing::warn!(
        timeout_ms = timeout.as_millis() as u64,
        "Watchdog fired, requesting script termination"
    );
}

/// Forcibly interrupts an execution that does not finish within a deadline.
///
/// Dropping an armed watchdog stops it, so early returns and panics cannot
/// leave a deadline running.
///
/// ```text
/// let watchdog = Watchdog::start(Duration::from_millis(50), InterruptHandle::from_ctx(&ctx)?)?;
/// let result = artifact.run(&ctx);
/// let timed_out = watchdog.stop();
/// ```
#[derive(Debug)]
pub struct Watchdog {
    state: Arc<Mutex<State>>,
    interrupt: InterruptHandle,
    task: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Arms a watchdog that terminates whatever `interrupt` belongs to once
    /// `timeout` has elapsed.
    ///
    /// # Errors
    ///
    /// Fails if `timeout` is zero or the shared timer runtime is unavailable.
    /// Callers must not run the script unguarded in that case.
    pub fn start(timeout: Duration, interrupt: InterruptHandle) -> Result<Self> {
        if timeout.is_zero() {
            return Err(new_error!("watchdog timeout must be non-zero"));
        }
        let runtime = runtime::get_watchdog_runtime()
            .ok_or_else(|| new_error!("watchdog runtime is unavailable"))?;

        let state = Arc::new(Mutex::new(State::Armed));
        let task = runtime.spawn({
            let state = state.clone();
            let interrupt = interrupt.clone();
            async move {
                tokio::time::sleep(timeout).await;
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                if *state == State::Armed {
                    interrupt.kill();
                    *state = State::Fired;
                    record_watchdog_fired(timeout);
                }
            }
        });

        Ok(Self {
            state,
            interrupt,
            task: Some(task),
        })
    }

    /// Disarms the watchdog. Returns whether it fired before being stopped,
    /// in which case its termination request has been withdrawn.
    pub fn stop(mut self) -> bool {
        self.disarm()
    }

    fn disarm(&mut self) -> bool {
        let Some(task) = self.task.take() else {
            return false;
        };
        let fired = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let fired = *state == State::Fired;
            if fired {
                self.interrupt.cancel();
            }
            *state = State::Stopped;
            fired
        };
        task.abort();
        fired
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}
