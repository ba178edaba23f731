//! Shared Tokio runtime for watchdog timers.
//!
//! Every timed execution arms a [`Watchdog`](super::Watchdog), which spawns
//! its deadline future on this runtime instead of starting an OS thread per
//! call.
//!
//! # Configuration
//!
//! The number of worker threads can be set through the `JSVM_WATCHDOG_THREADS`
//! environment variable. It is read once, when the first watchdog is armed.
//!
//! ```bash
//! # Set to 2 worker threads (default is 1)
//! export JSVM_WATCHDOG_THREADS=2
//! ```

use std::sync::LazyLock;

use tokio::runtime::Runtime;

/// Environment variable to configure the number of watchdog runtime worker threads.
pub(crate) const ENV_WATCHDOG_THREADS: &str = "JSVM_WATCHDOG_THREADS";

/// A watchdog only sleeps and flips a flag, so one thread serves them all.
const DEFAULT_WATCHDOG_RUNTIME_WORKERS: usize = 1;

/// Lazily initialized on first access. A failure to build the runtime is
/// cached: every later watchdog fails to arm.
static WATCHDOG_RUNTIME: LazyLock<Option<Runtime>> = LazyLock::new(|| {
    let workers = std::env::var(ENV_WATCHDOG_THREADS)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_WATCHDOG_RUNTIME_WORKERS);

    match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name("jsvm-watchdog")
        .enable_time()
        .build()
    {
        Ok(rt) => {
            tracing::debug!(workers, "Initialized watchdog runtime");
            Some(rt)
        }
        Err(e) => {
            tracing::error!(
                "Failed to create watchdog runtime: {}. Timed executions will be refused.",
                e
            );
            None
        }
    }
});

/// The shared watchdog runtime, or `None` if it could not be created.
pub(crate) fn get_watchdog_runtime() -> Option<&'static Runtime> {
    WATCHDOG_RUNTIME.as_ref()
}
