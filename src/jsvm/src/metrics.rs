/*!
This module contains the definitions and implementations of the metrics emitted while creating contexts and running scripts
*/

#[cfg(feature = "eval_metrics")]
use tracing::{instrument, Level};

// Gauges, live contexts
static METRIC_ACTIVE_CONTEXTS: &str = "active_contexts";

// Counters, totals during the lifetime of the process
static METRIC_TOTAL_CONTEXTS: &str = "contexts_created_total";
pub(crate) static METRIC_SCRIPTS_COMPILED: &str = "scripts_compiled_total";
pub(crate) static METRIC_SCRIPT_TIMEOUTS: &str = "script_timeouts_total";

// Counters, watchdog terminations
pub(crate) static METRIC_WATCHDOG_FIRED: &str = "watchdog_fired_total";

// Histogram, time spent in each entry point
#[cfg(feature = "eval_metrics")]
static METRIC_EVAL_DURATION: &str = "eval_duration_micros";
#[cfg(feature = "eval_metrics")]
static METRIC_ENTRY_POINT: &str = "entry_point";

/// Counts a context for as long as it is alive.
#[derive(Debug)]
pub(crate) struct ContextMetricsGuard(());

impl ContextMetricsGuard {
    pub(crate) fn new() -> Self {
        metrics::gauge!(METRIC_ACTIVE_CONTEXTS).increment(1);
        metrics::counter!(METRIC_TOTAL_CONTEXTS).increment(1);
        Self(())
    }
}

impl Drop for ContextMetricsGuard {
    fn drop(&mut self) {
        metrics::gauge!(METRIC_ACTIVE_CONTEXTS).decrement(1);
    }
}

#[cfg(feature = "eval_metrics")]
pub(crate) struct EvalMetricGuard {
    entry_point: &'static str,
    start: std::time::Instant,
}

#[cfg(feature = "eval_metrics")]
impl EvalMetricGuard {
    #[instrument(skip_all, level=Level::TRACE)]
    pub(crate) fn new(entry_point: &'static str) -> Self {
        Self {
            entry_point,
            start: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "eval_metrics")]
impl Drop for EvalMetricGuard {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        metrics::histogram!(METRIC_EVAL_DURATION, METRIC_ENTRY_POINT => self.entry_point)
            .record(duration.as_micros() as f64);
    }
}

#[cfg(test)]
mod tests {
    use metrics_util::debugging::DebugValue;

    use crate::{RunOptions, VmBuilder};

    #[test]
    fn temporary_contexts_stay_counted_while_they_run() {
        let recorder = metrics_util::debugging::DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            let mut vm = VmBuilder::new().with_console_output(false).build().unwrap();
            vm.register_host_function("activeContexts", move |_: i32| -> anyhow::Result<f64> {
                let active = snapshotter
                    .snapshot()
                    .into_vec()
                    .into_iter()
                    .find(|(key, ..)| key.key().name() == "active_contexts")
                    .map(|(.., value)| value);
                match active {
                    Some(DebugValue::Gauge(g)) => Ok(g.into_inner()),
                    _ => Ok(-1.0),
                }
            })
            .unwrap();
            let active: f64 = vm
                .run_in_this_context(
                    "NodeScript.runInNewContext('activeContexts(0)', { activeContexts: activeContexts })",
                    &RunOptions::default(),
                )
                .unwrap();
            assert_eq!(active, 1.0);
        });
    }

    #[test]
    #[ignore = "Needs to run separately to not get influenced by other tests"]
    fn test_metrics() {
        let recorder = metrics_util::debugging::DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        recorder.install().unwrap();

        let snapshot = {
            let mut vm = VmBuilder::new().with_console_output(false).build().unwrap();
            let context = vm.create_context::<serde_json::Value>(None).unwrap();
            let () = vm
                .run_in_context("var a = 1; undefined", &context, &RunOptions::default())
                .unwrap();
            vm.release(context).unwrap();
            let err = vm
                .run_in_new_context::<(), _>(
                    "while (true) {}",
                    &mut serde_json::json!({}),
                    &RunOptions::default().with_timeout_ms(20),
                )
                .unwrap_err();
            assert!(matches!(err, crate::VmError::TimedOut));
            vm.collect_garbage();
            snapshotter.snapshot()
        };
        let snapshot = snapshot.into_vec();
        println!("Metrics snapshot: {:#?}", snapshot);

        let value_of = |name: &str| {
            snapshot
                .iter()
                .filter(|(key, ..)| key.key().name() == name)
                .map(|(.., value)| value)
                .next()
        };
        assert_eq!(value_of("contexts_created_total"), Some(&DebugValue::Counter(2)));
        assert_eq!(value_of("scripts_compiled_total"), Some(&DebugValue::Counter(2)));
        assert_eq!(value_of("script_timeouts_total"), Some(&DebugValue::Counter(1)));
        assert_eq!(value_of("watchdog_fired_total"), Some(&DebugValue::Counter(1)));
        // the context above is unreachable by now, the temporary one too
        assert!(matches!(
            value_of("active_contexts"),
            Some(DebugValue::Gauge(g)) if g.into_inner() == 0.0
        ));
        if cfg!(feature = "eval_metrics") {
            assert!(value_of("eval_duration_micros").is_some());
        }
    }
}
