//! Prometheus metrics for the call dispatcher.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup, before building the
//! [`Dispatcher`](crate::Dispatcher). The helper functions (`inc_submitted`,
//! `set_queue_depth`, …) are no-ops if `init_metrics` was never called, so the
//! dispatcher is always safe to run and observability simply degrades.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `dispatcher_calls_submitted_total` | Counter | `priority` |
//! | `dispatcher_calls_finished_total` | Counter | `status` |
//! | `dispatcher_call_retries_total` | Counter | |
//! | `dispatcher_rate_limited_total` | Counter | |
//! | `dispatcher_provider_latency_seconds` | Histogram | `outcome` |
//! | `dispatcher_queue_depth` | Gauge | `priority` |
//! | `dispatcher_active_calls` | Gauge | |

use crate::call::CallStatus;
use crate::queue::Priority;
use crate::DispatchError;
use prometheus::{
    core::Collector, CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All dispatcher metrics, bundled so they can be stored in a single
/// [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Registry that owns all metric descriptors.
    pub registry: Registry,
    /// Calls accepted by `submit`, per priority tier.
    pub calls_submitted: CounterVec,
    /// Calls that reached a terminal status, per status.
    pub calls_finished: CounterVec,
    /// Calls requeued after a provider failure.
    pub call_retries: IntCounter,
    /// Scheduling passes denied by the rate limiter.
    pub rate_limited: IntCounter,
    /// Provider invocation latency, per outcome.
    pub provider_latency: HistogramVec,
    /// Current queued calls per priority tier.
    pub queue_depth: IntGaugeVec,
    /// Calls currently holding a concurrency slot.
    pub active_calls: IntGauge,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn register<C>(registry: &Registry, collector: C) -> Result<C, DispatchError>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| DispatchError::Other(format!("metrics registration failed: {e}")))?;
    Ok(collector)
}

fn init_err(e: prometheus::Error) -> DispatchError {
    DispatchError::Other(format!("metrics init failed: {e}"))
}

fn build(prefix: &str) -> Result<Metrics, DispatchError> {
    let registry = Registry::new();
    let name = |suffix: &str| format!("{prefix}_{suffix}");

    let calls_submitted = register(
        &registry,
        CounterVec::new(
            Opts::new(name("calls_submitted_total"), "Calls accepted for dispatch"),
            &["priority"],
        )
        .map_err(init_err)?,
    )?;
    let calls_finished = register(
        &registry,
        CounterVec::new(
            Opts::new(name("calls_finished_total"), "Calls reaching a terminal status"),
            &["status"],
        )
        .map_err(init_err)?,
    )?;
    let call_retries = register(
        &registry,
        IntCounter::new(name("call_retries_total"), "Calls requeued after a failure")
            .map_err(init_err)?,
    )?;
    let rate_limited = register(
        &registry,
        IntCounter::new(
            name("rate_limited_total"),
            "Scheduling passes denied by the rate limiter",
        )
        .map_err(init_err)?,
    )?;
    let provider_latency = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(
                name("provider_latency_seconds"),
                "Provider invocation latency",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
            &["outcome"],
        )
        .map_err(init_err)?,
    )?;
    let queue_depth = register(
        &registry,
        IntGaugeVec::new(
            Opts::new(name("queue_depth"), "Queued calls per priority tier"),
            &["priority"],
        )
        .map_err(init_err)?,
    )?;
    let active_calls = register(
        &registry,
        IntGauge::new(name("active_calls"), "Calls currently in flight").map_err(init_err)?,
    )?;

    Ok(Metrics {
        registry,
        calls_submitted,
        calls_finished,
        call_retries,
        rate_limited,
        provider_latency,
        queue_depth,
        active_calls,
    })
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`DispatchError::Other`] if metric construction or registration
/// fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), DispatchError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let bundle = build("dispatcher")?;
    // A racing initialiser builds identical descriptors; first one wins.
    let _ = METRICS.set(bundle);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count a submitted call.
///
/// No-op if metrics have not been initialised.
pub fn inc_submitted(priority: Priority) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .calls_submitted
            .get_metric_with_label_values(&[priority.as_str()])
        {
            c.inc();
        }
    }
}

/// Count a call reaching a terminal status.
///
/// No-op if metrics have not been initialised.
pub fn inc_finished(status: CallStatus) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .calls_finished
            .get_metric_with_label_values(&[status.as_str()])
        {
            c.inc();
        }
    }
}

/// Count a requeue after a provider failure.
pub fn inc_retry() {
    if let Some(m) = metrics() {
        m.call_retries.inc();
    }
}

/// Count a scheduling pass denied by the rate limiter.
pub fn inc_rate_limited() {
    if let Some(m) = metrics() {
        m.rate_limited.inc();
    }
}

/// Record how long a provider invocation took.
///
/// `outcome` is a short label such as `"success"`, `"timeout"` or `"error"`.
///
/// # Panics
///
/// This function never panics.
pub fn observe_provider_latency(outcome: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.provider_latency.get_metric_with_label_values(&[outcome]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Set the queued-call gauge for one priority tier.
pub fn set_queue_depth(priority: Priority, depth: usize) {
    if let Some(m) = metrics() {
        if let Ok(g) = m
            .queue_depth
            .get_metric_with_label_values(&[priority.as_str()])
        {
            g.set(i64::try_from(depth).unwrap_or(i64::MAX));
        }
    }
}

/// Set the in-flight call gauge.
pub fn set_active_calls(active: usize) {
    if let Some(m) = metrics() {
        m.active_calls.set(i64::try_from(active).unwrap_or(i64::MAX));
    }
}

/// Gather all registered metrics as a raw list of metric families.
///
/// Returns an empty `Vec` if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    metrics().map_or_else(Vec::new, |m| m.registry.gather())
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let families = gather();
    if families.is_empty() {
        return String::new();
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    // The global OnceLock cannot be reset between tests, so tests that check
    // exact values build an isolated bundle under a distinct prefix.
    fn make_test_metrics() -> Metrics {
        build("t").expect("isolated metrics must build")
    }

    fn family<'a>(
        families: &'a [prometheus::proto::MetricFamily],
        name: &str,
    ) -> &'a prometheus::proto::MetricFamily {
        families
            .iter()
            .find(|f| f.get_name() == name)
            .expect("family must exist")
    }

    #[test]
    fn test_init_metrics_idempotent_second_call_is_noop() {
        let _ = init_metrics();
        assert!(init_metrics().is_ok(), "second call must be a no-op returning Ok");
    }

    #[test]
    fn test_helpers_before_or_after_init_do_not_panic() {
        inc_submitted(Priority::High);
        inc_finished(CallStatus::Completed);
        inc_retry();
        inc_rate_limited();
        observe_provider_latency("success", Duration::from_millis(5));
        set_queue_depth(Priority::Low, 3);
        set_active_calls(1);
    }

    #[test]
    fn test_submitted_counter_is_labelled_by_priority() {
        let m = make_test_metrics();
        for _ in 0..2 {
            m.calls_submitted
                .get_metric_with_label_values(&[Priority::Critical.as_str()])
                .expect("label ok")
                .inc();
        }
        let families = m.registry.gather();
        let fam = family(&families, "t_calls_submitted_total");
        let metric = &fam.get_metric()[0];
        assert_eq!(metric.get_label()[0].get_value(), "critical");
        assert!((metric.get_counter().get_value() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_provider_latency_records_observation() {
        let m = make_test_metrics();
        m.provider_latency
            .get_metric_with_label_values(&["timeout"])
            .expect("label ok")
            .observe(1.5);
        let families = m.registry.gather();
        let fam = family(&families, "t_provider_latency_seconds");
        assert_eq!(fam.get_metric()[0].get_histogram().get_sample_count(), 1);
    }

    #[test]
    fn test_queue_depth_gauge_holds_exact_value() {
        let m = make_test_metrics();
        m.queue_depth
            .get_metric_with_label_values(&["normal"])
            .expect("label ok")
            .set(42);
        m.active_calls.set(4);
        let families = m.registry.gather();
        let depth = family(&families, "t_queue_depth").get_metric()[0]
            .get_gauge()
            .get_value();
        assert!((depth - 42.0).abs() < f64::EPSILON);
        let active = family(&families, "t_active_calls").get_metric()[0]
            .get_gauge()
            .get_value();
        assert!((active - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_gather_metrics_contains_prefixed_names_after_observation() {
        let _ = init_metrics();
        inc_retry();
        let output = gather_metrics();
        assert!(output.contains("dispatcher_call_retries_total"));
    }
}
