//! # Dispatcher: submit, schedule, execute, observe
//!
//! ## Responsibility
//! Own the call history, the [`PriorityQueue`] and the [`RateLimiter`], and
//! drive one background scheduling loop that admits queued calls and runs
//! each of them on its own task against the configured [`LlmProvider`].
//!
//! ## Guarantees
//! - `submit` and `cancel_call` never suspend
//! - At most `max_concurrent_calls` calls are `Processing` at once
//! - A call's concurrency slot is released exactly once on every exit path,
//!   including panics and aborted tasks
//! - A failing or panicking call never stops the loop
//! - No lock is held across an `.await`
//!
//! ## NOT Responsible For
//! - Persisting history (records live in memory until `purge_history`)
//! - Prompt construction or response parsing

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::call::{
    CallEntry, CallId, CallRecord, CallRequest, CallStatus, FailureOutcome, UsageEstimator,
    UserId,
};
use crate::config::validation::{self, ConfigError};
use crate::config::DispatcherConfig;
use crate::metrics;
use crate::provider::{build_provider, LlmProvider, ProviderRequest};
use crate::queue::PriorityQueue;
use crate::rate_limit::RateLimiter;
use crate::stats::{RecentCounter, SystemStats, UserCallStats, UserStatsAccumulator};
use crate::DispatchError;

/// Handle to a call dispatcher.
///
/// Cheap to clone; every clone drives the same queue, limiter and history.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    config: DispatcherConfig,
    provider: Arc<dyn LlmProvider>,
    limiter: RateLimiter,
    queue: PriorityQueue,
    history: DashMap<CallId, Arc<CallEntry>>,
    estimator: UsageEstimator,
    wakeup: Notify,
    worker: Mutex<Option<LoopHandle>>,
}

struct LoopHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// What one scheduling pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    Dispatched,
    RateLimited,
    Idle,
}

impl Dispatcher {
    /// Build a dispatcher around an already-constructed provider.
    ///
    /// The scheduling loop is not started until [`start_processing`] or the
    /// first [`submit`].
    ///
    /// [`start_processing`]: Dispatcher::start_processing
    /// [`submit`]: Dispatcher::submit
    pub fn new(config: DispatcherConfig, provider: Arc<dyn LlmProvider>) -> Self {
        let limiter = RateLimiter::new(config.limits.calls_per_minute, config.limits.calls_per_hour);
        let queue = PriorityQueue::new(config.limits.max_concurrent_calls);
        let estimator = UsageEstimator::new(&config.cost);
        Self {
            inner: Arc::new(Inner {
                config,
                provider,
                limiter,
                queue,
                history: DashMap::new(),
                estimator,
                wakeup: Notify::new(),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Validate `config` and build the provider it selects.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Config`] if validation fails, or
    /// [`DispatchError::Provider`] if the provider cannot be built.
    pub fn try_from_config(config: DispatcherConfig) -> Result<Self, DispatchError> {
        validation::validate(&config)
            .map_err(|violations| ConfigError::from_violations("<in-memory>", violations))?;
        let provider = build_provider(&config.provider)?;
        Ok(Self::new(config, provider))
    }

    /// The configuration this dispatcher was built with.
    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Queue a call and return its id immediately.
    ///
    /// Unset parameters fall back to `[defaults]`. Starts the scheduling loop
    /// if it is not running.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn submit(&self, request: CallRequest) -> CallId {
        let id = CallId::generate();
        let record = CallRecord::from_request(id.clone(), request, &self.inner.config.defaults);
        let priority = record.priority;
        let user_id = record.user_id;
        let entry = CallEntry::new(record);

        self.inner.history.insert(id.clone(), Arc::clone(&entry));
        self.inner.queue.enqueue(entry);
        metrics::inc_submitted(priority);
        info!(call_id = %id, user_id, priority = %priority, "call submitted");

        self.inner.wakeup.notify_one();
        self.start_processing();
        id
    }

    /// Current status of a call, or `None` for an unknown id.
    pub fn get_call_status(&self, call_id: &CallId) -> Option<CallStatus> {
        self.entry(call_id).map(|entry| entry.status())
    }

    /// Snapshot of a call's full record, or `None` for an unknown id.
    pub fn get_call_result(&self, call_id: &CallId) -> Option<CallRecord> {
        self.entry(call_id).map(|entry| entry.snapshot())
    }

    /// Wait until the call is terminal or `timeout` elapses.
    ///
    /// Returns the provider's text for a `Completed` call. Any other terminal
    /// status, an unknown id, or running out of time yields `None`.
    pub async fn wait_for_call(&self, call_id: &CallId, timeout: Duration) -> Option<String> {
        let entry = self.entry(call_id)?;
        let mut status_rx = entry.subscribe();

        let status = match tokio::time::timeout(timeout, status_rx.wait_for(|s| s.is_terminal()))
            .await
        {
            Ok(Ok(status)) => *status,
            Ok(Err(_)) => return None,
            Err(_) => {
                warn!(
                    call_id = %call_id,
                    timeout_ms = millis(timeout),
                    "timed out waiting for call"
                );
                return None;
            }
        };

        if status == CallStatus::Completed {
            return entry.with_record(|record| record.result.clone());
        }
        entry.with_record(|record| {
            warn!(
                call_id = %call_id,
                status = %status,
                error = record.error.as_deref().unwrap_or(""),
                "call finished without a result"
            );
        });
        None
    }

    /// Cancel a call that is still `Queued` or `Processing`.
    ///
    /// A queued call is removed from its tier. A processing call releases
    /// its slot at once; whatever the provider returns later is discarded.
    /// Returns `false` for terminal or unknown calls.
    pub fn cancel_call(&self, call_id: &CallId) -> bool {
        let Some(entry) = self.entry(call_id) else {
            return false;
        };

        match entry.update(|record| record.cancel()) {
            Some(CallStatus::Queued) => {
                self.inner.queue.remove(call_id);
            }
            Some(_) => {
                if self.inner.queue.complete(call_id) {
                    self.inner.wakeup.notify_one();
                }
            }
            None => return false,
        }

        metrics::inc_finished(CallStatus::Cancelled);
        info!(call_id = %call_id, "call cancelled");
        true
    }

    /// Usage of one user's calls created in the last `hours` hours.
    pub fn get_user_call_stats(&self, user_id: UserId, hours: u32) -> UserCallStats {
        let cutoff = cutoff_before(chrono::Duration::hours(i64::from(hours)));
        let mut acc = UserStatsAccumulator::default();
        for item in self.inner.history.iter() {
            item.value().with_record(|record| {
                if record.user_id == user_id && record.created_at >= cutoff {
                    acc.add(record);
                }
            });
        }
        acc.finish()
    }

    /// Queue, limiter and last-hour aggregates.
    pub fn get_system_stats(&self) -> SystemStats {
        let cutoff = cutoff_before(chrono::Duration::hours(1));
        let mut recent = RecentCounter::default();
        for item in self.inner.history.iter() {
            item.value().with_record(|record| {
                if record.created_at >= cutoff {
                    recent.add(record.status);
                }
            });
        }

        SystemStats {
            queue: self.inner.queue.stats(),
            rate_limit: self.inner.limiter.usage(),
            recent_hour_calls: recent.total,
            total_historical_calls: self.inner.history.len(),
            success_rate: recent.success_rate(),
            processing: self.is_processing(),
        }
    }

    /// Drop terminal records created more than `older_than` ago.
    ///
    /// Queued and processing calls are always kept. Returns how many records
    /// were removed. Nothing calls this automatically; retention is up to
    /// the host.
    pub fn purge_history(&self, older_than: chrono::Duration) -> usize {
        let cutoff = cutoff_before(older_than);
        let mut removed = 0usize;
        self.inner.history.retain(|_, entry| {
            let keep = entry.with_record(|record| {
                !record.status.is_terminal() || record.created_at >= cutoff
            });
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            info!(removed, "purged call history");
        }
        removed
    }

    /// Whether the scheduling loop is running.
    pub fn is_processing(&self) -> bool {
        self.inner
            .worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.join.is_finished())
    }

    /// Start the scheduling loop if it is not already running.
    ///
    /// Idempotent. Outside a Tokio runtime this logs a warning and does
    /// nothing; queued calls wait for a later start.
    pub fn start_processing(&self) {
        let mut worker = self.inner.worker.lock();
        if worker
            .as_ref()
            .is_some_and(|handle| !handle.join.is_finished())
        {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime available, scheduling loop not started");
            return;
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let grace = self.inner.config.scheduler.shutdown_grace();
        let join = runtime.spawn(run_loop(Arc::downgrade(&self.inner), shutdown_rx, grace));
        *worker = Some(LoopHandle { shutdown_tx, join });
        info!(
            max_concurrent = self.inner.queue.max_concurrent(),
            provider = self.inner.provider.name(),
            "scheduling loop started"
        );
    }

    /// Stop the scheduling loop.
    ///
    /// In-flight calls get the configured grace period to finish; the rest
    /// are aborted and marked `Failed`. Queued calls stay queued and resume
    /// on the next start.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Shutdown`] if the loop task panicked.
    pub async fn stop_processing(&self) -> Result<(), DispatchError> {
        let Some(handle) = self.inner.worker.lock().take() else {
            return Ok(());
        };
        let _ = handle.shutdown_tx.send(true);
        handle
            .join
            .await
            .map_err(|e| DispatchError::Shutdown(e.to_string()))?;
        info!("scheduling loop stopped");
        Ok(())
    }

    fn entry(&self, call_id: &CallId) -> Option<Arc<CallEntry>> {
        self.inner
            .history
            .get(call_id)
            .map(|item| Arc::clone(item.value()))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("provider", &self.inner.provider.name())
            .field("history", &self.inner.history.len())
            .field("queue", &self.inner.queue.stats())
            .finish()
    }
}

// ── Scheduling loop ───────────────────────────────────────────────────────

async fn run_loop(inner: Weak<Inner>, mut shutdown: watch::Receiver<bool>, grace: Duration) {
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }
        let Some(this) = inner.upgrade() else {
            debug!("dispatcher dropped, scheduling loop exiting");
            break;
        };

        while let Some(joined) = in_flight.try_join_next() {
            log_join(joined);
        }

        let scheduler = &this.config.scheduler;
        match this.schedule_next(&mut in_flight) {
            Ok(Tick::Dispatched) => continue,
            Ok(Tick::RateLimited) => {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(scheduler.rate_limited_backoff()) => {}
                }
            }
            Ok(Tick::Idle) => {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = this.wakeup.notified() => {}
                    _ = tokio::time::sleep(scheduler.idle_poll()) => {}
                }
            }
            Err(e) => {
                error!(error = %e, "scheduling pass failed");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(scheduler.error_backoff()) => {}
                }
            }
        }
    }

    drain(&mut in_flight, grace).await;
    info!("scheduling loop exited");
}

async fn drain(in_flight: &mut JoinSet<()>, grace: Duration) {
    if in_flight.is_empty() {
        return;
    }
    let finished = tokio::time::timeout(grace, async {
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }
    })
    .await;

    if finished.is_err() {
        warn!(
            remaining = in_flight.len(),
            grace_ms = millis(grace),
            "grace period elapsed, aborting in-flight calls"
        );
        in_flight.abort_all();
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }
    }
}

/// `window` before now. An oversized window clamps to the representable
/// range, so it selects everything (or nothing, if negative).
fn cutoff_before(window: chrono::Duration) -> DateTime<Utc> {
    Utc::now().checked_sub_signed(window).unwrap_or_else(|| {
        if window > chrono::Duration::zero() {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        }
    })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn log_join(joined: Result<(), JoinError>) {
    match joined {
        Ok(()) => {}
        Err(e) if e.is_panic() => error!(error = %e, "call task panicked"),
        Err(e) => debug!(error = %e, "call task aborted"),
    }
}

impl Inner {
    /// One scheduling pass: check quota, admit at most one call, spawn it.
    fn schedule_next(self: &Arc<Self>, in_flight: &mut JoinSet<()>) -> Result<Tick, DispatchError> {
        if !self.limiter.can_make_call() {
            metrics::inc_rate_limited();
            return Ok(Tick::RateLimited);
        }

        let Some(entry) = self.queue.dequeue() else {
            return Ok(Tick::Idle);
        };
        let guard = SlotGuard::new(Arc::clone(self), Arc::clone(&entry));

        if !self.history.contains_key(entry.id()) {
            // Dropping the guard fails the record and frees the slot.
            drop(guard);
            return Err(DispatchError::Other(format!(
                "admitted call {} is missing from history",
                entry.id()
            )));
        }

        self.limiter.record_call();
        in_flight.spawn(Arc::clone(self).execute(entry, guard));
        Ok(Tick::Dispatched)
    }

    async fn execute(self: Arc<Self>, entry: Arc<CallEntry>, guard: SlotGuard) {
        let (request, timeout, attempt) = entry.with_record(|record| {
            (
                ProviderRequest {
                    prompt: record.prompt.clone(),
                    model: record.model.clone(),
                    temperature: record.temperature,
                    max_tokens: record.max_tokens,
                },
                record.timeout,
                record.retry_count + 1,
            )
        });
        let call_id = entry.id().clone();
        debug!(
            call_id = %call_id,
            attempt,
            model = %request.model,
            provider = self.provider.name(),
            "invoking provider"
        );

        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, self.provider.invoke(&request)).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(text)) => {
                metrics::observe_provider_latency("success", elapsed);
                if entry.update(|record| record.complete(text, elapsed, &self.estimator)) {
                    metrics::inc_finished(CallStatus::Completed);
                    info!(
                        call_id = %call_id,
                        elapsed_ms = millis(elapsed),
                        "call completed"
                    );
                } else {
                    debug!(call_id = %call_id, "discarding result of call that left processing");
                }
            }
            Ok(Err(e)) if e.is_timeout() => {
                self.finish_timed_out(&entry, format!("provider timed out: {e}"), elapsed);
            }
            Err(_) => {
                self.finish_timed_out(
                    &entry,
                    format!("call timed out after {:.1}s", timeout.as_secs_f64()),
                    elapsed,
                );
            }
            Ok(Err(e)) => {
                metrics::observe_provider_latency("error", elapsed);
                match entry.update(|record| record.record_failure(e.to_string())) {
                    FailureOutcome::Requeued => {
                        // The slot must be free before the same id can be
                        // admitted again.
                        guard.release();
                        metrics::inc_retry();
                        warn!(call_id = %call_id, attempt, error = %e, "call failed, requeueing");
                        self.queue.enqueue(entry);
                        self.wakeup.notify_one();
                        return;
                    }
                    FailureOutcome::Failed => {
                        metrics::inc_finished(CallStatus::Failed);
                        error!(call_id = %call_id, attempt, error = %e, "call failed");
                    }
                    FailureOutcome::Ignored => {
                        debug!(call_id = %call_id, "discarding failure of call that left processing");
                    }
                }
            }
        }

        guard.release();
    }

    fn finish_timed_out(&self, entry: &CallEntry, message: String, elapsed: Duration) {
        metrics::observe_provider_latency("timeout", elapsed);
        if entry.update(|record| record.time_out(message)) {
            metrics::inc_finished(CallStatus::Timeout);
            warn!(
                call_id = %entry.id(),
                elapsed_ms = millis(elapsed),
                "call timed out"
            );
        }
    }
}

/// Holds one concurrency slot for one execution.
///
/// Dropping it without [`SlotGuard::release`] means the execution ended
/// without recording an outcome (panic or abort): the call is failed and
/// the slot freed.
struct SlotGuard {
    inner: Arc<Inner>,
    entry: Arc<CallEntry>,
    released: bool,
}

impl SlotGuard {
    fn new(inner: Arc<Inner>, entry: Arc<CallEntry>) -> Self {
        Self {
            inner,
            entry,
            released: false,
        }
    }

    fn release(mut self) {
        self.free_slot();
    }

    fn free_slot(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.inner.queue.complete(self.entry.id());
        self.inner.wakeup.notify_one();
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self
            .entry
            .update(|record| record.abort("call execution ended without an outcome"))
        {
            metrics::inc_finished(CallStatus::Failed);
            error!(call_id = %self.entry.id(), "call execution aborted");
        }
        self.free_slot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SimulatedProvider;
    use crate::queue::Priority;

    fn dispatcher(config: DispatcherConfig) -> Dispatcher {
        Dispatcher::new(config, Arc::new(SimulatedProvider::with_delay(Duration::ZERO)))
    }

    #[tokio::test]
    async fn test_schedule_next_idle_on_empty_queue() {
        let d = dispatcher(DispatcherConfig::default());
        let mut set = JoinSet::new();
        assert_eq!(d.inner.schedule_next(&mut set).unwrap(), Tick::Idle);
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_schedule_next_rate_limited_leaves_call_queued() {
        let mut config = DispatcherConfig::default();
        config.limits.calls_per_minute = 1;
        let d = dispatcher(config);
        d.inner.limiter.record_call();

        let entry = CallEntry::new(CallRecord::from_request(
            CallId::generate(),
            CallRequest::new("hi", 1),
            &d.inner.config.defaults,
        ));
        d.inner.history.insert(entry.id().clone(), Arc::clone(&entry));
        d.inner.queue.enqueue(Arc::clone(&entry));

        let mut set = JoinSet::new();
        assert_eq!(d.inner.schedule_next(&mut set).unwrap(), Tick::RateLimited);
        assert_eq!(entry.status(), CallStatus::Queued);
        assert_eq!(d.inner.queue.queued_len(), 1);
    }

    #[tokio::test]
    async fn test_schedule_next_dispatches_and_records_quota() {
        let d = dispatcher(DispatcherConfig::default());
        let entry = CallEntry::new(CallRecord::from_request(
            CallId::generate(),
            CallRequest::new("generate", 1).with_priority(Priority::High),
            &d.inner.config.defaults,
        ));
        d.inner.history.insert(entry.id().clone(), Arc::clone(&entry));
        d.inner.queue.enqueue(Arc::clone(&entry));

        let mut set = JoinSet::new();
        assert_eq!(d.inner.schedule_next(&mut set).unwrap(), Tick::Dispatched);
        assert_eq!(d.inner.limiter.usage().minute_used, 1);

        while let Some(joined) = set.join_next().await {
            joined.unwrap();
        }
        assert_eq!(entry.status(), CallStatus::Completed);
        assert_eq!(d.inner.queue.active_count(), 0);
    }

    #[tokio::test]
    async fn test_schedule_next_errors_for_call_missing_from_history() {
        let d = dispatcher(DispatcherConfig::default());
        let entry = CallEntry::new(CallRecord::from_request(
            CallId::generate(),
            CallRequest::new("orphan", 1),
            &d.inner.config.defaults,
        ));
        d.inner.queue.enqueue(Arc::clone(&entry));

        let mut set = JoinSet::new();
        assert!(d.inner.schedule_next(&mut set).is_err());
        assert_eq!(entry.status(), CallStatus::Failed);
        assert_eq!(d.inner.queue.active_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_guard_fails_processing_call_and_frees_slot() {
        let d = dispatcher(DispatcherConfig::default());
        let entry = CallEntry::new(CallRecord::from_request(
            CallId::generate(),
            CallRequest::new("x", 1),
            &d.inner.config.defaults,
        ));
        d.inner.queue.enqueue(Arc::clone(&entry));
        let admitted = d.inner.queue.dequeue().unwrap();
        assert_eq!(d.inner.queue.active_count(), 1);

        drop(SlotGuard::new(Arc::clone(&d.inner), admitted));

        assert_eq!(entry.status(), CallStatus::Failed);
        assert!(entry.with_record(|r| r.error.is_some()));
        assert_eq!(d.inner.queue.active_count(), 0);
    }

    #[tokio::test]
    async fn test_released_guard_leaves_record_alone() {
        let d = dispatcher(DispatcherConfig::default());
        let entry = CallEntry::new(CallRecord::from_request(
            CallId::generate(),
            CallRequest::new("x", 1),
            &d.inner.config.defaults,
        ));
        d.inner.queue.enqueue(Arc::clone(&entry));
        let admitted = d.inner.queue.dequeue().unwrap();

        SlotGuard::new(Arc::clone(&d.inner), admitted).release();

        assert_eq!(entry.status(), CallStatus::Processing);
        assert_eq!(d.inner.queue.active_count(), 0);
    }

    #[test]
    fn test_submit_outside_runtime_queues_without_starting() {
        let d = dispatcher(DispatcherConfig::default());
        let id = d.submit(CallRequest::new("no runtime", 7));
        assert_eq!(d.get_call_status(&id), Some(CallStatus::Queued));
        assert!(!d.is_processing());
    }

    #[test]
    fn test_purge_keeps_live_calls() {
        let d = dispatcher(DispatcherConfig::default());
        let queued = d.submit(CallRequest::new("q", 1));
        let cancelled = d.submit(CallRequest::new("c", 1));
        assert!(d.cancel_call(&cancelled));

        // A negative age puts the cutoff just ahead of now.
        assert_eq!(d.purge_history(chrono::Duration::seconds(-1)), 1);
        assert!(d.get_call_status(&queued).is_some());
        assert!(d.get_call_status(&cancelled).is_none());
    }

    #[test]
    fn test_millis_saturates_instead_of_truncating() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_oversized_windows_cover_all_history() {
        let d = dispatcher(DispatcherConfig::default());
        let id = d.submit(CallRequest::new("old enough", 7));
        assert!(d.cancel_call(&id));

        let stats = d.get_user_call_stats(7, u32::MAX);
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.cancelled_calls, 1);

        // Nineteen million years reaches past the earliest representable date.
        assert_eq!(d.purge_history(chrono::Duration::weeks(1_000_000_000)), 0);
        assert_eq!(d.purge_history(chrono::Duration::weeks(-1_000_000_000)), 1);
        assert!(d.get_call_status(&id).is_none());
    }

    #[test]
    fn test_try_from_config_rejects_invalid_limits() {
        let mut config = DispatcherConfig::default();
        config.limits.max_concurrent_calls = 0;
        let err = Dispatcher::try_from_config(config).unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }
}
