//! # Call: the unit of dispatch work
//!
//! ## Responsibility
//! Define [`CallRecord`] and its lifecycle. Every status change goes
//! through a transition method here, so the record invariants hold no
//! matter which task drives it:
//!
//! - `result` is set iff status is `Completed`
//! - `error` is set iff status is `Failed` or `Timeout`
//! - `retry_count <= max_retries`
//! - terminal states never transition again
//!
//! ## NOT Responsible For
//! - Ordering or admission (see: `queue`)
//! - Deciding when to run a call (see: `dispatcher`)

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::{CostConfig, DefaultsConfig};
use crate::queue::Priority;

/// Identifier of the user that owns a call.
pub type UserId = i64;

/// Process-unique call identifier (`call_<uuid>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(String);

impl CallId {
    /// Wrap an existing identifier string, e.g. one received from a client.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier. Backed by a v4 UUID, so two calls
    /// submitted by the same user in the same millisecond still differ.
    pub fn generate() -> Self {
        Self(format!("call_{}", Uuid::new_v4().simple()))
    }

    /// Return the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a call.
///
/// ```text
/// Queued ─► Processing ─► Completed | Failed | Timeout | Cancelled
///   ▲            │
///   └── retry ───┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Waiting in its priority tier.
    Queued,
    /// Admitted and executing against the provider.
    Processing,
    /// Provider returned a result.
    Completed,
    /// Provider failed and the retry budget is exhausted.
    Failed,
    /// The call exceeded its own timeout. Never retried.
    Timeout,
    /// Cancelled by a caller.
    Cancelled,
}

impl CallStatus {
    /// Returns `true` if no further transition can occur.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }

    /// Lowercase label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for a new call, as passed to
/// [`Dispatcher::submit`](crate::Dispatcher::submit).
///
/// Unset model parameters fall back to the dispatcher's configured
/// defaults. A temperature of `0.0` is a real value, not "unset".
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use llm_call_dispatcher::{CallRequest, Priority};
///
/// let request = CallRequest::new("Evaluate this idea", 7)
///     .with_priority(Priority::High)
///     .with_temperature(0.2)
///     .with_timeout(Duration::from_secs(60));
/// assert_eq!(request.priority, Priority::High);
/// ```
#[derive(Debug, Clone)]
pub struct CallRequest {
    /// Prompt text sent to the provider.
    pub prompt: String,
    /// Owning user.
    pub user_id: UserId,
    /// Model name override.
    pub model: Option<String>,
    /// Sampling temperature override.
    pub temperature: Option<f32>,
    /// Max-token budget override.
    pub max_tokens: Option<u32>,
    /// Scheduling tier.
    pub priority: Priority,
    /// Per-call timeout override.
    pub timeout: Option<Duration>,
    /// Retry budget override.
    pub max_retries: Option<u32>,
    /// Free-form caller metadata, carried on the record untouched.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CallRequest {
    /// Create a request at `Normal` priority with all parameters defaulted.
    pub fn new(prompt: impl Into<String>, user_id: UserId) -> Self {
        Self {
            prompt: prompt.into(),
            user_id,
            model: None,
            temperature: None,
            max_tokens: None,
            priority: Priority::Normal,
            timeout: None,
            max_retries: None,
            metadata: HashMap::new(),
        }
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max-token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the priority tier.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Full lifecycle state of one LLM invocation.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    /// Unique identifier.
    pub id: CallId,
    /// Prompt text.
    pub prompt: String,
    /// Model name.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Max-token budget.
    pub max_tokens: u32,
    /// Scheduling tier.
    pub priority: Priority,
    /// Owning user.
    pub user_id: UserId,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Retry budget.
    pub max_retries: u32,
    /// Caller metadata.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Current status.
    pub status: CallStatus,
    /// Provider output; only set when `Completed`.
    pub result: Option<String>,
    /// Failure description; only set when `Failed` or `Timeout`.
    pub error: Option<String>,
    /// Provider latency of the successful attempt.
    pub response_time_ms: Option<u64>,
    /// Estimated token usage (prompt + response).
    pub tokens_used: Option<u64>,
    /// Estimated cost in USD.
    pub cost: Option<f64>,
    /// Number of requeues so far.
    pub retry_count: u32,
    /// When the most recent attempt was admitted.
    pub started_at: Option<DateTime<Utc>>,
    /// When the call reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

/// What a failed attempt turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureOutcome {
    /// Back to `Queued` with `retry_count` incremented.
    Requeued,
    /// Retry budget exhausted; now `Failed`.
    Failed,
    /// The call was no longer `Processing` (e.g. cancelled meanwhile).
    Ignored,
}

impl CallRecord {
    /// Build a `Queued` record from a request, resolving unset parameters
    /// against `defaults`.
    pub(crate) fn from_request(
        id: CallId,
        request: CallRequest,
        defaults: &DefaultsConfig,
    ) -> Self {
        Self {
            id,
            prompt: request.prompt,
            model: request.model.unwrap_or_else(|| defaults.model.clone()),
            temperature: request.temperature.unwrap_or(defaults.temperature),
            max_tokens: request.max_tokens.unwrap_or(defaults.max_tokens),
            priority: request.priority,
            user_id: request.user_id,
            created_at: Utc::now(),
            timeout: request.timeout.unwrap_or_else(|| defaults.timeout()),
            max_retries: request.max_retries.unwrap_or(defaults.max_retries),
            metadata: request.metadata,
            status: CallStatus::Queued,
            result: None,
            error: None,
            response_time_ms: None,
            tokens_used: None,
            cost: None,
            retry_count: 0,
            started_at: None,
            finished_at: None,
        }
    }

    /// `Queued → Processing`. Returns `false` for any other current status.
    pub(crate) fn begin_processing(&mut self) -> bool {
        if self.status != CallStatus::Queued {
            return false;
        }
        self.status = CallStatus::Processing;
        self.started_at = Some(Utc::now());
        true
    }

    /// `Processing → Completed`, filling in latency and usage estimates.
    pub(crate) fn complete(
        &mut self,
        result: String,
        elapsed: Duration,
        estimator: &UsageEstimator,
    ) -> bool {
        if self.status != CallStatus::Processing {
            return false;
        }
        let tokens = estimator.estimate_tokens(&self.prompt, &result);
        self.status = CallStatus::Completed;
        self.response_time_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        self.tokens_used = Some(tokens);
        self.cost = Some(estimator.estimate_cost(tokens));
        self.result = Some(result);
        self.error = None;
        self.finished_at = Some(Utc::now());
        true
    }

    /// `Processing → Timeout`.
    pub(crate) fn time_out(&mut self, error: impl Into<String>) -> bool {
        self.terminate(CallStatus::Timeout, error.into())
    }

    /// Apply a non-timeout failure: requeue while the retry budget allows,
    /// otherwise fail terminally.
    pub(crate) fn record_failure(&mut self, error: impl Into<String>) -> FailureOutcome {
        if self.status != CallStatus::Processing {
            return FailureOutcome::Ignored;
        }
        let error = error.into();
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            self.status = CallStatus::Queued;
            // Kept for diagnostics only once the call is terminal.
            self.error = None;
            tracing::debug!(call_id = %self.id, last_error = %error, "attempt failed, requeueing");
            FailureOutcome::Requeued
        } else {
            self.terminate(CallStatus::Failed, error);
            FailureOutcome::Failed
        }
    }

    /// `Processing → Failed` for an execution that ended without an outcome
    /// (panic or abort).
    pub(crate) fn abort(&mut self, reason: impl Into<String>) -> bool {
        self.terminate(CallStatus::Failed, reason.into())
    }

    /// `Queued | Processing → Cancelled`. Returns the status the call was
    /// cancelled from, or `None` if it was already terminal.
    pub(crate) fn cancel(&mut self) -> Option<CallStatus> {
        match self.status {
            CallStatus::Queued | CallStatus::Processing => {
                let previous = self.status;
                self.status = CallStatus::Cancelled;
                self.result = None;
                self.error = None;
                self.finished_at = Some(Utc::now());
                Some(previous)
            }
            _ => None,
        }
    }

    fn terminate(&mut self, status: CallStatus, error: String) -> bool {
        if self.status != CallStatus::Processing {
            return false;
        }
        self.status = status;
        self.result = None;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
        true
    }
}

/// Deterministic token and cost approximation. Good for dashboards and
/// relative comparison, not for billing.
#[derive(Debug, Clone, Copy)]
pub struct UsageEstimator {
    chars_per_token: u64,
    usd_per_1k_tokens: f64,
}

impl UsageEstimator {
    /// Build from the `[cost]` config section.
    pub fn new(cost: &CostConfig) -> Self {
        Self {
            chars_per_token: u64::from(cost.chars_per_token.max(1)),
            usd_per_1k_tokens: cost.usd_per_1k_tokens,
        }
    }

    /// `(prompt chars + response chars) / chars_per_token`, rounded down.
    pub fn estimate_tokens(&self, prompt: &str, response: &str) -> u64 {
        let chars = prompt.chars().count() + response.chars().count();
        u64::try_from(chars).unwrap_or(u64::MAX) / self.chars_per_token
    }

    /// Tokens priced at the configured per-1000-token rate.
    pub fn estimate_cost(&self, tokens: u64) -> f64 {
        tokens as f64 * self.usd_per_1k_tokens / 1000.0
    }
}

impl Default for UsageEstimator {
    fn default() -> Self {
        Self::new(&CostConfig::default())
    }
}

/// A record shared between the history map, the queue and the task
/// executing it. Status changes are broadcast on a watch channel so
/// waiters wake without polling.
pub(crate) struct CallEntry {
    id: CallId,
    priority: Priority,
    record: RwLock<CallRecord>,
    status_tx: watch::Sender<CallStatus>,
}

impl CallEntry {
    pub(crate) fn new(record: CallRecord) -> Arc<Self> {
        let (status_tx, _) = watch::channel(record.status);
        Arc::new(Self {
            id: record.id.clone(),
            priority: record.priority,
            record: RwLock::new(record),
            status_tx,
        })
    }

    pub(crate) fn id(&self) -> &CallId {
        &self.id
    }

    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    pub(crate) fn status(&self) -> CallStatus {
        self.record.read().status
    }

    pub(crate) fn snapshot(&self) -> CallRecord {
        self.record.read().clone()
    }

    /// Read the record without cloning it.
    pub(crate) fn with_record<R>(&self, f: impl FnOnce(&CallRecord) -> R) -> R {
        f(&self.record.read())
    }

    /// Mutate the record and publish the resulting status in the same
    /// critical section.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut CallRecord) -> R) -> R {
        let mut record = self.record.write();
        let out = f(&mut record);
        self.status_tx.send_replace(record.status);
        out
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<CallStatus> {
        self.status_tx.subscribe()
    }
}

impl fmt::Debug for CallEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallEntry")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn make_record(prompt: &str, priority: Priority, max_retries: u32) -> CallRecord {
        let request = CallRequest::new(prompt, 1)
            .with_priority(priority)
            .with_max_retries(max_retries);
        CallRecord::from_request(CallId::generate(), request, &DefaultsConfig::default())
    }

    pub(crate) fn make_entry(prompt: &str, priority: Priority) -> Arc<CallEntry> {
        CallEntry::new(make_record(prompt, priority, 3))
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| CallId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_generated_id_has_call_prefix() {
        assert!(CallId::generate().as_str().starts_with("call_"));
    }

    #[test]
    fn test_from_request_applies_defaults() {
        let defaults = DefaultsConfig::default();
        let record = CallRecord::from_request(
            CallId::new("c1"),
            CallRequest::new("hello", 9),
            &defaults,
        );
        assert_eq!(record.model, defaults.model);
        assert_eq!(record.max_tokens, defaults.max_tokens);
        assert_eq!(record.max_retries, defaults.max_retries);
        assert_eq!(record.timeout, Duration::from_secs(300));
        assert_eq!(record.status, CallStatus::Queued);
        assert_eq!(record.user_id, 9);
    }

    #[test]
    fn test_zero_temperature_is_not_replaced_by_default() {
        let record = CallRecord::from_request(
            CallId::new("c1"),
            CallRequest::new("hello", 1).with_temperature(0.0),
            &DefaultsConfig::default(),
        );
        assert_eq!(record.temperature, 0.0);
    }

    #[test]
    fn test_complete_sets_result_and_estimates() {
        let mut record = make_record("abcdefgh", Priority::Normal, 3);
        assert!(record.begin_processing());
        assert!(record.complete(
            "12345678".into(),
            Duration::from_millis(42),
            &UsageEstimator::default()
        ));
        assert_eq!(record.status, CallStatus::Completed);
        assert_eq!(record.result.as_deref(), Some("12345678"));
        assert!(record.error.is_none());
        assert_eq!(record.response_time_ms, Some(42));
        assert_eq!(record.tokens_used, Some(4));
        let cost = record.cost.unwrap_or_default();
        assert!((cost - 0.00012).abs() < 1e-12, "cost was {cost}");
    }

    #[test]
    fn test_complete_requires_processing() {
        let mut record = make_record("p", Priority::Normal, 3);
        assert!(!record.complete("x".into(), Duration::ZERO, &UsageEstimator::default()));
        assert_eq!(record.status, CallStatus::Queued);
        assert!(record.result.is_none());
    }

    #[test]
    fn test_failure_requeues_until_budget_exhausted() {
        let mut record = make_record("p", Priority::Normal, 2);

        for expected_retry in 1..=2 {
            assert!(record.begin_processing());
            assert_eq!(record.record_failure("boom"), FailureOutcome::Requeued);
            assert_eq!(record.status, CallStatus::Queued);
            assert_eq!(record.retry_count, expected_retry);
            assert!(record.error.is_none());
        }

        assert!(record.begin_processing());
        assert_eq!(record.record_failure("boom"), FailureOutcome::Failed);
        assert_eq!(record.status, CallStatus::Failed);
        assert_eq!(record.retry_count, 2);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_zero_retry_budget_fails_immediately() {
        let mut record = make_record("p", Priority::Normal, 0);
        assert!(record.begin_processing());
        assert_eq!(record.record_failure("nope"), FailureOutcome::Failed);
        assert_eq!(record.retry_count, 0);
    }

    #[test]
    fn test_timeout_sets_error_and_is_terminal() {
        let mut record = make_record("p", Priority::Normal, 3);
        assert!(record.begin_processing());
        assert!(record.time_out("deadline exceeded"));
        assert_eq!(record.status, CallStatus::Timeout);
        assert!(record.status.is_terminal());
        assert!(record.result.is_none());
        assert_eq!(record.error.as_deref(), Some("deadline exceeded"));
        assert_eq!(record.retry_count, 0);
    }

    #[test]
    fn test_cancel_from_queued_and_processing_only() {
        let mut queued = make_record("p", Priority::Normal, 3);
        assert_eq!(queued.cancel(), Some(CallStatus::Queued));
        assert_eq!(queued.cancel(), None, "second cancel is a no-op");

        let mut processing = make_record("p", Priority::Normal, 3);
        processing.begin_processing();
        assert_eq!(processing.cancel(), Some(CallStatus::Processing));
        assert!(processing.result.is_none());
        assert!(processing.error.is_none());
    }

    #[test]
    fn test_cancelled_record_ignores_late_outcomes() {
        let mut record = make_record("p", Priority::Normal, 3);
        record.begin_processing();
        record.cancel();

        assert!(!record.complete("late".into(), Duration::ZERO, &UsageEstimator::default()));
        assert!(!record.time_out("late"));
        assert_eq!(record.record_failure("late"), FailureOutcome::Ignored);
        assert!(!record.abort("late"));
        assert_eq!(record.status, CallStatus::Cancelled);
        assert!(record.result.is_none());
    }

    #[test]
    fn test_terminal_status_classification() {
        assert!(!CallStatus::Queued.is_terminal());
        assert!(!CallStatus::Processing.is_terminal());
        for status in [
            CallStatus::Completed,
            CallStatus::Failed,
            CallStatus::Timeout,
            CallStatus::Cancelled,
        ] {
            assert!(status.is_terminal(), "{status} must be terminal");
        }
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&CallStatus::Cancelled).unwrap_or_default();
        assert_eq!(json, "\"cancelled\"");
    }

    #[test]
    fn test_estimator_counts_chars_not_bytes() {
        let estimator = UsageEstimator::default();
        // 4 multi-byte chars + 4 ascii chars = 8 chars → 2 tokens
        assert_eq!(estimator.estimate_tokens("ééàà", "abcd"), 2);
    }

    #[test]
    fn test_entry_update_publishes_status() {
        let entry = make_entry("p", Priority::High);
        let rx = entry.subscribe();
        assert_eq!(*rx.borrow(), CallStatus::Queued);

        entry.update(|r| r.begin_processing());
        assert_eq!(*rx.borrow(), CallStatus::Processing);
        assert_eq!(entry.status(), CallStatus::Processing);
        assert_eq!(entry.priority(), Priority::High);
    }
}
