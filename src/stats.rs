//! Read-only aggregates over call history.
//!
//! Both structs are plain serde values so a host can return them from an
//! HTTP handler unchanged.

use serde::Serialize;

use crate::call::{CallRecord, CallStatus};
use crate::queue::QueueStats;
use crate::rate_limit::RateLimitUsage;

/// Per-user usage over a recency window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserCallStats {
    /// Calls created inside the window, in any status.
    pub total_calls: usize,
    /// Calls that reached `Completed`.
    pub successful_calls: usize,
    /// Calls that reached `Failed`. Timeouts are counted separately.
    pub failed_calls: usize,
    /// Calls that reached `Timeout`.
    pub timed_out_calls: usize,
    /// Calls that were cancelled.
    pub cancelled_calls: usize,
    /// Mean provider latency of completed calls, `0.0` if there are none.
    pub average_response_time_ms: f64,
    /// Sum of estimated tokens.
    pub total_tokens_used: u64,
    /// Sum of estimated cost in USD.
    pub total_cost: f64,
}

/// Builds a [`UserCallStats`] one record at a time, so the caller can feed
/// it while holding each record's lock only briefly.
#[derive(Debug, Default)]
pub(crate) struct UserStatsAccumulator {
    stats: UserCallStats,
    response_time_sum: u64,
    response_time_count: u64,
}

impl UserStatsAccumulator {
    pub(crate) fn add(&mut self, record: &CallRecord) {
        let stats = &mut self.stats;
        stats.total_calls += 1;
        match record.status {
            CallStatus::Completed => stats.successful_calls += 1,
            CallStatus::Failed => stats.failed_calls += 1,
            CallStatus::Timeout => stats.timed_out_calls += 1,
            CallStatus::Cancelled => stats.cancelled_calls += 1,
            CallStatus::Queued | CallStatus::Processing => {}
        }
        if record.status == CallStatus::Completed {
            if let Some(ms) = record.response_time_ms.filter(|ms| *ms > 0) {
                self.response_time_sum = self.response_time_sum.saturating_add(ms);
                self.response_time_count += 1;
            }
        }
        stats.total_tokens_used = stats
            .total_tokens_used
            .saturating_add(record.tokens_used.unwrap_or(0));
        stats.total_cost += record.cost.unwrap_or(0.0);
    }

    pub(crate) fn finish(mut self) -> UserCallStats {
        if self.response_time_count > 0 {
            self.stats.average_response_time_ms =
                self.response_time_sum as f64 / self.response_time_count as f64;
        }
        self.stats
    }
}

/// Dispatcher-wide snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStats {
    /// Queue occupancy.
    pub queue: QueueStats,
    /// Rate limiter occupancy.
    pub rate_limit: RateLimitUsage,
    /// Calls created in the last hour.
    pub recent_hour_calls: usize,
    /// Calls held in history.
    pub total_historical_calls: usize,
    /// Completed fraction of `recent_hour_calls`, `0.0` if there are none.
    pub success_rate: f64,
    /// Whether the scheduling loop is running.
    pub processing: bool,
}

/// Counts recent calls and how many of them completed.
#[derive(Debug, Default)]
pub(crate) struct RecentCounter {
    pub(crate) total: usize,
    pub(crate) completed: usize,
}

impl RecentCounter {
    pub(crate) fn add(&mut self, status: CallStatus) {
        self.total += 1;
        if status == CallStatus::Completed {
            self.completed += 1;
        }
    }

    pub(crate) fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}
