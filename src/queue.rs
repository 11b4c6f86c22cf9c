//! Priority Queue
//!
//! Admission control for pending calls: four FIFO tiers plus a cap on how
//! many calls may be executing at once.
//!
//! ## Ordering
//!
//! - Strict priority across tiers: a `Low` call is never dequeued while a
//!   `Critical` one is waiting.
//! - FIFO within a tier. Requeued retries go to the tail of their tier.
//! - Low tiers can starve under sustained high-tier load. That is accepted.
//!
//! All state sits behind one mutex, so a dequeue that observes a free slot
//! also claims it in the same critical section.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::call::{CallEntry, CallId};
use crate::metrics;

/// Request priority levels
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Lowest priority, for background and batch work.
    Low = 0,
    /// Standard priority for most calls.
    #[default]
    Normal = 1,
    /// Elevated priority, dispatched before `Normal`.
    High = 2,
    /// Highest priority, dispatched ahead of all others.
    Critical = 3,
}

impl Priority {
    /// All tiers in dispatch order, highest first.
    pub const DISPATCH_ORDER: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Parse a priority level from a name string (`"low"`, `"normal"`, `"high"`, `"critical"`).
    ///
    /// Returns `None` for unrecognised strings.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }

    /// Lowercase tier name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct QueueState {
    tiers: [VecDeque<Arc<CallEntry>>; 4],
    active: HashSet<CallId>,
}

impl QueueState {
    fn total_queued(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }
}

/// Tiered call queue with a concurrency cap.
pub struct PriorityQueue {
    state: Mutex<QueueState>,
    max_concurrent: usize,
}

impl PriorityQueue {
    /// Create a queue that admits at most `max_concurrent` calls at once.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                tiers: Default::default(),
                active: HashSet::new(),
            }),
            max_concurrent,
        }
    }

    /// Configured concurrency cap.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Append a call to the tail of its tier. Never fails: only executing
    /// calls are bounded, not queued ones.
    pub(crate) fn enqueue(&self, entry: Arc<CallEntry>) {
        let priority = entry.priority();
        let mut state = self.state.lock();
        debug!(call_id = %entry.id(), priority = %priority, "call enqueued");
        state.tiers[priority.index()].push_back(entry);
        metrics::set_queue_depth(priority, state.tiers[priority.index()].len());
    }

    /// Admit the next call, or `None` if the cap is reached or nothing is
    /// waiting.
    ///
    /// The admitted call is already `Processing` and counted as active when
    /// this returns. Calls cancelled while queued are dropped here.
    pub(crate) fn dequeue(&self) -> Option<Arc<CallEntry>> {
        let mut state = self.state.lock();
        if state.active.len() >= self.max_concurrent {
            return None;
        }

        for priority in Priority::DISPATCH_ORDER {
            while let Some(entry) = state.tiers[priority.index()].pop_front() {
                if !entry.update(|record| record.begin_processing()) {
                    debug!(call_id = %entry.id(), "skipping call that left the queued state");
                    continue;
                }
                state.active.insert(entry.id().clone());
                debug!(
                    call_id = %entry.id(),
                    priority = %priority,
                    active = state.active.len(),
                    "call dequeued"
                );
                metrics::set_queue_depth(priority, state.tiers[priority.index()].len());
                metrics::set_active_calls(state.active.len());
                return Some(entry);
            }
            metrics::set_queue_depth(priority, 0);
        }
        None
    }

    /// Release the concurrency slot held by `call_id`.
    ///
    /// Returns `false` if the id was not active, which makes a second
    /// release for the same call harmless.
    pub(crate) fn complete(&self, call_id: &CallId) -> bool {
        let mut state = self.state.lock();
        let released = state.active.remove(call_id);
        if released {
            debug!(call_id = %call_id, active = state.active.len(), "call slot released");
            metrics::set_active_calls(state.active.len());
        }
        released
    }

    /// Drop a still-queued call. Returns `true` if it was found.
    pub(crate) fn remove(&self, call_id: &CallId) -> bool {
        let mut state = self.state.lock();
        for priority in Priority::DISPATCH_ORDER {
            let tier = &mut state.tiers[priority.index()];
            if let Some(pos) = tier.iter().position(|e| e.id() == call_id) {
                tier.remove(pos);
                metrics::set_queue_depth(priority, tier.len());
                return true;
            }
        }
        false
    }

    /// Number of calls currently holding a slot.
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Number of calls waiting across all tiers.
    pub fn queued_len(&self) -> usize {
        self.state.lock().total_queued()
    }

    /// Point-in-time snapshot for observability.
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        let active_count = state.active.len();
        QueueStats {
            active_count,
            queued_per_tier: Priority::DISPATCH_ORDER
                .iter()
                .map(|p| (*p, state.tiers[p.index()].len()))
                .collect(),
            total_queued: state.total_queued(),
            max_concurrent: self.max_concurrent,
            utilization: if self.max_concurrent == 0 {
                1.0
            } else {
                active_count as f64 / self.max_concurrent as f64
            },
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    /// Calls currently holding a concurrency slot.
    pub active_count: usize,
    /// Waiting calls per tier; every tier is present.
    pub queued_per_tier: BTreeMap<Priority, usize>,
    /// Waiting calls across all tiers.
    pub total_queued: usize,
    /// Concurrency cap.
    pub max_concurrent: usize,
    /// `active_count / max_concurrent`.
    pub utilization: f64,
}
