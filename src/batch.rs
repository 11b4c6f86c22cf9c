//! Batch fan-out / fan-in over a [`Dispatcher`].
//!
//! A batch is a list of [`CallSpec`]s submitted in order for one user at
//! one priority. Results come back positionally: slot `i` of the output
//! belongs to spec `i`, and any call that did not complete is `None`.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::call::{CallId, CallRequest, UserId};
use crate::dispatcher::Dispatcher;
use crate::queue::Priority;

/// One prompt of a batch, with optional per-call overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallSpec {
    /// Prompt text.
    pub prompt: String,
    /// Model override.
    #[serde(default)]
    pub model: Option<String>,
    /// Temperature override.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Max-token override.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Caller metadata copied onto the record.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CallSpec {
    /// Spec with only a prompt; everything else uses dispatcher defaults.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    fn into_request(self, user_id: UserId, priority: Priority) -> CallRequest {
        let mut request = CallRequest::new(self.prompt, user_id).with_priority(priority);
        request.model = self.model;
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request.metadata = self.metadata;
        request
    }
}

/// Submits and awaits groups of calls.
#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    dispatcher: Dispatcher,
}

impl BatchCoordinator {
    /// Coordinator driving `dispatcher`.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// The dispatcher this coordinator submits to.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Submit every spec, in order. Returns ids in the same order.
    pub fn submit_batch(
        &self,
        specs: Vec<CallSpec>,
        user_id: UserId,
        priority: Priority,
    ) -> Vec<CallId> {
        let ids: Vec<CallId> = specs
            .into_iter()
            .map(|spec| self.dispatcher.submit(spec.into_request(user_id, priority)))
            .collect();
        info!(user_id, priority = %priority, calls = ids.len(), "batch submitted");
        ids
    }

    /// Wait for all calls concurrently.
    ///
    /// `timeout` bounds the whole batch, not each call: every wait shares
    /// the same deadline. The output has one slot per id, in input order.
    pub async fn wait_for_batch(&self, ids: &[CallId], timeout: Duration) -> Vec<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let waits = ids.iter().map(|id| {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            self.dispatcher.wait_for_call(id, remaining)
        });
        let results = join_all(waits).await;
        let completed = results.iter().filter(|r| r.is_some()).count();
        info!(calls = ids.len(), completed, "batch finished");
        results
    }

    /// Submit then wait. Returns the ids alongside the results.
    pub async fn run_batch(
        &self,
        specs: Vec<CallSpec>,
        user_id: UserId,
        priority: Priority,
        timeout: Duration,
    ) -> (Vec<CallId>, Vec<Option<String>>) {
        let ids = self.submit_batch(specs, user_id, priority);
        let results = self.wait_for_batch(&ids, timeout).await;
        (ids, results)
    }
}
