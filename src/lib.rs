//! # llm-call-dispatcher
//!
//! A priority-queued, rate-limited, concurrency-bounded dispatcher for calls
//! to an LLM provider, built on Tokio.
//!
//! ## Architecture
//!
//! ```text
//! submit ──► PriorityQueue (CRITICAL / HIGH / NORMAL / LOW)
//!                 │
//!          scheduling loop ── RateLimiter (60/min, 1000/h)
//!                 │
//!          per-call task ──► LlmProvider::invoke (bounded by call timeout)
//!                 │
//!          CallRecord ──► wait_for_call / get_call_result / stats
//! ```
//!
//! A [`Dispatcher`] is built once by the hosting process and cloned into
//! every caller. [`BatchCoordinator`] fans many prompts out through it and
//! collects the results positionally.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use llm_call_dispatcher::{
//!     CallRequest, DispatchError, Dispatcher, DispatcherConfig, SimulatedProvider,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), DispatchError> {
//! let dispatcher = Dispatcher::new(
//!     DispatcherConfig::default(),
//!     Arc::new(SimulatedProvider::default()),
//! );
//! dispatcher.start_processing();
//!
//! let id = dispatcher.submit(CallRequest::new("Generate three product ideas", 42));
//! if let Some(text) = dispatcher.wait_for_call(&id, Duration::from_secs(30)).await {
//!     println!("{text}");
//! }
//!
//! dispatcher.stop_processing().await?;
//! # Ok(())
//! # }
//! ```

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![warn(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod batch;
pub mod call;
pub mod config;
pub mod dispatcher;
pub mod metrics;
pub mod provider;
pub mod queue;
pub mod rate_limit;
pub mod stats;

pub use batch::{BatchCoordinator, CallSpec};
pub use call::{CallId, CallRecord, CallRequest, CallStatus, UserId};
pub use config::DispatcherConfig;
pub use dispatcher::Dispatcher;
pub use provider::{
    build_provider, LlmProvider, OpenAiProvider, ProviderError, ProviderRequest,
    SimulatedProvider,
};
pub use queue::{Priority, QueueStats};
pub use rate_limit::{RateLimitUsage, RateLimiter};
pub use stats::{SystemStats, UserCallStats};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for log aggregators
/// - anything else (including unset) — human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`DispatchError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing() -> Result<(), DispatchError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| DispatchError::Other(format!("tracing init failed: {e}")))
}

/// Top-level dispatcher errors.
///
/// Call-level failures never surface here: they are recorded on the
/// [`CallRecord`] itself. These variants cover host-facing setup and
/// lifecycle problems.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] config::validation::ConfigError),

    /// The provider could not be constructed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The scheduling loop terminated abnormally.
    #[error("scheduling loop terminated: {0}")]
    Shutdown(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_display_includes_message() {
        let err = DispatchError::Other("loop lost its queue".to_string());
        assert!(err.to_string().contains("loop lost its queue"));
    }

    #[test]
    fn test_provider_error_converts_into_dispatch_error() {
        let err: DispatchError = ProviderError::Config("OPENAI_API_KEY not set".into()).into();
        assert!(matches!(err, DispatchError::Provider(_)));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_shutdown_error_display() {
        let err = DispatchError::Shutdown("join failed".into());
        assert_eq!(err.to_string(), "scheduling loop terminated: join failed");
    }

    #[test]
    fn test_init_tracing_second_call_returns_err() {
        // First call may succeed or fail depending on test execution order.
        let _ = init_tracing();
        let result = init_tracing();
        assert!(result.is_err(), "double init must return Err, not panic");
    }
}
