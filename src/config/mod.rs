//! # Dispatcher configuration
//!
//! ## Responsibility
//! Describe every tunable of the dispatcher as a TOML-deserializable
//! [`DispatcherConfig`]. Every field has a default, so an empty file (or
//! no file at all) yields the stock limits: 60 calls/minute, 1000
//! calls/hour, 5 concurrent calls.
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same config
//! - Validated: loading through [`loader`] runs [`validation::validate`]
//! - Schema-exportable: [`json_schema`] feeds IDE autocomplete
//!
//! ## NOT Responsible For
//! - Building the provider (that belongs to `provider`)
//! - Running anything (that belongs to `dispatcher`)

pub mod loader;
pub mod validation;

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ── Default value functions ──────────────────────────────────────────────

fn default_calls_per_minute() -> usize {
    60
}

fn default_calls_per_hour() -> usize {
    1000
}

fn default_max_concurrent_calls() -> usize {
    5
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

/// Default per-call timeout: 300 seconds.
fn default_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_idle_poll_ms() -> u64 {
    100
}

fn default_rate_limited_backoff_ms() -> u64 {
    1000
}

fn default_error_backoff_ms() -> u64 {
    1000
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

fn default_chars_per_token() -> u32 {
    4
}

/// GPT-4-era list price, $0.03 per 1K tokens.
fn default_usd_per_1k_tokens() -> f64 {
    0.03
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_simulated_delay_ms() -> u64 {
    500
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for a dispatcher instance.
///
/// # Example
///
/// ```toml
/// [limits]
/// calls_per_minute = 30
/// max_concurrent_calls = 2
///
/// [defaults]
/// model = "gpt-4o-mini"
///
/// [provider]
/// kind = "openai"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct DispatcherConfig {
    /// Throughput and concurrency limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Defaults applied to calls that leave a parameter unset.
    #[serde(default)]
    pub defaults: DefaultsConfig,
    /// Scheduling loop timing.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Token and cost estimation.
    #[serde(default)]
    pub cost: CostConfig,
    /// Which provider to call.
    #[serde(default)]
    pub provider: ProviderConfig,
}

// ── Limits ───────────────────────────────────────────────────────────────

/// Global throughput and concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct LimitsConfig {
    /// Calls admitted per rolling 60 s window.
    #[serde(default = "default_calls_per_minute")]
    pub calls_per_minute: usize,
    /// Calls admitted per rolling 3600 s window.
    #[serde(default = "default_calls_per_hour")]
    pub calls_per_hour: usize,
    /// Calls allowed in `Processing` at once.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            calls_per_minute: default_calls_per_minute(),
            calls_per_hour: default_calls_per_hour(),
            max_concurrent_calls: default_max_concurrent_calls(),
        }
    }
}

// ── Call defaults ────────────────────────────────────────────────────────

/// Per-call parameter defaults.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct DefaultsConfig {
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Max-token budget.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Requeues allowed after a non-timeout failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl DefaultsConfig {
    /// The default call timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ── Scheduler ────────────────────────────────────────────────────────────

/// Scheduling loop timing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SchedulerConfig {
    /// Idle wait when nothing is admissible (ms).
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    /// Wait after the rate limiter denies a call (ms).
    #[serde(default = "default_rate_limited_backoff_ms")]
    pub rate_limited_backoff_ms: u64,
    /// Wait after an error in the loop's own control logic (ms).
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    /// How long shutdown waits for in-flight calls before aborting them (ms).
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: default_idle_poll_ms(),
            rate_limited_backoff_ms: default_rate_limited_backoff_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Idle wait as a [`Duration`].
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    /// Rate-limited wait as a [`Duration`].
    pub fn rate_limited_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limited_backoff_ms)
    }

    /// Error wait as a [`Duration`].
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// ── Cost ─────────────────────────────────────────────────────────────────

/// Token and cost estimation constants.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CostConfig {
    /// Characters counted as one token.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: u32,
    /// Price per 1000 estimated tokens, in USD.
    #[serde(default = "default_usd_per_1k_tokens")]
    pub usd_per_1k_tokens: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            chars_per_token: default_chars_per_token(),
            usd_per_1k_tokens: default_usd_per_1k_tokens(),
        }
    }
}

// ── Provider ─────────────────────────────────────────────────────────────

/// Supported provider backends.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Canned keyword responses after a fixed delay. No network.
    #[default]
    Simulated,
    /// OpenAI-compatible chat-completions API.
    #[serde(alias = "open_ai")]
    Openai,
}

/// Provider selection and connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ProviderConfig {
    /// Which backend to build.
    #[serde(default)]
    pub kind: ProviderKind,
    /// API base URL for HTTP providers.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Simulated provider latency (ms).
    #[serde(default = "default_simulated_delay_ms")]
    pub simulated_delay_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            simulated_delay_ms: default_simulated_delay_ms(),
        }
    }
}

/// Export the JSON Schema for `DispatcherConfig`.
///
/// This enables IDE autocomplete when editing TOML config files.
///
/// # Panics
///
/// This function never panics.
pub fn json_schema() -> String {
    let schema = schemars::schema_for!(DispatcherConfig);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
