//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`DispatcherConfig`] that
//! cannot be expressed through the type system alone (range checks,
//! cross-field invariants).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use super::{DispatcherConfig, ProviderKind};

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed in {file}: {}", join_violations(.violations))]
    Validation {
        /// Where the config came from (file path or a caller-chosen label).
        file: String,
        /// Every violated rule, each an [`ConfigError::InvalidField`].
        violations: Vec<ConfigError>,
    },

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "limits.calls_per_minute").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Wrap the output of [`validate`] for the config loaded from `file`.
    pub fn from_violations(file: impl Into<String>, violations: Vec<ConfigError>) -> Self {
        ConfigError::Validation {
            file: file.into(),
            violations,
        }
    }

    /// Field paths named by this error, in rule order.
    ///
    /// Empty for I/O and parse errors.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            ConfigError::InvalidField { field, .. } => vec![field.as_str()],
            ConfigError::Validation { violations, .. } => {
                violations.iter().flat_map(ConfigError::fields).collect()
            }
            ConfigError::Parse { .. } | ConfigError::Io { .. } => Vec::new(),
        }
    }
}

fn join_violations(violations: &[ConfigError]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Validate all semantic constraints on a [`DispatcherConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Errors
///
/// Returns every violated rule as a [`ConfigError::InvalidField`].
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &DispatcherConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Limits ───────────────────────────────────────────────────────
    let limits = &config.limits;
    if limits.calls_per_minute == 0 {
        errors.push(invalid("limits.calls_per_minute", 0, "must be at least 1"));
    }
    if limits.calls_per_hour == 0 {
        errors.push(invalid("limits.calls_per_hour", 0, "must be at least 1"));
    }
    if limits.calls_per_minute > limits.calls_per_hour {
        errors.push(invalid(
            "limits.calls_per_minute",
            limits.calls_per_minute,
            "must be \u{2264} calls_per_hour",
        ));
    }
    if limits.max_concurrent_calls == 0 {
        errors.push(invalid("limits.max_concurrent_calls", 0, "must be at least 1"));
    }

    // ── Call defaults ────────────────────────────────────────────────
    let defaults = &config.defaults;
    if defaults.model.trim().is_empty() {
        errors.push(invalid("defaults.model", "", "model name must not be empty"));
    }
    if !(0.0..=2.0).contains(&defaults.temperature) {
        errors.push(invalid(
            "defaults.temperature",
            defaults.temperature,
            "must be between 0.0 and 2.0",
        ));
    }
    if defaults.max_tokens == 0 {
        errors.push(invalid("defaults.max_tokens", 0, "must be at least 1"));
    }
    if defaults.timeout_secs == 0 {
        errors.push(invalid("defaults.timeout_secs", 0, "must be at least 1 second"));
    }

    // ── Scheduler ────────────────────────────────────────────────────
    let scheduler = &config.scheduler;
    for (field, value) in [
        ("scheduler.idle_poll_ms", scheduler.idle_poll_ms),
        ("scheduler.rate_limited_backoff_ms", scheduler.rate_limited_backoff_ms),
        ("scheduler.error_backoff_ms", scheduler.error_backoff_ms),
    ] {
        if value == 0 {
            errors.push(invalid(field, 0, "must be at least 1ms"));
        }
    }

    // ── Cost ─────────────────────────────────────────────────────────
    if config.cost.chars_per_token == 0 {
        errors.push(invalid("cost.chars_per_token", 0, "must be at least 1"));
    }
    let rate = config.cost.usd_per_1k_tokens;
    if !rate.is_finite() || rate < 0.0 {
        errors.push(invalid(
            "cost.usd_per_1k_tokens",
            rate,
            "must be a finite, non-negative number",
        ));
    }

    // ── Provider ─────────────────────────────────────────────────────
    let provider = &config.provider;
    if provider.kind == ProviderKind::Openai {
        let url = provider.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(invalid(
                "provider.base_url",
                &provider.base_url,
                "must be an http(s) URL",
            ));
        }
        if provider.api_key_env.trim().is_empty() {
            errors.push(invalid(
                "provider.api_key_env",
                "",
                "must name the environment variable holding the API key",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
