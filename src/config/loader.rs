//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into a [`DispatcherConfig`], and run
//! validation before returning. This is the entry point the binary uses at
//! startup.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message
//!
//! ## NOT Responsible For
//! - Defining the config schema (that belongs to `mod.rs`)
//! - Deciding which file to load (the caller passes a path)

use std::path::Path;

use super::validation::{self, ConfigError};
use super::DispatcherConfig;

/// Load a [`DispatcherConfig`] from a TOML file.
///
/// # Returns
///
/// - `Ok(DispatcherConfig)` if the file is readable, well-formed, and valid.
/// - `Err(ConfigError::Io)` if the file cannot be read.
/// - `Err(ConfigError::Parse)` if the TOML is malformed.
/// - `Err(ConfigError::Validation)` if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```rust,ignore
/// use llm_call_dispatcher::config::loader::load_from_file;
/// use std::path::Path;
///
/// let config = load_from_file(Path::new("dispatcher.toml"))?;
/// println!("max concurrent: {}", config.limits.max_concurrent_calls);
/// ```
pub fn load_from_file(path: &Path) -> Result<DispatcherConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load a [`DispatcherConfig`] from a TOML string.
///
/// `source_name` identifies the source in error messages.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_str(content: &str, source_name: &str) -> Result<DispatcherConfig, ConfigError> {
    let config: DispatcherConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validation::validate(&config)
        .map_err(|violations| ConfigError::from_violations(source_name, violations))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use std::io::Write;

    const VALID_TOML: &str = r#"
[limits]
calls_per_minute = 30
calls_per_hour = 500
max_concurrent_calls = 2

[defaults]
model = "gpt-4o-mini"
temperature = 0.2
max_retries = 1

[provider]
kind = "simulated"
simulated_delay_ms = 10
"#;

    #[test]
    fn test_load_valid_toml_from_str() {
        let config = load_from_str(VALID_TOML, "test.toml").expect("valid config");
        assert_eq!(config.limits.calls_per_minute, 30);
        assert_eq!(config.limits.max_concurrent_calls, 2);
        assert_eq!(config.defaults.model, "gpt-4o-mini");
        assert_eq!(config.defaults.max_retries, 1);
        assert_eq!(config.defaults.max_tokens, 2000, "unset field keeps default");
        assert_eq!(config.provider.kind, ProviderKind::Simulated);
        assert_eq!(config.provider.simulated_delay_ms, 10);
    }

    #[test]
    fn test_load_valid_toml_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(VALID_TOML.as_bytes()).expect("write");
        let config = load_from_file(file.path()).expect("valid config");
        assert_eq!(config.limits.calls_per_hour, 500);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_from_file(Path::new("/nonexistent/dispatcher.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/dispatcher.toml"));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = load_from_str("[limits\ncalls_per_minute = ", "bad.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let err = load_from_str("[limits]\ncalls_per_minute = \"lots\"", "typed.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_semantic_violations_keep_field_paths() {
        let toml = r#"
[limits]
max_concurrent_calls = 0

[defaults]
temperature = 9.0
"#;
        let err = load_from_str(toml, "invalid.toml").unwrap_err();
        assert_eq!(
            err.fields(),
            vec!["limits.max_concurrent_calls", "defaults.temperature"]
        );
        match &err {
            ConfigError::Validation { file, violations } => {
                assert_eq!(file, "invalid.toml");
                assert!(violations
                    .iter()
                    .all(|v| matches!(v, ConfigError::InvalidField { .. })));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(err.to_string().contains("invalid.toml"));
    }
}
