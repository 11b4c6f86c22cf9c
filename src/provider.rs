//! LLM provider abstraction and implementations
//!
//! Provides the [`LlmProvider`] trait the dispatcher invokes for every call,
//! plus two implementations:
//! - [`SimulatedProvider`]: canned keyword responses after a fixed delay
//! - [`OpenAiProvider`]: OpenAI-compatible chat-completions API
//!
//! ## Environment Variables
//!
//! - `OPENAI_API_KEY`: Required for [`OpenAiProvider::new`] (the variable
//!   name is configurable through `[provider] api_key_env`)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ProviderConfig, ProviderKind};

/// Parameters of one provider invocation, resolved from a call record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderRequest {
    /// Prompt text sent as the user message.
    pub prompt: String,
    /// Model name.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Max-token budget.
    pub max_tokens: u32,
}

/// Errors a provider can report for a single invocation.
///
/// [`ProviderError::Timeout`] is the only variant the dispatcher treats as
/// terminal without retrying.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The provider gave up waiting for the backend.
    #[error("provider timed out: {0}")]
    Timeout(String),

    /// Transport-level failure (connect, TLS, body read).
    #[error("http error: {0}")]
    Http(String),

    /// The backend answered with a non-success status.
    #[error("api error {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, as returned.
        body: String,
    },

    /// The backend answered 2xx but the payload was unusable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The provider is misconfigured (missing key, bad URL).
    #[error("provider configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// `true` for [`ProviderError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout(_))
    }
}

/// Outbound boundary to an LLM backend.
///
/// Implementations must be thread-safe (Send + Sync) because the dispatcher
/// runs every call on its own task. The trait is object-safe so the
/// dispatcher can hold an `Arc<dyn LlmProvider>`.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for `request`.
    async fn invoke(&self, request: &ProviderRequest) -> Result<String, ProviderError>;

    /// Short backend name for logs.
    fn name(&self) -> &str;
}

/// Build the provider selected by `[provider] kind`.
///
/// # Errors
///
/// Returns [`ProviderError::Config`] if an HTTP provider's API key variable
/// is unset.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    match config.kind {
        ProviderKind::Simulated => Ok(Arc::new(SimulatedProvider::with_delay(
            Duration::from_millis(config.simulated_delay_ms),
        ))),
        ProviderKind::Openai => Ok(Arc::new(
            OpenAiProvider::from_env(&config.api_key_env)?.with_base_url(&config.base_url),
        )),
    }
}

// ============================================================================
// Simulated Provider
// ============================================================================

/// Deterministic stand-in for a real backend.
///
/// Sleeps for a fixed delay, then answers based on keywords in the prompt.
/// Useful for demos and for exercising the dispatcher without network access.
#[derive(Debug, Clone)]
pub struct SimulatedProvider {
    delay: Duration,
}

impl SimulatedProvider {
    /// Provider with the given simulated latency.
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }

    fn respond(prompt: &str) -> String {
        let lower = prompt.to_lowercase();
        if lower.contains("generate") {
            "Generated response with multiple ideas and detailed analysis.".to_string()
        } else if lower.contains("evaluate") {
            "Evaluation response with scores, strengths, and recommendations.".to_string()
        } else if lower.contains("iterate") {
            "Iteration response with improved version and changes made.".to_string()
        } else {
            let head: String = prompt.chars().take(100).collect();
            format!("Response to prompt: {head}...")
        }
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::with_delay(Duration::from_millis(500))
    }
}

#[async_trait]
impl LlmProvider for SimulatedProvider {
    async fn invoke(&self, request: &ProviderRequest) -> Result<String, ProviderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Self::respond(&request.prompt))
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

// ============================================================================
// OpenAI Provider
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions provider.
///
/// ## Example
///
/// ```no_run
/// use llm_call_dispatcher::OpenAiProvider;
/// use std::time::Duration;
///
/// let provider = OpenAiProvider::with_api_key("sk-test")
///     .with_base_url("http://localhost:8000/v1")
///     .with_timeout(Duration::from_secs(60));
/// ```
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Option<Duration>,
}

impl OpenAiProvider {
    /// Create a provider reading its key from `OPENAI_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the variable is unset or empty.
    pub fn new() -> Result<Self, ProviderError> {
        Self::from_env("OPENAI_API_KEY")
    }

    /// Create a provider reading its key from the named variable.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the variable is unset or empty.
    pub fn from_env(var: &str) -> Result<Self, ProviderError> {
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(Self::with_api_key(key)),
            _ => Err(ProviderError::Config(format!(
                "{var} environment variable not set"
            ))),
        }
    }

    /// Create a provider with an explicit key.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout: None,
        }
    }

    /// Point at another OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set an HTTP-level request timeout.
    ///
    /// The dispatcher already bounds every call by its own timeout; this is
    /// an extra limit on the HTTP exchange itself.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

fn map_transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Http(e.to_string())
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn invoke(&self, request: &ProviderRequest) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: &request.model,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("failed to parse response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("no choices in response".to_string()))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> ProviderRequest {
        ProviderRequest {
            prompt: prompt.to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
        }
    }

    #[tokio::test]
    async fn test_simulated_keyword_responses() {
        let provider = SimulatedProvider::with_delay(Duration::ZERO);
        let generate = provider.invoke(&request("Please GENERATE ideas")).await.unwrap();
        assert!(generate.starts_with("Generated response"));
        let evaluate = provider.invoke(&request("evaluate this")).await.unwrap();
        assert!(evaluate.starts_with("Evaluation response"));
        let iterate = provider.invoke(&request("iterate on it")).await.unwrap();
        assert!(iterate.starts_with("Iteration response"));
    }

    #[tokio::test]
    async fn test_simulated_fallback_truncates_prompt() {
        let provider = SimulatedProvider::with_delay(Duration::ZERO);
        let long = "x".repeat(250);
        let out = provider.invoke(&request(&long)).await.unwrap();
        assert_eq!(out, format!("Response to prompt: {}...", "x".repeat(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_delay_is_applied() {
        let provider = SimulatedProvider::with_delay(Duration::from_millis(500));
        let start = tokio::time::Instant::now();
        provider.invoke(&request("hello")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[test]
    fn test_from_env_missing_var_is_config_error() {
        let err = OpenAiProvider::from_env("LLM_DISPATCHER_TEST_UNSET_KEY_VAR")
            .err()
            .expect("must fail");
        assert!(matches!(err, ProviderError::Config(_)));
        assert!(err.to_string().contains("LLM_DISPATCHER_TEST_UNSET_KEY_VAR"));
    }

    #[test]
    fn test_only_timeout_reports_is_timeout() {
        assert!(ProviderError::Timeout("slow".into()).is_timeout());
        assert!(!ProviderError::Http("reset".into()).is_timeout());
        assert!(!ProviderError::Api {
            status: 500,
            body: "boom".into()
        }
        .is_timeout());
    }

    #[test]
    fn test_build_simulated_provider() {
        let provider = build_provider(&ProviderConfig::default()).unwrap();
        assert_eq!(provider.name(), "simulated");
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let provider = OpenAiProvider::with_api_key("k").with_base_url("http://host/v1/");
        assert_eq!(provider.base_url, "http://host/v1");
    }
}
