//! SmallTree Providers: LLM provider adapters with priority failover.
//!
//! Each backend is wrapped in an adapter implementing [`Provider`]. The
//! [`ProviderRegistry`] holds the adapters that initialized successfully and
//! their quota status, and the [`Orchestrator`] walks them in priority order
//! until one returns text.

#[cfg(feature = "anthropic")]
mod anthropic;
#[cfg(feature = "cohere")]
mod cohere;
#[cfg(feature = "gemini")]
mod gemini;
#[cfg(any(feature = "openai", feature = "groq"))]
mod openai;
mod orchestrator;
mod quota;
mod registry;

#[cfg(feature = "anthropic")]
pub use anthropic::AnthropicProvider;
#[cfg(feature = "cohere")]
pub use cohere::CohereProvider;
#[cfg(feature = "gemini")]
pub use gemini::GeminiProvider;
#[cfg(any(feature = "openai", feature = "groq"))]
pub use openai::OpenAiProvider;
pub use orchestrator::{Orchestrator, PriorityList, DEFAULT_PRIORITY};
pub use quota::QuotaMatcher;
pub use registry::{build_provider, ProviderHandle, ProviderRegistry};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Provider unavailable in this build: {0}")]
    Unavailable(String),

    #[error("Empty response from {0}")]
    EmptyResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timeout")]
    Timeout,
}

/// Configuration for a provider.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Overrides the substrings that mark an error as quota exhaustion.
    #[serde(default)]
    pub quota_markers: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30_000
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: None,
            endpoint: None,
            enabled: default_true(),
            timeout_ms: default_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            quota_markers: None,
        }
    }
}

impl ProviderConfig {
    /// Config with just a credential and model, everything else default.
    pub fn with_key(api_key: impl Into<String>, model: Option<&str>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            model: model.map(str::to_string),
            ..Self::default()
        }
    }

    /// The credential, if present and not a placeholder such as `YOUR_GROQ_API_KEY_HERE`.
    pub fn credential(&self) -> Option<&str> {
        let key = self.api_key.as_deref()?.trim();
        if key.is_empty() || (key.starts_with("YOUR_") && key.ends_with("_HERE")) {
            return None;
        }
        Some(key)
    }

    fn require_credential(&self, provider: &str) -> Result<String, ProviderError> {
        self.credential()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::NotConfigured(format!("{provider}: api_key required")))
    }

    fn quota_matcher(&self) -> QuotaMatcher {
        match &self.quota_markers {
            Some(markers) => QuotaMatcher::new(markers.iter().cloned()),
            None => QuotaMatcher::default(),
        }
    }

    fn http_client(&self) -> Result<reqwest::Client, ProviderError> {
        Ok(reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .build()?)
    }
}

/// Outcome of a single adapter attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallResult {
    Success(String),
    Failure(String),
}

impl CallResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CallResult::Success(_))
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            CallResult::Success(content) => Some(content),
            CallResult::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            CallResult::Success(_) => None,
            CallResult::Failure(error) => Some(error),
        }
    }
}

/// Trait that all LLM providers must implement.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name (e.g., "cohere", "groq").
    fn name(&self) -> &str;

    /// Backend model identifier.
    fn model(&self) -> &str;

    /// Substrings that mark a failure as quota exhaustion for this backend.
    fn quota_matcher(&self) -> &QuotaMatcher;

    /// Send a single-turn prompt and return the generated text.
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Run `complete` and fold any error into a classified failure string.
    async fn invoke(&self, prompt: &str) -> CallResult {
        match self.complete(prompt).await {
            Ok(text) => CallResult::Success(text),
            Err(e) => CallResult::Failure(classify_failure(self.name(), &e, self.quota_matcher())),
        }
    }

    /// Check if the provider is healthy/reachable.
    async fn health_check(&self) -> Result<(), ProviderError> {
        debug!(provider = self.name(), "Health check");
        self.complete("ping").await.map(|_| ())
    }
}

const QUOTA_PREFIX: &str = "429 ";
const QUOTA_TAG: &str = " quota exceeded: ";

/// Format a provider error, prefixing quota failures with `429`.
pub fn classify_failure(provider: &str, error: &ProviderError, matcher: &QuotaMatcher) -> String {
    let message = error.to_string();
    if matcher.matches(&message) {
        format!("{QUOTA_PREFIX}{provider}{QUOTA_TAG}{message}")
    } else {
        format!("{provider} error: {message}")
    }
}

/// Whether `failure` carries the quota prefix written by [`classify_failure`].
pub fn is_quota_failure(failure: &str) -> bool {
    failure
        .strip_prefix(QUOTA_PREFIX)
        .is_some_and(|rest| rest.contains(QUOTA_TAG))
}

/// Send a prepared request and decode a JSON body, mapping non-2xx statuses to `Api` errors.
async fn send_json<R: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<R, ProviderError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http(e)
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Treat blank text as a failure; otherwise return it trimmed.
fn non_empty(text: Option<String>, provider: &str) -> Result<String, ProviderError> {
    match text.map(|t| t.trim().to_string()) {
        Some(t) if !t.is_empty() => Ok(t),
        _ => Err(ProviderError::EmptyResponse(provider.to_string())),
    }
}
