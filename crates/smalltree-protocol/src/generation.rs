use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message shown to end users when every provider failed.
pub const UNAVAILABLE_MESSAGE: &str =
    "AI generation is temporarily unavailable, please try again later.";

/// Request to generate text from a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// The prompt sent verbatim to the provider.
    pub prompt: String,
    /// Upper bound on attempted providers. Defaults to the number of registered providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<usize>,
    /// Whether a previous successful outcome for the same prompt may be reused.
    #[serde(default = "default_true")]
    pub use_cache: bool,
}

fn default_true() -> bool {
    true
}

/// Request to reset provider status back to active.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetRequest {
    /// Provider to reset. `None` resets every provider.
    #[serde(default)]
    pub name: Option<String>,
}

/// Availability of a registered provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    /// Eligible for attempts.
    Active,
    /// Reported a quota or rate-limit failure; skipped until reset.
    QuotaExceeded,
}

impl ProviderState {
    pub fn is_active(self) -> bool {
        self == ProviderState::Active
    }
}

impl std::fmt::Display for ProviderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderState::Active => f.write_str("active"),
            ProviderState::QuotaExceeded => f.write_str("quota_exceeded"),
        }
    }
}

/// Introspection entry for one registered provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderStatusReport {
    pub model: String,
    pub status: ProviderState,
    pub available: bool,
}

/// Provider name to status, ordered by name.
pub type ProviderStatusMap = BTreeMap<String, ProviderStatusReport>;

/// Result of a `generate` call.
///
/// On success `content`, `provider` and `model` are set. On failure `error`
/// and `available_providers` are set. `tried_providers` lists every provider
/// attempted, in attempt order, including the one that succeeded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tried_providers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_providers: Option<Vec<String>>,
    /// Time taken to produce the outcome (milliseconds).
    #[serde(default)]
    pub latency_ms: u64,
    /// Whether this outcome came from the response cache.
    #[serde(default)]
    pub cached: bool,
}

impl GenerationOutcome {
    pub fn success(
        content: String,
        provider: impl Into<String>,
        model: impl Into<String>,
        tried_providers: Vec<String>,
    ) -> Self {
        Self {
            success: true,
            content: Some(content),
            provider: Some(provider.into()),
            model: Some(model.into()),
            error: None,
            tried_providers,
            available_providers: None,
            latency_ms: 0,
            cached: false,
        }
    }

    pub fn failure(
        error: impl Into<String>,
        tried_providers: Vec<String>,
        available_providers: Vec<String>,
    ) -> Self {
        Self {
            success: false,
            content: None,
            provider: None,
            model: None,
            error: Some(error.into()),
            tried_providers,
            available_providers: Some(available_providers),
            latency_ms: 0,
            cached: false,
        }
    }

    /// Text safe to show an end user. Backend error text is never included.
    pub fn user_message(&self) -> &str {
        match (&self.success, &self.content) {
            (true, Some(content)) => content,
            _ => UNAVAILABLE_MESSAGE,
        }
    }
}
