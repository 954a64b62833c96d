use smalltree_protocol::{ProviderState, ProviderStatusMap, ProviderStatusReport};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{Provider, ProviderConfig, ProviderError};

const ACTIVE: u8 = 0;
const QUOTA_EXCEEDED: u8 = 1;

/// A successfully initialized provider and its availability.
pub struct ProviderHandle {
    provider: Arc<dyn Provider>,
    status: AtomicU8,
}

impl ProviderHandle {
    fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            status: AtomicU8::new(ACTIVE),
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn status(&self) -> ProviderState {
        match self.status.load(Ordering::Acquire) {
            QUOTA_EXCEEDED => ProviderState::QuotaExceeded,
            _ => ProviderState::Active,
        }
    }

    fn set_status(&self, state: ProviderState) {
        let value = match state {
            ProviderState::Active => ACTIVE,
            ProviderState::QuotaExceeded => QUOTA_EXCEEDED,
        };
        self.status.store(value, Ordering::Release);
    }
}

/// Build the adapter for a provider name.
///
/// Returns `Unavailable` for names whose adapter is not compiled in.
#[cfg_attr(
    not(any(
        feature = "cohere",
        feature = "groq",
        feature = "openai",
        feature = "anthropic",
        feature = "gemini"
    )),
    allow(unused_variables)
)]
pub fn build_provider(
    name: &str,
    config: &ProviderConfig,
) -> Result<Arc<dyn Provider>, ProviderError> {
    match name {
        #[cfg(feature = "cohere")]
        "cohere" => Ok(Arc::new(crate::CohereProvider::new(config)?)),
        #[cfg(feature = "groq")]
        "groq" => Ok(Arc::new(crate::OpenAiProvider::groq(config)?)),
        #[cfg(feature = "openai")]
        "openai" => Ok(Arc::new(crate::OpenAiProvider::openai(config)?)),
        #[cfg(feature = "anthropic")]
        "anthropic" => Ok(Arc::new(crate::AnthropicProvider::new(config)?)),
        #[cfg(feature = "gemini")]
        "gemini" => Ok(Arc::new(crate::GeminiProvider::new(config)?)),
        other => Err(ProviderError::Unavailable(other.to_string())),
    }
}

/// Live providers keyed by name, each with an atomic status.
///
/// The set of providers is fixed after construction; only statuses change,
/// so the registry can be shared behind an `Arc` without locking.
#[derive(Default)]
pub struct ProviderRegistry {
    handles: HashMap<String, ProviderHandle>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize every configured provider, skipping the ones that cannot be built.
    pub fn from_config(configs: &HashMap<String, ProviderConfig>) -> Self {
        let mut registry = Self::new();

        for (name, config) in configs {
            if !config.enabled {
                debug!(provider = %name, "Provider disabled, skipping");
                continue;
            }
            if config.credential().is_none() {
                debug!(provider = %name, "No credential configured, skipping");
                continue;
            }

            match build_provider(name, config) {
                Ok(provider) => {
                    info!(provider = %name, model = provider.model(), "Provider initialized");
                    registry.insert(provider);
                }
                Err(ProviderError::Unavailable(_)) => {
                    debug!(provider = %name, "No adapter compiled in, skipping");
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "Failed to initialize provider");
                }
            }
        }

        registry
    }

    /// Register a provider as active, replacing any provider with the same name.
    pub fn insert(&mut self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        self.handles.insert(name, ProviderHandle::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&ProviderHandle> {
        self.handles.get(name)
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Returns false if no provider with that name is registered.
    pub fn set_status(&self, name: &str, state: ProviderState) -> bool {
        match self.handles.get(name) {
            Some(handle) => {
                handle.set_status(state);
                true
            }
            None => false,
        }
    }

    /// Mark one provider (or every provider) active again.
    ///
    /// Returns the names that were reset.
    pub fn reset(&self, name: Option<&str>) -> Vec<String> {
        match name {
            Some(name) => {
                if self.set_status(name, ProviderState::Active) {
                    info!(provider = %name, "Provider status reset to active");
                    vec![name.to_string()]
                } else {
                    warn!(provider = %name, "Reset requested for unknown provider");
                    vec![]
                }
            }
            None => {
                for handle in self.handles.values() {
                    handle.set_status(ProviderState::Active);
                }
                info!(count = self.handles.len(), "All provider statuses reset to active");
                self.names()
            }
        }
    }

    pub fn status_report(&self) -> ProviderStatusMap {
        self.handles
            .iter()
            .map(|(name, handle)| {
                let status = handle.status();
                (
                    name.clone(),
                    ProviderStatusReport {
                        model: handle.model().to_string(),
                        status,
                        available: status.is_active(),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(all(feature = "groq", feature = "cohere"))]
    #[test]
    fn missing_credentials_are_skipped() {
        let mut configs = HashMap::new();
        configs.insert(
            "groq".to_string(),
            ProviderConfig::with_key("gsk_test", None),
        );
        configs.insert("cohere".to_string(), ProviderConfig::default());
        configs.insert(
            "gemini".to_string(),
            ProviderConfig::with_key("YOUR_GEMINI_API_KEY_HERE", None),
        );

        let registry = ProviderRegistry::from_config(&configs);
        assert_eq!(registry.names(), vec!["groq".to_string()]);
        assert!(registry.get("cohere").is_none());
    }

    #[test]
    fn unknown_backend_is_unavailable() {
        let result = build_provider("llm-farm", &ProviderConfig::with_key("secret", None));
        assert!(matches!(result, Err(ProviderError::Unavailable(name)) if name == "llm-farm"));
    }

    #[test]
    fn unknown_and_disabled_providers_are_skipped() {
        let mut configs = HashMap::new();
        configs.insert(
            "llm-farm".to_string(),
            ProviderConfig::with_key("secret", None),
        );
        configs.insert(
            "openai".to_string(),
            ProviderConfig {
                enabled: false,
                ..ProviderConfig::with_key("sk-test", None)
            },
        );

        let registry = ProviderRegistry::from_config(&configs);
        assert!(registry.is_empty());
    }

    #[cfg(feature = "anthropic")]
    #[test]
    fn status_transitions_and_reset() {
        let mut configs = HashMap::new();
        configs.insert(
            "anthropic".to_string(),
            ProviderConfig::with_key("sk-ant-test", Some("claude-3-5-haiku-latest")),
        );
        let registry = ProviderRegistry::from_config(&configs);

        assert!(registry.set_status("anthropic", ProviderState::QuotaExceeded));
        let report = registry.status_report();
        assert_eq!(report["anthropic"].status, ProviderState::QuotaExceeded);
        assert!(!report["anthropic"].available);
        assert_eq!(report["anthropic"].model, "claude-3-5-haiku-latest");

        assert_eq!(registry.reset(Some("anthropic")), vec!["anthropic".to_string()]);
        assert_eq!(
            registry.get("anthropic").unwrap().status(),
            ProviderState::Active
        );
    }

    #[test]
    fn reset_unknown_provider_is_a_noop() {
        let registry = ProviderRegistry::new();
        assert!(registry.reset(Some("cohere")).is_empty());
        assert!(!registry.set_status("cohere", ProviderState::QuotaExceeded));
    }

    #[test]
    fn build_provider_rejects_unknown_names() {
        let err = build_provider("watsonx", &ProviderConfig::with_key("k", None))
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::Unavailable(name) if name == "watsonx"));
    }
}
