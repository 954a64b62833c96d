use smalltree_protocol::{GenerationOutcome, ProviderState, ProviderStatusMap};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::{is_quota_failure, CallResult, ProviderConfig, ProviderRegistry, QuotaMatcher};

/// Default provider preference: education-tuned and free tiers first.
pub const DEFAULT_PRIORITY: [&str; 5] = ["cohere", "groq", "openai", "anthropic", "gemini"];

/// Ordered provider names, matched exactly against registry keys.
///
/// Names are trimmed; blanks and duplicates are dropped, keeping the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityList(Vec<String>);

impl PriorityList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered: Vec<String> = Vec::new();
        for name in names {
            let name = name.into().trim().to_string();
            if !name.is_empty() && !ordered.contains(&name) {
                ordered.push(name);
            }
        }
        Self(ordered)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for PriorityList {
    fn default() -> Self {
        Self::new(DEFAULT_PRIORITY)
    }
}

/// Tries providers in priority order and returns the first success.
///
/// A provider whose failure carries the adapter quota prefix, or matches
/// the orchestrator's quota matcher, is marked
/// `QuotaExceeded` and skipped by every later call until [`reset`](Self::reset).
/// Any other failure falls through to the next provider without changing
/// its status.
pub struct Orchestrator {
    registry: ProviderRegistry,
    priority: PriorityList,
    quota: QuotaMatcher,
}

impl Orchestrator {
    pub fn new(registry: ProviderRegistry, priority: PriorityList) -> Self {
        Self {
            registry,
            priority,
            quota: QuotaMatcher::default(),
        }
    }

    /// Build the registry from provider configs and wrap it.
    pub fn from_config(configs: &HashMap<String, ProviderConfig>, priority: PriorityList) -> Self {
        let registry = ProviderRegistry::from_config(configs);
        info!(
            providers = ?registry.names(),
            priority = ?priority,
            "Orchestrator initialized"
        );
        Self::new(registry, priority)
    }

    /// Replace the extra markers that mark a provider exhausted.
    ///
    /// Failures already tagged as quota by the adapter always count.
    pub fn with_quota_matcher(mut self, quota: QuotaMatcher) -> Self {
        self.quota = quota;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn priority(&self) -> &PriorityList {
        &self.priority
    }

    /// Generate with an attempt budget equal to the number of registered providers.
    pub async fn generate(&self, prompt: &str) -> GenerationOutcome {
        self.generate_with_budget(prompt, self.registry.len()).await
    }

    pub async fn generate_with_budget(&self, prompt: &str, max_attempts: usize) -> GenerationOutcome {
        let start = Instant::now();
        let mut tried: Vec<String> = Vec::new();
        let mut last_error: Option<String> = None;

        for name in self.priority.iter() {
            let Some(handle) = self.registry.get(name) else {
                continue;
            };
            if tried.len() >= max_attempts {
                debug!(max_attempts, "Attempt budget exhausted");
                break;
            }
            if !handle.status().is_active() {
                debug!(provider = name, status = %handle.status(), "Skipping provider");
                continue;
            }

            info!(provider = name, "Trying provider");
            match handle.provider().invoke(prompt).await {
                CallResult::Success(content) => {
                    tried.push(name.to_string());
                    let latency_ms = start.elapsed().as_millis() as u64;
                    info!(provider = name, latency_ms, "Provider succeeded");
                    let mut outcome =
                        GenerationOutcome::success(content, name, handle.model(), tried);
                    outcome.latency_ms = latency_ms;
                    return outcome;
                }
                CallResult::Failure(error) => {
                    tried.push(name.to_string());
                    warn!(provider = name, error = %error, "Provider failed");
                    if is_quota_failure(&error) || self.quota.matches(&error) {
                        self.registry.set_status(name, ProviderState::QuotaExceeded);
                        warn!(provider = name, "Provider marked as quota exceeded");
                    }
                    last_error = Some(error);
                }
            }
        }

        let error = match last_error {
            Some(e) => format!("All AI providers failed. Last error: {e}"),
            None => "No eligible AI providers".to_string(),
        };
        warn!(tried = ?tried, "Generation failed");

        let mut outcome = GenerationOutcome::failure(error, tried, self.registry.names());
        outcome.latency_ms = start.elapsed().as_millis() as u64;
        outcome
    }

    pub fn status(&self) -> ProviderStatusMap {
        self.registry.status_report()
    }

    /// Mark `name` (or every provider, for `None`) active again.
    pub fn reset(&self, name: Option<&str>) -> Vec<String> {
        self.registry.reset(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Provider, ProviderError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Copy)]
    enum Reply {
        Text(&'static str),
        Quota,
        Broken,
        Overloaded,
    }

    struct ScriptedProvider {
        name: &'static str,
        reply: Reply,
        calls: AtomicUsize,
        quota: QuotaMatcher,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply,
                calls: AtomicUsize::new(0),
                quota: QuotaMatcher::default(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn model(&self) -> &str {
            "scripted-1"
        }

        fn quota_matcher(&self) -> &QuotaMatcher {
            &self.quota
        }

        async fn complete(&self, _prompt: &str) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Reply::Text(text) => Ok(text.to_string()),
                Reply::Quota => Err(ProviderError::Api {
                    status: 429,
                    message: "Too Many Requests".to_string(),
                }),
                Reply::Broken => Err(ProviderError::EmptyResponse(self.name.to_string())),
                Reply::Overloaded => Err(ProviderError::Api {
                    status: 503,
                    message: "capacity exhausted".to_string(),
                }),
            }
        }
    }

    fn orchestrator(providers: &[Arc<ScriptedProvider>]) -> Orchestrator {
        let mut registry = ProviderRegistry::new();
        for p in providers {
            registry.insert(p.clone());
        }
        let priority = PriorityList::new(providers.iter().map(|p| p.name));
        Orchestrator::new(registry, priority)
    }

    #[tokio::test]
    async fn quota_failure_falls_over_to_next_provider() {
        let a = ScriptedProvider::new("a", Reply::Quota);
        let b = ScriptedProvider::new("b", Reply::Text("menu from b"));
        let orch = orchestrator(&[a.clone(), b.clone()]);

        let outcome = orch.generate("weekly menu").await;
        assert!(outcome.success);
        assert_eq!(outcome.content.as_deref(), Some("menu from b"));
        assert_eq!(outcome.provider.as_deref(), Some("b"));
        assert_eq!(outcome.model.as_deref(), Some("scripted-1"));
        assert_eq!(outcome.tried_providers, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let a = ScriptedProvider::new("a", Reply::Text("from a"));
        let b = ScriptedProvider::new("b", Reply::Text("from b"));
        let c = ScriptedProvider::new("c", Reply::Text("from c"));
        let orch = orchestrator(&[a.clone(), b.clone(), c.clone()]);

        let outcome = orch.generate("curriculum").await;
        assert_eq!(outcome.content.as_deref(), Some("from a"));
        assert_eq!(outcome.tried_providers, vec!["a"]);
        assert_eq!(b.calls(), 0);
        assert_eq!(c.calls(), 0);
    }

    #[tokio::test]
    async fn quota_status_sticks_until_reset() {
        let a = ScriptedProvider::new("a", Reply::Quota);
        let b = ScriptedProvider::new("b", Reply::Text("ok"));
        let orch = orchestrator(&[a.clone(), b.clone()]);

        orch.generate("first").await;
        assert_eq!(a.calls(), 1);
        assert_eq!(orch.status()["a"].status, ProviderState::QuotaExceeded);

        let outcome = orch.generate("second").await;
        assert_eq!(a.calls(), 1);
        assert_eq!(outcome.tried_providers, vec!["b"]);

        assert_eq!(orch.reset(Some("a")), vec!["a".to_string()]);
        orch.generate("third").await;
        assert_eq!(a.calls(), 2);
    }

    #[tokio::test]
    async fn non_quota_failure_does_not_stick() {
        let a = ScriptedProvider::new("a", Reply::Broken);
        let b = ScriptedProvider::new("b", Reply::Text("ok"));
        let orch = orchestrator(&[a.clone(), b.clone()]);

        orch.generate("first").await;
        assert_eq!(orch.status()["a"].status, ProviderState::Active);

        let outcome = orch.generate("second").await;
        assert_eq!(a.calls(), 2);
        assert_eq!(outcome.tried_providers, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn total_exhaustion_reports_every_provider() {
        let a = ScriptedProvider::new("a", Reply::Quota);
        let b = ScriptedProvider::new("b", Reply::Broken);
        let c = ScriptedProvider::new("c", Reply::Quota);
        let orch = orchestrator(&[a, b, c]);

        let outcome = orch.generate("menu").await;
        assert!(!outcome.success);
        assert_eq!(outcome.tried_providers, vec!["a", "b", "c"]);
        assert_eq!(
            outcome.available_providers,
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        let error = outcome.error.unwrap();
        assert!(error.starts_with("All AI providers failed. Last error: 429 c quota exceeded"));

        // Quota-exhausted providers still count as available.
        let outcome = orch.generate("menu").await;
        assert_eq!(outcome.tried_providers, vec!["b"]);
        assert_eq!(outcome.available_providers.map(|p| p.len()), Some(3));
    }

    #[tokio::test]
    async fn attempt_budget_limits_attempts() {
        let a = ScriptedProvider::new("a", Reply::Broken);
        let b = ScriptedProvider::new("b", Reply::Text("from b"));
        let c = ScriptedProvider::new("c", Reply::Text("from c"));
        let orch = orchestrator(&[a.clone(), b.clone(), c.clone()]);

        let outcome = orch.generate_with_budget("menu", 1).await;
        assert!(!outcome.success);
        assert_eq!(outcome.tried_providers, vec!["a"]);
        assert_eq!(b.calls(), 0);
        assert_eq!(c.calls(), 0);
    }

    #[tokio::test]
    async fn unregistered_priority_names_are_ignored() {
        let b = ScriptedProvider::new("b", Reply::Text("from b"));
        let mut registry = ProviderRegistry::new();
        registry.insert(b.clone());
        let orch = Orchestrator::new(registry, PriorityList::new(["ghost", "b", "b"]));

        let outcome = orch.generate("menu").await;
        assert_eq!(outcome.tried_providers, vec!["b"]);
    }

    #[tokio::test]
    async fn empty_registry_fails_without_attempts() {
        let orch = Orchestrator::new(ProviderRegistry::new(), PriorityList::default());
        let outcome = orch.generate("menu").await;
        assert!(!outcome.success);
        assert!(outcome.tried_providers.is_empty());
        assert_eq!(outcome.error.as_deref(), Some("No eligible AI providers"));
        assert_eq!(outcome.available_providers, Some(vec![]));
    }

    #[tokio::test]
    async fn custom_quota_matcher_adds_to_adapter_classification() {
        let a = ScriptedProvider::new("a", Reply::Quota);
        let b = ScriptedProvider::new("b", Reply::Overloaded);
        let c = ScriptedProvider::new("c", Reply::Broken);
        let d = ScriptedProvider::new("d", Reply::Text("ok"));
        let orch = orchestrator(&[a.clone(), b.clone(), c.clone(), d])
            .with_quota_matcher(QuotaMatcher::new(["exhausted"]));

        let outcome = orch.generate("menu").await;
        assert_eq!(outcome.tried_providers, vec!["a", "b", "c", "d"]);

        // Adapter-tagged 429 still sticks; the custom marker catches the 503.
        let status = orch.status();
        assert_eq!(status["a"].status, ProviderState::QuotaExceeded);
        assert_eq!(status["b"].status, ProviderState::QuotaExceeded);
        assert_eq!(status["c"].status, ProviderState::Active);

        orch.generate("menu").await;
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_share_status() {
        let a = ScriptedProvider::new("a", Reply::Quota);
        let b = ScriptedProvider::new("b", Reply::Text("ok"));
        let orch = Arc::new(orchestrator(&[a.clone(), b.clone()]));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let orch = orch.clone();
                tokio::spawn(async move { orch.generate(&format!("prompt {i}")).await })
            })
            .collect();

        for task in tasks {
            let outcome = task.await.unwrap();
            assert!(outcome.success);
            assert_eq!(outcome.provider.as_deref(), Some("b"));
        }
        assert!(a.calls() >= 1 && a.calls() <= 16);
        assert_eq!(b.calls(), 16);
        assert_eq!(orch.status()["a"].status, ProviderState::QuotaExceeded);
    }

    #[tokio::test]
    async fn mixed_case_names_are_attempted() {
        let a = ScriptedProvider::new("A", Reply::Quota);
        let b = ScriptedProvider::new("B", Reply::Text("from B"));
        let orch = orchestrator(&[a.clone(), b.clone()]);

        let outcome = orch.generate("menu").await;
        assert!(outcome.success);
        assert_eq!(outcome.provider.as_deref(), Some("B"));
        assert_eq!(outcome.tried_providers, vec!["A", "B"]);
        assert_eq!(orch.status()["A"].status, ProviderState::QuotaExceeded);
    }

    #[test]
    fn priority_list_trims_and_dedups() {
        let list = PriorityList::new([" groq", "cohere", "groq", " ", "Gemini"]);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec!["groq", "cohere", "Gemini"]);
        assert_eq!(PriorityList::default().len(), 5);
    }
}
