use serde::Deserialize;
use smalltree_providers::{
    Orchestrator, PriorityList, ProviderConfig, QuotaMatcher, DEFAULT_PRIORITY,
};
use std::collections::HashMap;
use std::path::PathBuf;

/// Top-level daemon configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
    #[serde(default = "default_pid_path")]
    pub pid_path: String,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_priority")]
    pub priority: Vec<String>,
    #[serde(default = "default_quota_markers")]
    pub quota_markers: Vec<String>,
}

fn default_socket_path() -> String {
    "/tmp/smalltree.sock".to_string()
}

fn default_pid_path() -> String {
    "/tmp/smalltree.pid".to_string()
}

fn default_cache_size() -> usize {
    256
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_priority() -> Vec<String> {
    DEFAULT_PRIORITY.iter().map(|s| s.to_string()).collect()
}

fn default_quota_markers() -> Vec<String> {
    QuotaMatcher::default().markers().to_vec()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            pid_path: default_pid_path(),
            cache_size: default_cache_size(),
            cache_ttl_secs: default_cache_ttl_secs(),
            log_level: default_log_level(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            priority: default_priority(),
            quota_markers: default_quota_markers(),
        }
    }
}

impl Config {
    /// Load config from the default path (~/.config/smalltree/config.toml),
    /// then apply environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a specific path, then apply environment overrides.
    pub fn load_from(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `<NAME>_API_KEY`, `<NAME>_MODEL` and `SMALLTREE_PRIORITY` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for name in DEFAULT_PRIORITY {
            let prefix = name.to_uppercase();

            if let Some(key) = lookup(&format!("{prefix}_API_KEY")).filter(|k| !k.is_empty()) {
                self.providers.entry(name.to_string()).or_default().api_key = Some(key);
            }
            if let Some(model) = lookup(&format!("{prefix}_MODEL")).filter(|m| !m.is_empty()) {
                self.providers.entry(name.to_string()).or_default().model = Some(model);
            }
        }

        if let Some(priority) = lookup("SMALLTREE_PRIORITY") {
            let names: Vec<String> = priority
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !names.is_empty() {
                self.ai.priority = names;
            }
        }
    }

    /// Priority list with names lowercased to match the `[providers.<name>]` keys.
    pub fn priority(&self) -> PriorityList {
        PriorityList::new(self.ai.priority.iter().map(|name| name.to_lowercase()))
    }

    /// Build the orchestrator described by this config.
    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::from_config(&self.providers, self.priority())
            .with_quota_matcher(QuotaMatcher::new(self.ai.quota_markers.iter().cloned()))
    }

    pub fn config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(format!("{home}/.config/smalltree/config.toml"))
    }

    pub fn pid_path(&self) -> PathBuf {
        PathBuf::from(&self.daemon.pid_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.daemon.socket_path, "/tmp/smalltree.sock");
        assert_eq!(config.pid_path(), PathBuf::from("/tmp/smalltree.pid"));
        assert_eq!(config.daemon.cache_size, 256);
        assert_eq!(config.ai.priority[0], "cohere");
        assert_eq!(config.ai.quota_markers, vec!["429", "quota", "rate limit"]);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[daemon]
socket_path = "/tmp/test.sock"
pid_path = "/tmp/test.pid"
cache_size = 50
log_level = "debug"

[ai]
priority = ["groq", "gemini"]

[providers.groq]
api_key = "gsk_test"
model = "llama-3.1-70b-versatile"

[providers.gemini]
api_key = "AIza-test"
timeout_ms = 10000
quota_markers = ["RESOURCE_EXHAUSTED"]
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.daemon.socket_path, "/tmp/test.sock");
        assert_eq!(config.pid_path(), PathBuf::from("/tmp/test.pid"));
        assert_eq!(config.daemon.cache_size, 50);
        assert_eq!(config.daemon.cache_ttl_secs, 3600);
        assert_eq!(config.ai.priority, vec!["groq", "gemini"]);
        assert_eq!(config.ai.quota_markers.len(), 3);
        let gemini = &config.providers["gemini"];
        assert_eq!(gemini.timeout_ms, 10000);
        assert_eq!(
            gemini.quota_markers.as_deref(),
            Some(&["RESOURCE_EXHAUSTED".to_string()][..])
        );
        assert!(config.providers["groq"].enabled);
    }

    #[test]
    fn env_overrides_fill_keys_models_and_priority() {
        let mut config: Config = toml::from_str(
            r#"
[providers.openai]
api_key = "from-file"
model = "gpt-4o"
"#,
        )
        .unwrap();

        config.apply_overrides(|key| match key {
            "GROQ_API_KEY" => Some("gsk_env".to_string()),
            "OPENAI_MODEL" => Some("gpt-4o-mini".to_string()),
            "ANTHROPIC_API_KEY" => Some(String::new()),
            "SMALLTREE_PRIORITY" => Some("Groq, openai".to_string()),
            _ => None,
        });

        assert_eq!(config.providers["groq"].api_key.as_deref(), Some("gsk_env"));
        assert_eq!(config.providers["openai"].api_key.as_deref(), Some("from-file"));
        assert_eq!(config.providers["openai"].model.as_deref(), Some("gpt-4o-mini"));
        assert!(!config.providers.contains_key("anthropic"));
        assert_eq!(config.ai.priority, vec!["Groq", "openai"]);
        assert_eq!(
            config.priority().iter().collect::<Vec<_>>(),
            vec!["groq", "openai"]
        );
    }

    #[test]
    fn example_config_parses_without_registering_placeholders() {
        let config: Config = toml::from_str(include_str!("../../../config.example.toml")).unwrap();
        assert_eq!(config.providers.len(), 5);
        assert_eq!(config.providers["gemini"].timeout_ms, 45000);
        assert!(config.orchestrator().registry().is_empty());
    }

    #[test]
    fn orchestrator_registers_only_credentialed_providers() {
        let config: Config = toml::from_str(
            r#"
[providers.cohere]
api_key = "co-test"

[providers.groq]
model = "llama-3.1-8b-instant"
"#,
        )
        .unwrap();

        let orch = config.orchestrator();
        assert_eq!(orch.registry().names(), vec!["cohere".to_string()]);
    }
}
