//! OpenAI-compatible chat completions. Also serves Groq, which exposes the
//! same wire format under a different endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{non_empty, send_json, Provider, ProviderConfig, ProviderError, QuotaMatcher};

#[cfg(feature = "openai")]
const OPENAI_MODEL: &str = "gpt-4o-mini";
#[cfg(feature = "openai")]
const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
#[cfg(feature = "groq")]
const GROQ_MODEL: &str = "llama-3.1-8b-instant";
#[cfg(feature = "groq")]
const GROQ_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";

pub struct OpenAiProvider {
    name: &'static str,
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
    temperature: f32,
    max_tokens: u32,
    quota: QuotaMatcher,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiProvider {
    #[cfg(feature = "openai")]
    pub fn openai(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Self::build("openai", OPENAI_MODEL, OPENAI_ENDPOINT, config)
    }

    #[cfg(feature = "groq")]
    pub fn groq(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Self::build("groq", GROQ_MODEL, GROQ_ENDPOINT, config)
    }

    fn build(
        name: &'static str,
        default_model: &str,
        default_endpoint: &str,
        config: &ProviderConfig,
    ) -> Result<Self, ProviderError> {
        let api_key = config.require_credential(name)?;

        Ok(Self {
            name,
            client: config.http_client()?,
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| default_endpoint.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            quota: config.quota_matcher(),
        })
    }
}

fn extract_text(response: ChatResponse, provider: &str) -> Result<String, ProviderError> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content);
    non_empty(text, provider)
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn quota_matcher(&self) -> &QuotaMatcher {
        &self.quota
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        debug!(provider = self.name, model = %self.model, "Requesting chat completion");

        let body = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body);

        extract_text(send_json(request).await?, self.name)
    }
}
