use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{non_empty, send_json, Provider, ProviderConfig, ProviderError, QuotaMatcher};

const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
    temperature: f32,
    max_tokens: u32,
    quota: QuotaMatcher,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config.require_credential("anthropic")?;

        Ok(Self {
            client: config.http_client()?,
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            quota: config.quota_matcher(),
        })
    }
}

/// Join every text block; tool-use and other non-text blocks are skipped.
fn extract_text(response: AnthropicResponse) -> Result<String, ProviderError> {
    let text: String = response
        .content
        .into_iter()
        .filter_map(|b| b.text)
        .collect::<Vec<_>>()
        .join("");
    non_empty(Some(text), "anthropic")
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn quota_matcher(&self) -> &QuotaMatcher {
        &self.quota
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        debug!(model = %self.model, "Requesting message from Anthropic");

        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let request = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body);

        extract_text(send_json(request).await?)
    }
}
