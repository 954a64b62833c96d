use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{non_empty, send_json, Provider, ProviderConfig, ProviderError, QuotaMatcher};

const DEFAULT_MODEL: &str = "command-r";
const DEFAULT_ENDPOINT: &str = "https://api.cohere.ai/v1/chat";

pub struct CohereProvider {
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
    message: &'a str,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    text: Option<String>,
}

impl CohereProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config.require_credential("cohere")?;

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

fn extract_text(response: ChatResponse) -> Result<String, ProviderError> {
    non_empty(response.text, "cohere")
}

#[async_trait]
impl Provider for CohereProvider {
    fn name(&self) -> &str {
        "cohere"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn quota_matcher(&self) -> &QuotaMatcher {
        &self.quota
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        debug!(model = %self.model, "Requesting chat completion from Cohere");

        let body = ChatRequest {
            model: &self.model,
            message: prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body);

        extract_text(send_json(request).await?)
    }
}
