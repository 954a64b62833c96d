use serde::Serialize;
use serde_json::Value;
use smalltree_protocol::*;
use smalltree_providers::Orchestrator;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::config::Config;

/// Handles incoming JSON-RPC requests.
pub struct RequestHandler {
    config: Arc<Config>,
    cache: Arc<Mutex<ResponseCache>>,
    orchestrator: Arc<Orchestrator>,
    started_at: Instant,
}

impl RequestHandler {
    pub fn new(
        config: Arc<Config>,
        cache: Arc<Mutex<ResponseCache>>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            config,
            cache,
            orchestrator,
            started_at: Instant::now(),
        }
    }

    /// Process a JSON-RPC request and return a response.
    pub async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!(method = %request.method, "Handling request");

        match request.method.as_str() {
            methods::GENERATE => self.handle_generate(request).await,
            methods::PROVIDERS_STATUS => self.handle_providers_status(request),
            methods::PROVIDERS_RESET => self.handle_providers_reset(request),
            methods::CACHE_CLEAR => self.handle_cache_clear(request).await,
            methods::STATUS => self.handle_status(request).await,
            methods::SHUTDOWN => self.handle_shutdown(request),
            _ => JsonRpcResponse::from_protocol_error(
                &ProtocolError::UnknownMethod(request.method.clone()),
                request.id,
            ),
        }
    }

    async fn handle_generate(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: GenerateRequest = match request.parse_params() {
            Ok(p) => p,
            Err(e) => return JsonRpcResponse::from_protocol_error(&e, request.id),
        };
        if params.prompt.trim().is_empty() {
            return JsonRpcResponse::error(INVALID_PARAMS, "Prompt must not be empty", request.id);
        }

        let start = Instant::now();
        let cache_key = ResponseCache::cache_key(&params.prompt);

        if params.use_cache {
            let mut cache = self.cache.lock().await;
            if let Some(mut cached) = cache.get(cache_key) {
                cached.cached = true;
                cached.latency_ms = start.elapsed().as_millis() as u64;
                info!(provider = ?cached.provider, latency_ms = cached.latency_ms, "Cache hit");
                return respond(&cached, request.id);
            }
        }

        let mut outcome = match params.max_attempts {
            Some(max_attempts) => {
                self.orchestrator
                    .generate_with_budget(&params.prompt, max_attempts)
                    .await
            }
            None => self.orchestrator.generate(&params.prompt).await,
        };
        outcome.latency_ms = start.elapsed().as_millis() as u64;

        if outcome.success {
            info!(
                provider = ?outcome.provider,
                tried = outcome.tried_providers.len(),
                latency_ms = outcome.latency_ms,
                "Generation succeeded"
            );
            self.cache.lock().await.put(cache_key, outcome.clone());
        } else {
            warn!(tried = ?outcome.tried_providers, error = ?outcome.error, "Generation failed");
        }

        respond(&outcome, request.id)
    }

    fn handle_providers_status(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        respond(&self.orchestrator.status(), request.id)
    }

    fn handle_providers_reset(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: ResetRequest = match request.parse_params() {
            Ok(p) => p,
            Err(e) => return JsonRpcResponse::from_protocol_error(&e, request.id),
        };

        if let Some(name) = &params.name {
            if self.orchestrator.registry().get(name).is_none() {
                return JsonRpcResponse::error(
                    INVALID_PARAMS,
                    format!("Unknown provider: {name}"),
                    request.id,
                );
            }
        }

        let reset = self.orchestrator.reset(params.name.as_deref());
        JsonRpcResponse::success(serde_json::json!({ "reset": reset }), request.id)
    }

    async fn handle_cache_clear(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let mut cache = self.cache.lock().await;
        let cleared = cache.len();
        cache.clear();
        info!(cleared, "Response cache cleared");
        JsonRpcResponse::success(serde_json::json!({ "cleared": cleared }), request.id)
    }

    async fn handle_status(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let cache_len = self.cache.lock().await.len();
        let status = serde_json::json!({
            "status": "running",
            "uptime_secs": self.started_at.elapsed().as_secs(),
            "cache_entries": cache_len,
            "providers_configured": self.config.providers.keys().collect::<Vec<_>>(),
            "providers_registered": self.orchestrator.registry().names(),
            "priority": self.orchestrator.priority().iter().collect::<Vec<_>>(),
        });
        JsonRpcResponse::success(status, request.id)
    }

    fn handle_shutdown(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        info!("Shutdown requested");
        JsonRpcResponse::success(Value::String("shutting down".to_string()), request.id)
    }
}

fn respond<T: Serialize>(value: &T, id: RequestId) -> JsonRpcResponse {
    match serde_json::to_value(value) {
        Ok(result) => JsonRpcResponse::success(result, id),
        Err(e) => JsonRpcResponse::error(INTERNAL_ERROR, format!("Serialization failed: {e}"), id),
    }
}
