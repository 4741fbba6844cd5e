//! Anthropic-style egress adapter
//!
//! Messages API over `x-api-key` auth. Replies carry content blocks
//! (`text` / `tool_use`) and a `usage` object with
//! `input_tokens`/`output_tokens`/`cache_read_input_tokens`.

use crate::{
    state::SharedState,
    stream::{StreamParser, WireFormat},
    transport::{self, HttpClientConfig},
};
use async_trait::async_trait;
use futures::StreamExt;
use polyvox_core::{
    cancel::CancelToken,
    error::{Error, ErrorKind, Result},
    model::ModelDescriptor,
    provider::{ChatProvider, ChatReply, ProviderCapabilities, StreamHandler},
    tool::{ToolCall, ToolDefinition},
    types::{ProviderKind, TokenUsage},
};
use polyvox_models::{ModelCatalog, estimator};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Anthropic connector configuration
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// Explicit API key; falls back to `ANTHROPIC_API_KEY` when unset
    pub api_key: Option<String>,

    /// Base URL (default: https://api.anthropic.com)
    pub base_url: String,

    /// API version header value (default: 2023-06-01)
    pub api_version: String,

    pub client_config: HttpClientConfig,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            api_version: "2023-06-01".to_string(),
            client_config: HttpClientConfig::default(),
        }
    }
}

impl AnthropicConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

pub struct AnthropicConnector {
    config: AnthropicConfig,
    catalog: Arc<ModelCatalog>,
    state: SharedState,
    cancel: CancelToken,
}

impl AnthropicConnector {
    pub fn new(config: AnthropicConfig, catalog: Arc<ModelCatalog>) -> Self {
        Self {
            config,
            catalog,
            state: SharedState::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Token shared with in-flight requests; cancelling aborts them.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wire identifier for `model`, falling back to the id itself for
    /// models the catalog does not know.
    fn api_id(&self, model: &str) -> String {
        self.catalog
            .get_by_id(model)
            .map(|m| m.api_id.clone())
            .unwrap_or_else(|| model.to_string())
    }

    fn max_tokens_for(&self, model: &str) -> u64 {
        self.catalog
            .get_by_id(model)
            .map(|m| m.max_output.min(DEFAULT_MAX_TOKENS * 2))
            .unwrap_or(DEFAULT_MAX_TOKENS)
    }

    fn build_body(
        &self,
        model: &str,
        system: Option<&str>,
        user: &str,
        tools: &[ToolDefinition],
        stream: bool,
    ) -> Value {
        let mut body = json!({
            "model": self.api_id(model),
            "max_tokens": self.max_tokens_for(model),
            "messages": [{ "role": "user", "content": user }],
        });
        if let Some(system) = system
            && !system.is_empty()
        {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = polyvox_tools::tools_to_json(tools, ProviderKind::Anthropic);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    /// Refine a status-mapped error with the body's `error.type`.
    fn refine_error(mut error: Error, body: &str) -> Error {
        if let Ok(value) = serde_json::from_str::<Value>(body)
            && let Some(code) = value
                .get("error")
                .and_then(|e| e.get("type"))
                .and_then(Value::as_str)
        {
            error.kind = match code {
                "authentication_error" | "permission_error" => ErrorKind::Auth,
                "rate_limit_error" => ErrorKind::RateLimit,
                "request_too_large" => ErrorKind::ContextLength,
                "not_found_error" => ErrorKind::ModelNotFound,
                "overloaded_error" | "api_error" => ErrorKind::Overloaded,
                "invalid_request_error" => ErrorKind::InvalidRequest,
                _ => error.kind,
            };
            error.provider_code = Some(code.to_string());
            if let Some(message) = value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
            {
                error.message = message.to_string();
            }
        }
        error
    }

    fn parse_reply(&self, model: &str, system: Option<&str>, user: &str, body: &Value) -> ChatReply {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        if let Some(blocks) = body.get("content").and_then(Value::as_array) {
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(t) = block.get("text").and_then(Value::as_str) {
                            text.push_str(t);
                        }
                    }
                    Some("tool_use") => {
                        tool_calls.push(ToolCall {
                            tool_name: block
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            tool_id: block
                                .get("id")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            arguments_json: block
                                .get("input")
                                .map(|v| v.to_string())
                                .unwrap_or_else(|| "{}".to_string()),
                        });
                    }
                    _ => {}
                }
            }
        }

        let input_tokens = body
            .pointer("/usage/input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| {
                estimator::estimate_message("user", user, ProviderKind::Anthropic)
                    + system
                        .map(|s| estimator::estimate(s, ProviderKind::Anthropic))
                        .unwrap_or(0)
            });
        let output_tokens = body
            .pointer("/usage/output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| estimator::estimate(&text, ProviderKind::Anthropic));
        let cached_tokens = body
            .pointer("/usage/cache_read_input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        ChatReply {
            usage: TokenUsage {
                input_tokens,
                output_tokens,
                cached_tokens,
                estimated_cost: self.catalog.estimate_cost(model, input_tokens, output_tokens),
            },
            text,
            tool_calls,
        }
    }

    async fn send_chat(
        &self,
        model: &str,
        system: Option<&str>,
        user: &str,
        tools: &[ToolDefinition],
    ) -> Result<ChatReply> {
        if user.is_empty() {
            let err = Error::invalid_request("prompt must not be empty");
            self.state.record_error(&err);
            return Err(err);
        }
        let (client, api_key) = self.state.request_handles("anthropic", false)?;
        let body = self.build_body(model, system, user, tools, false);

        let response = client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", api_key.unwrap_or_default())
            .header("anthropic-version", &self.config.api_version)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let err = transport::map_transport_error(e);
                self.state.record_error(&err);
                err
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = Self::refine_error(Error::from_status(status.as_u16(), text.clone()), &text);
            self.state.record_error(&err);
            return Err(err);
        }

        let bytes = transport::read_body_buffered(response, &self.cancel, None).await?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
            let err = Error::new(ErrorKind::Unknown, format!("malformed reply: {e}"));
            self.state.record_error(&err);
            err
        })?;
        Ok(self.parse_reply(model, system, user, &value))
    }
}

#[async_trait]
impl ChatProvider for AnthropicConnector {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn init(&self) -> Result<()> {
        self.state.init_with(|| {
            self.cancel.reset();
            let api_key = self
                .config
                .api_key
                .clone()
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
                .filter(|k| !k.is_empty())
                .ok_or_else(|| Error::auth("ANTHROPIC_API_KEY is not set"))?;

            let client = transport::create_client(&self.config.client_config)?;
            let streaming_client = transport::create_streaming_client(&self.config.client_config)?;
            debug!("anthropic adapter initialized");
            Ok((Some(api_key), client, streaming_client))
        })
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        self.state.clear();
        debug!("anthropic adapter shut down");
    }

    async fn validate_credentials(&self) -> bool {
        if self.init().await.is_err() {
            return false;
        }
        let Ok((client, api_key)) = self.state.request_handles("anthropic", false) else {
            return false;
        };
        match client
            .get(format!("{}/v1/models", self.config.base_url))
            .header("x-api-key", api_key.unwrap_or_default())
            .header("anthropic-version", &self.config.api_version)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                let err = Error::from_status(response.status().as_u16(), String::new());
                self.state.record_error(&err);
                false
            }
            Err(e) => {
                self.state.record_error(&transport::map_transport_error(e));
                false
            }
        }
    }

    #[instrument(skip(self, system, user))]
    async fn chat(&self, model: &str, system: Option<&str>, user: &str) -> Result<ChatReply> {
        self.send_chat(model, system, user, &[]).await
    }

    async fn chat_with_tools(
        &self,
        model: &str,
        system: Option<&str>,
        user: &str,
        tools: &[ToolDefinition],
    ) -> Result<ChatReply> {
        self.send_chat(model, system, user, tools).await
    }

    #[instrument(skip(self, system, user, handler))]
    async fn stream_chat(
        &self,
        model: &str,
        system: Option<&str>,
        user: &str,
        handler: StreamHandler,
    ) -> Result<()> {
        if user.is_empty() {
            let err = Error::invalid_request("prompt must not be empty");
            self.state.record_error(&err);
            (handler.on_error)(&err);
            return Err(err);
        }
        let (client, api_key) = self.state.request_handles("anthropic", true)?;
        let body = self.build_body(model, system, user, &[], true);

        let response = client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", api_key.unwrap_or_default())
            .header("anthropic-version", &self.config.api_version)
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let err = transport::map_transport_error(e);
                self.state.record_error(&err);
                (handler.on_error)(&err);
                err
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = Self::refine_error(Error::from_status(status.as_u16(), text.clone()), &text);
            self.state.record_error(&err);
            (handler.on_error)(&err);
            return Err(err);
        }

        let mut parser = StreamParser::new(WireFormat::Anthropic);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if self.cancel.is_cancelled() {
                let err = Error::new(ErrorKind::Timeout, "stream cancelled");
                (handler.on_error)(&err);
                return Err(err);
            }
            match chunk {
                Ok(chunk) => {
                    for piece in parser.push_chunk(&chunk) {
                        (handler.on_chunk)(&piece, false);
                    }
                    if parser.is_finished() {
                        break;
                    }
                }
                Err(e) => {
                    let err = transport::map_transport_error(e);
                    self.state.record_error(&err);
                    (handler.on_error)(&err);
                    return Err(err);
                }
            }
        }
        for piece in parser.finish() {
            (handler.on_chunk)(&piece, false);
        }

        let server = parser.server_usage();
        let text = parser.accumulated().to_string();
        if !server.is_reported() {
            warn!("stream ended without server usage, falling back to heuristic");
        }
        let input_tokens = server.input_tokens.unwrap_or_else(|| {
            estimator::estimate_message("user", user, ProviderKind::Anthropic)
        });
        let output_tokens = server
            .output_tokens
            .unwrap_or_else(|| estimator::estimate(&text, ProviderKind::Anthropic));
        let usage = TokenUsage {
            input_tokens,
            output_tokens,
            cached_tokens: server.cached_tokens.unwrap_or(0),
            estimated_cost: self.catalog.estimate_cost(model, input_tokens, output_tokens),
        };

        (handler.on_chunk)("", true);
        (handler.on_complete)(&text, &usage);
        Ok(())
    }

    fn estimate_tokens(&self, text: &str) -> u64 {
        estimator::estimate(text, ProviderKind::Anthropic)
    }

    fn last_error(&self) -> Option<Error> {
        self.state.last_error()
    }

    fn list_models(&self) -> Vec<ModelDescriptor> {
        self.catalog
            .get_by_provider(ProviderKind::Anthropic)
            .into_iter()
            .cloned()
            .collect()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: true,
            supports_tools: true,
            supports_vision: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> AnthropicConnector {
        AnthropicConnector::new(
            AnthropicConfig::default(),
            Arc::new(ModelCatalog::with_fallback_models()),
        )
    }

    #[test]
    fn test_api_id_resolution() {
        let c = connector();
        assert_eq!(c.api_id("claude-sonnet-4.5"), "claude-sonnet-4-5");
        assert_eq!(c.api_id("unknown-model"), "unknown-model");
    }

    #[test]
    fn test_body_shape() {
        let c = connector();
        let body = c.build_body("claude-sonnet-4.5", Some("be terse"), "hello", &[], false);
        assert_eq!(body["model"], "claude-sonnet-4-5");
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
        assert!(body.get("stream").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_refine_error_from_body() {
        let err = Error::from_status(400, "raw body");
        let refined = AnthropicConnector::refine_error(
            err,
            r#"{"error":{"type":"overloaded_error","message":"busy"}}"#,
        );
        assert_eq!(refined.kind, ErrorKind::Overloaded);
        assert_eq!(refined.provider_code.as_deref(), Some("overloaded_error"));
        assert_eq!(refined.message, "busy");
    }

    #[test]
    fn test_parse_reply_with_tool_use() {
        let c = connector();
        let body: Value = serde_json::from_str(
            r#"{
                "content": [
                    {"type": "text", "text": "Checking."},
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather",
                     "input": {"location": "Lisbon"}}
                ],
                "usage": {"input_tokens": 20, "output_tokens": 9}
            }"#,
        )
        .unwrap();
        let reply = c.parse_reply("claude-sonnet-4.5", None, "weather?", &body);
        assert_eq!(reply.text, "Checking.");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].tool_name, "get_weather");
        assert_eq!(reply.tool_calls[0].tool_id, "toolu_1");
        assert_eq!(reply.usage.input_tokens, 20);
        assert!(reply.usage.estimated_cost > 0.0);
    }

    #[tokio::test]
    async fn test_chat_before_init_is_not_initialized() {
        let c = connector();
        let err = c.chat("claude-sonnet-4.5", None, "hi").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotInitialized);
    }
}
