//! OpenAI-style egress adapter
//!
//! Chat completions API over bearer auth. The wire core is shared with the
//! OpenRouter adapter, which speaks the same dialect plus identification
//! headers.

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

/// OpenAI connector configuration
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Explicit API key; falls back to `OPENAI_API_KEY` when unset
    pub api_key: Option<String>,

    /// Base URL (default: https://api.openai.com/v1)
    pub base_url: String,

    pub client_config: HttpClientConfig,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            client_config: HttpClientConfig::default(),
        }
    }
}

impl OpenAiConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// Wire core shared by every OpenAI-compatible adapter.
pub(crate) struct CompatCore {
    pub kind: ProviderKind,
    pub provider_name: &'static str,
    pub env_var: &'static str,
    pub base_url: String,
    /// Extra request headers (OpenRouter identification, etc.)
    pub extra_headers: Vec<(&'static str, String)>,
    pub api_key_override: Option<String>,
    pub client_config: HttpClientConfig,
    pub catalog: Arc<ModelCatalog>,
    pub state: SharedState,
    pub cancel: CancelToken,
}

impl CompatCore {
    fn api_id(&self, model: &str) -> String {
        self.catalog
            .get_by_id(model)
            .map(|m| m.api_id.clone())
            .unwrap_or_else(|| model.to_string())
    }

    fn build_body(
        &self,
        model: &str,
        system: Option<&str>,
        user: &str,
        tools: &[ToolDefinition],
        stream: bool,
    ) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = system
            && !system.is_empty()
        {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": user }));

        let mut body = json!({
            "model": self.api_id(model),
            "messages": messages,
        });
        if !tools.is_empty() {
            body["tools"] = polyvox_tools::tools_to_json(tools, self.kind);
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    fn refine_error(mut error: Error, body: &str) -> Error {
        if let Ok(value) = serde_json::from_str::<Value>(body)
            && let Some(detail) = value.get("error")
        {
            let code = detail
                .get("code")
                .and_then(Value::as_str)
                .or_else(|| detail.get("type").and_then(Value::as_str));
            if let Some(code) = code {
                error.kind = match code {
                    "invalid_api_key" | "authentication_error" => ErrorKind::Auth,
                    "insufficient_quota" => ErrorKind::Quota,
                    "context_length_exceeded" | "string_above_max_length" => {
                        ErrorKind::ContextLength
                    }
                    "content_filter" | "content_policy_violation" => ErrorKind::ContentFilter,
                    "model_not_found" => ErrorKind::ModelNotFound,
                    "rate_limit_exceeded" => ErrorKind::RateLimit,
                    _ => error.kind,
                };
                error.provider_code = Some(code.to_string());
            }
            if let Some(message) = detail.get("message").and_then(Value::as_str) {
                error.message = message.to_string();
            }
        }
        error
    }

    fn parse_reply(&self, model: &str, system: Option<&str>, user: &str, body: &Value) -> ChatReply {
        let message = body.pointer("/choices/0/message");
        let text = message
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut tool_calls = Vec::new();
        if let Some(calls) = message
            .and_then(|m| m.get("tool_calls"))
            .and_then(Value::as_array)
        {
            for call in calls {
                tool_calls.push(ToolCall {
                    tool_name: call
                        .pointer("/function/name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    tool_id: call
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    arguments_json: call
                        .pointer("/function/arguments")
                        .and_then(Value::as_str)
                        .unwrap_or("{}")
                        .to_string(),
                });
            }
        }

        let input_tokens = body
            .pointer("/usage/prompt_tokens")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| {
                estimator::estimate_message("user", user, self.kind)
                    + system.map(|s| estimator::estimate(s, self.kind)).unwrap_or(0)
            });
        let output_tokens = body
            .pointer("/usage/completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| estimator::estimate(&text, self.kind));
        let cached_tokens = body
            .pointer("/usage/prompt_tokens_details/cached_tokens")
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

    fn request(&self, client: reqwest::Client, api_key: Option<String>) -> reqwest::RequestBuilder {
        let mut builder = client
            .post(format!("{}/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .bearer_auth(api_key.unwrap_or_default());
        for (name, value) in &self.extra_headers {
            builder = builder.header(*name, value);
        }
        builder
    }

    pub async fn init(&self) -> Result<()> {
        self.state.init_with(|| {
            self.cancel.reset();
            let api_key = self
                .api_key_override
                .clone()
                .or_else(|| std::env::var(self.env_var).ok())
                .filter(|k| !k.is_empty())
                .ok_or_else(|| Error::auth(format!("{} is not set", self.env_var)))?;

            let client = transport::create_client(&self.client_config)?;
            let streaming_client = transport::create_streaming_client(&self.client_config)?;
            debug!(provider = self.provider_name, "adapter initialized");
            Ok((Some(api_key), client, streaming_client))
        })
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.state.clear();
        debug!(provider = self.provider_name, "adapter shut down");
    }

    pub async fn validate_credentials(&self) -> bool {
        if self.init().await.is_err() {
            return false;
        }
        let Ok((client, api_key)) = self.state.request_handles(self.provider_name, false) else {
            return false;
        };
        match client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(api_key.unwrap_or_default())
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

    pub async fn send_chat(
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
        let (client, api_key) = self.state.request_handles(self.provider_name, false)?;
        let body = self.build_body(model, system, user, tools, false);

        let response = self
            .request(client, api_key)
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

    pub async fn stream_chat(
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
        let (client, api_key) = self.state.request_handles(self.provider_name, true)?;
        let body = self.build_body(model, system, user, &[], true);

        let response = self
            .request(client, api_key)
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

        let mut parser = StreamParser::new(WireFormat::OpenAi);
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
            warn!(
                provider = self.provider_name,
                "stream ended without server usage, falling back to heuristic"
            );
        }
        let input_tokens = server
            .input_tokens
            .unwrap_or_else(|| estimator::estimate_message("user", user, self.kind));
        let output_tokens = server
            .output_tokens
            .unwrap_or_else(|| estimator::estimate(&text, self.kind));
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
}

pub struct OpenAiConnector {
    core: CompatCore,
}

impl OpenAiConnector {
    pub fn new(config: OpenAiConfig, catalog: Arc<ModelCatalog>) -> Self {
        Self {
            core: CompatCore {
                kind: ProviderKind::OpenAi,
                provider_name: "openai",
                env_var: "OPENAI_API_KEY",
                base_url: config.base_url,
                extra_headers: Vec::new(),
                api_key_override: config.api_key,
                client_config: config.client_config,
                catalog,
                state: SharedState::new(),
                cancel: CancelToken::new(),
            },
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.core.cancel.clone()
    }
}

#[async_trait]
impl ChatProvider for OpenAiConnector {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn init(&self) -> Result<()> {
        self.core.init().await
    }

    async fn shutdown(&self) {
        self.core.shutdown().await
    }

    async fn validate_credentials(&self) -> bool {
        self.core.validate_credentials().await
    }

    #[instrument(skip(self, system, user))]
    async fn chat(&self, model: &str, system: Option<&str>, user: &str) -> Result<ChatReply> {
        self.core.send_chat(model, system, user, &[]).await
    }

    async fn chat_with_tools(
        &self,
        model: &str,
        system: Option<&str>,
        user: &str,
        tools: &[ToolDefinition],
    ) -> Result<ChatReply> {
        self.core.send_chat(model, system, user, tools).await
    }

    #[instrument(skip(self, system, user, handler))]
    async fn stream_chat(
        &self,
        model: &str,
        system: Option<&str>,
        user: &str,
        handler: StreamHandler,
    ) -> Result<()> {
        self.core.stream_chat(model, system, user, handler).await
    }

    fn estimate_tokens(&self, text: &str) -> u64 {
        estimator::estimate(text, ProviderKind::OpenAi)
    }

    fn last_error(&self) -> Option<Error> {
        self.core.state.last_error()
    }

    fn list_models(&self) -> Vec<ModelDescriptor> {
        self.core
            .catalog
            .get_by_provider(ProviderKind::OpenAi)
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

    fn connector() -> OpenAiConnector {
        OpenAiConnector::new(
            OpenAiConfig::default(),
            Arc::new(ModelCatalog::with_fallback_models()),
        )
    }

    #[test]
    fn test_body_places_system_first() {
        let c = connector();
        let body = c
            .core
            .build_body("gpt-5-mini", Some("be brief"), "hello", &[], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_streaming_body_requests_usage() {
        let c = connector();
        let body = c.core.build_body("gpt-5-mini", None, "hello", &[], true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_refine_error_quota() {
        let err = Error::from_status(429, "");
        let refined = CompatCore::refine_error(
            err,
            r#"{"error":{"message":"quota exceeded","code":"insufficient_quota"}}"#,
        );
        assert_eq!(refined.kind, ErrorKind::Quota);
        assert_eq!(refined.message, "quota exceeded");
    }

    #[test]
    fn test_parse_reply_tool_calls() {
        let c = connector();
        let body: Value = serde_json::from_str(
            r#"{
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_9",
                            "type": "function",
                            "function": {"name": "lookup", "arguments": "{\"q\":\"x\"}"}
                        }]
                    }
                }],
                "usage": {"prompt_tokens": 11, "completion_tokens": 4,
                          "prompt_tokens_details": {"cached_tokens": 2}}
            }"#,
        )
        .unwrap();
        let reply = c.core.parse_reply("gpt-5-mini", None, "q", &body);
        assert!(reply.text.is_empty());
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].tool_id, "call_9");
        assert_eq!(reply.tool_calls[0].arguments_json, "{\"q\":\"x\"}");
        assert_eq!(reply.usage.cached_tokens, 2);
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected_without_io() {
        let c = connector();
        // Deliberately uninitialized: the empty-prompt check runs first.
        let err = c.chat("gpt-5-mini", None, "").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }
}
