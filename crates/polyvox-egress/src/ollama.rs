//! Ollama egress adapter
//!
//! Local daemon with no auth, discovered via `OLLAMA_HOST`. Responses are
//! newline-delimited JSON when streaming; token counts arrive as
//! `prompt_eval_count`/`eval_count`. All inference runs on the caller's
//! machine, so the long (streaming) timeout applies to every request and
//! cost is always zero.

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
use tracing::{debug, instrument};

pub const DEFAULT_HOST: &str = "http://localhost:11434";

/// Ollama connector configuration
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Daemon base URL; falls back to `OLLAMA_HOST`, then the default
    pub base_url: Option<String>,

    pub client_config: HttpClientConfig,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            client_config: HttpClientConfig::default(),
        }
    }
}

impl OllamaConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn resolve_base_url(&self) -> String {
        self.base_url
            .clone()
            .or_else(|| std::env::var("OLLAMA_HOST").ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string())
    }
}

pub struct OllamaConnector {
    config: OllamaConfig,
    base_url: std::sync::Mutex<String>,
    catalog: Arc<ModelCatalog>,
    state: SharedState,
    cancel: CancelToken,
}

impl OllamaConnector {
    pub fn new(config: OllamaConfig, catalog: Arc<ModelCatalog>) -> Self {
        let base_url = std::sync::Mutex::new(config.resolve_base_url());
        Self {
            config,
            base_url,
            catalog,
            state: SharedState::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn base_url(&self) -> String {
        self.base_url.lock().unwrap().clone()
    }

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
            "stream": stream,
        });
        if !tools.is_empty() {
            // Ollama accepts the OpenAI function wrapper
            body["tools"] = polyvox_tools::tools_to_json(tools, ProviderKind::Ollama);
        }
        body
    }

    fn refine_error(mut error: Error, body: &str) -> Error {
        if let Ok(value) = serde_json::from_str::<Value>(body)
            && let Some(message) = value.get("error").and_then(Value::as_str)
        {
            if message.contains("not found") {
                error.kind = ErrorKind::ModelNotFound;
            }
            error.message = message.to_string();
        }
        error
    }

    fn parse_reply(&self, system: Option<&str>, user: &str, body: &Value) -> ChatReply {
        let text = body
            .pointer("/message/content")
            .and_then(Value::as_str)
            .or_else(|| body.get("response").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();

        let mut tool_calls = Vec::new();
        if let Some(calls) = body
            .pointer("/message/tool_calls")
            .and_then(Value::as_array)
        {
            for call in calls {
                tool_calls.push(ToolCall {
                    tool_name: call
                        .pointer("/function/name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    // Ollama omits call ids
                    tool_id: String::new(),
                    arguments_json: call
                        .pointer("/function/arguments")
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "{}".to_string()),
                });
            }
        }

        let input_tokens = body
            .get("prompt_eval_count")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| {
                estimator::estimate_message("user", user, ProviderKind::Ollama)
                    + system
                        .map(|s| estimator::estimate(s, ProviderKind::Ollama))
                        .unwrap_or(0)
            });
        let output_tokens = body
            .get("eval_count")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| estimator::estimate(&text, ProviderKind::Ollama));

        ChatReply {
            text,
            tool_calls,
            // Local daemon: tokens are counted, dollars are not
            usage: TokenUsage {
                input_tokens,
                output_tokens,
                cached_tokens: 0,
                estimated_cost: 0.0,
            },
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
        let (client, _) = self.state.request_handles("ollama", true)?;
        let body = self.build_body(model, system, user, tools, false);

        let response = client
            .post(format!("{}/api/chat", self.base_url()))
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
        Ok(self.parse_reply(system, user, &value))
    }
}

#[async_trait]
impl ChatProvider for OllamaConnector {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    async fn init(&self) -> Result<()> {
        self.state.init_with(|| {
            self.cancel.reset();
            *self.base_url.lock().unwrap() = self.config.resolve_base_url();
            // Every request may run local inference; use the long timeout
            let client = transport::create_streaming_client(&self.config.client_config)?;
            let streaming_client = client.clone();
            debug!(base_url = %self.base_url(), "ollama adapter initialized");
            Ok((None, client, streaming_client))
        })
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        self.state.clear();
        debug!("ollama adapter shut down");
    }

    async fn validate_credentials(&self) -> bool {
        // No credentials; reachability of the daemon is the probe.
        if self.init().await.is_err() {
            return false;
        }
        let Ok((client, _)) = self.state.request_handles("ollama", false) else {
            return false;
        };
        match client
            .get(format!("{}/api/tags", self.base_url()))
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
        let (client, _) = self.state.request_handles("ollama", true)?;
        let body = self.build_body(model, system, user, &[], true);

        let response = client
            .post(format!("{}/api/chat", self.base_url()))
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

        let mut parser = StreamParser::new(WireFormat::Ollama);
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
        let input_tokens = server
            .input_tokens
            .unwrap_or_else(|| estimator::estimate_message("user", user, ProviderKind::Ollama));
        let output_tokens = server
            .output_tokens
            .unwrap_or_else(|| estimator::estimate(&text, ProviderKind::Ollama));
        let usage = TokenUsage {
            input_tokens,
            output_tokens,
            cached_tokens: 0,
            estimated_cost: 0.0,
        };

        (handler.on_chunk)("", true);
        (handler.on_complete)(&text, &usage);
        Ok(())
    }

    fn estimate_tokens(&self, text: &str) -> u64 {
        estimator::estimate(text, ProviderKind::Ollama)
    }

    fn last_error(&self) -> Option<Error> {
        self.state.last_error()
    }

    fn list_models(&self) -> Vec<ModelDescriptor> {
        self.catalog
            .get_by_provider(ProviderKind::Ollama)
            .into_iter()
            .cloned()
            .collect()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: true,
            supports_tools: true,
            supports_vision: false,
        }
    }
}
