//! Gemini-style egress adapter
//!
//! generateContent API with the key passed as a query parameter. Replies
//! nest text under `candidates[].content.parts[]`; usage lives in
//! `usageMetadata` and is not consistently reported on streams.

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

/// Gemini connector configuration
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Explicit API key; falls back to `GEMINI_API_KEY` when unset
    pub api_key: Option<String>,

    /// Base URL (default: https://generativelanguage.googleapis.com/v1beta)
    pub base_url: String,

    pub client_config: HttpClientConfig,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            client_config: HttpClientConfig::default(),
        }
    }
}

impl GeminiConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

pub struct GeminiConnector {
    config: GeminiConfig,
    catalog: Arc<ModelCatalog>,
    state: SharedState,
    cancel: CancelToken,
}

impl GeminiConnector {
    pub fn new(config: GeminiConfig, catalog: Arc<ModelCatalog>) -> Self {
        Self {
            config,
            catalog,
            state: SharedState::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn api_id(&self, model: &str) -> String {
        self.catalog
            .get_by_id(model)
            .map(|m| m.api_id.clone())
            .unwrap_or_else(|| model.to_string())
    }

    fn endpoint(&self, model: &str, streaming: bool, api_key: &str) -> String {
        let verb = if streaming {
            "streamGenerateContent?alt=sse&key="
        } else {
            "generateContent?key="
        };
        format!(
            "{}/models/{}:{}{}",
            self.config.base_url,
            self.api_id(model),
            verb,
            api_key
        )
    }

    fn build_body(&self, system: Option<&str>, user: &str, tools: &[ToolDefinition]) -> Value {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": user }] }],
        });
        if let Some(system) = system
            && !system.is_empty()
        {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        if !tools.is_empty() {
            body["tools"] = json!([{
                "functionDeclarations": polyvox_tools::tools_to_json(tools, ProviderKind::Gemini),
            }]);
        }
        body
    }

    fn refine_error(mut error: Error, body: &str) -> Error {
        if let Ok(value) = serde_json::from_str::<Value>(body)
            && let Some(detail) = value.get("error")
        {
            if let Some(status) = detail.get("status").and_then(Value::as_str) {
                error.kind = match status {
                    "UNAUTHENTICATED" | "PERMISSION_DENIED" => ErrorKind::Auth,
                    "RESOURCE_EXHAUSTED" => ErrorKind::RateLimit,
                    "NOT_FOUND" => ErrorKind::ModelNotFound,
                    "UNAVAILABLE" | "INTERNAL" => ErrorKind::Overloaded,
                    "INVALID_ARGUMENT" => ErrorKind::InvalidRequest,
                    _ => error.kind,
                };
                error.provider_code = Some(status.to_string());
            }
            if let Some(message) = detail.get("message").and_then(Value::as_str) {
                error.message = message.to_string();
            }
        }
        error
    }

    fn parse_reply(
        &self,
        model: &str,
        system: Option<&str>,
        user: &str,
        body: &Value,
    ) -> Result<ChatReply> {
        // A blocked prompt yields no candidates but a block reason.
        if let Some(reason) = body
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
            && body
                .get("candidates")
                .and_then(Value::as_array)
                .is_none_or(|c| c.is_empty())
        {
            return Err(Error::new(
                ErrorKind::ContentFilter,
                format!("prompt blocked: {reason}"),
            )
            .with_provider_code(reason.to_string()));
        }

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        if let Some(parts) = body
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
        {
            for part in parts {
                if let Some(t) = part.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                }
                if let Some(call) = part.get("functionCall") {
                    tool_calls.push(ToolCall {
                        tool_name: call
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        // Gemini does not assign call ids
                        tool_id: String::new(),
                        arguments_json: call
                            .get("args")
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "{}".to_string()),
                    });
                }
            }
        }

        let input_tokens = body
            .pointer("/usageMetadata/promptTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| {
                estimator::estimate_message("user", user, ProviderKind::Gemini)
                    + system
                        .map(|s| estimator::estimate(s, ProviderKind::Gemini))
                        .unwrap_or(0)
            });
        let output_tokens = body
            .pointer("/usageMetadata/candidatesTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| estimator::estimate(&text, ProviderKind::Gemini));
        let cached_tokens = body
            .pointer("/usageMetadata/cachedContentTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        Ok(ChatReply {
            usage: TokenUsage {
                input_tokens,
                output_tokens,
                cached_tokens,
                estimated_cost: self.catalog.estimate_cost(model, input_tokens, output_tokens),
            },
            text,
            tool_calls,
        })
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
        let (client, api_key) = self.state.request_handles("gemini", false)?;
        let body = self.build_body(system, user, tools);

        let response = client
            .post(self.endpoint(model, false, &api_key.unwrap_or_default()))
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
        self.parse_reply(model, system, user, &value)
            .inspect_err(|e| self.state.record_error(e))
    }
}

#[async_trait]
impl ChatProvider for GeminiConnector {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn init(&self) -> Result<()> {
        self.state.init_with(|| {
            self.cancel.reset();
            let api_key = self
                .config
                .api_key
                .clone()
                .or_else(|| std::env::var("GEMINI_API_KEY").ok())
                .filter(|k| !k.is_empty())
                .ok_or_else(|| Error::auth("GEMINI_API_KEY is not set"))?;

            let client = transport::create_client(&self.config.client_config)?;
            let streaming_client = transport::create_streaming_client(&self.config.client_config)?;
            debug!("gemini adapter initialized");
            Ok((Some(api_key), client, streaming_client))
        })
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        self.state.clear();
        debug!("gemini adapter shut down");
    }

    async fn validate_credentials(&self) -> bool {
        if self.init().await.is_err() {
            return false;
        }
        let Ok((client, api_key)) = self.state.request_handles("gemini", false) else {
            return false;
        };
        let url = format!(
            "{}/models?key={}",
            self.config.base_url,
            api_key.unwrap_or_default()
        );
        match client.get(url).send().await {
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
        let (client, api_key) = self.state.request_handles("gemini", true)?;
        let body = self.build_body(system, user, &[]);

        let response = client
            .post(self.endpoint(model, true, &api_key.unwrap_or_default()))
            .header("content-type", "application/json")
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

        let mut parser = StreamParser::new(WireFormat::Gemini);
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
        // The stream wire does not reliably report usage; say so instead of
        // silently mixing heuristic numbers with server ones.
        if !server.is_reported() {
            debug!("gemini stream carried no usage metadata, usage is estimated");
        }
        let input_tokens = server
            .input_tokens
            .unwrap_or_else(|| estimator::estimate_message("user", user, ProviderKind::Gemini));
        let output_tokens = server
            .output_tokens
            .unwrap_or_else(|| estimator::estimate(&text, ProviderKind::Gemini));
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
        estimator::estimate(text, ProviderKind::Gemini)
    }

    fn last_error(&self) -> Option<Error> {
        self.state.last_error()
    }

    fn list_models(&self) -> Vec<ModelDescriptor> {
        self.catalog
            .get_by_provider(ProviderKind::Gemini)
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

    fn connector() -> GeminiConnector {
        GeminiConnector::new(
            GeminiConfig::default(),
            Arc::new(ModelCatalog::with_fallback_models()),
        )
    }

    #[test]
    fn test_endpoint_places_key_in_query() {
        let c = connector();
        let url = c.endpoint("gemini-2.5-flash", false, "k123");
        assert!(url.ends_with("models/gemini-2.5-flash:generateContent?key=k123"));

        let streaming = c.endpoint("gemini-2.5-flash", true, "k123");
        assert!(streaming.contains(":streamGenerateContent?alt=sse&key=k123"));
    }

    #[test]
    fn test_body_nests_system_instruction() {
        let c = connector();
        let body = c.build_body(Some("short answers"), "hi", &[]);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "short answers");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn test_tools_wrapped_in_function_declarations() {
        use polyvox_core::tool::{ParameterType, ToolParameter};
        let c = connector();
        let tool = ToolDefinition::new("probe", "test")
            .with_parameter(ToolParameter::new("x", ParameterType::Number, true));
        let body = c.build_body(None, "hi", std::slice::from_ref(&tool));
        let declaration = &body["tools"][0]["functionDeclarations"][0];
        assert_eq!(declaration["name"], "probe");
        assert_eq!(declaration["parameters"]["properties"]["x"]["type"], "NUMBER");
    }

    #[test]
    fn test_refine_error_resource_exhausted() {
        let err = Error::from_status(429, "");
        let refined = GeminiConnector::refine_error(
            err,
            r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED","message":"slow down"}}"#,
        );
        assert_eq!(refined.kind, ErrorKind::RateLimit);
        assert_eq!(refined.provider_code.as_deref(), Some("RESOURCE_EXHAUSTED"));
    }

    #[test]
    fn test_blocked_prompt_is_content_filter() {
        let c = connector();
        let body: Value = serde_json::from_str(
            r#"{"promptFeedback": {"blockReason": "SAFETY"}, "candidates": []}"#,
        )
        .unwrap();
        let err = c
            .parse_reply("gemini-2.5-flash", None, "x", &body)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContentFilter);
    }

    #[test]
    fn test_parse_reply_function_call_has_empty_id() {
        let c = connector();
        let body: Value = serde_json::from_str(
            r#"{
                "candidates": [{
                    "content": {"parts": [
                        {"text": "Using tool."},
                        {"functionCall": {"name": "probe", "args": {"x": 1}}}
                    ]}
                }],
                "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 3}
            }"#,
        )
        .unwrap();
        let reply = c.parse_reply("gemini-2.5-flash", None, "x", &body).unwrap();
        assert_eq!(reply.text, "Using tool.");
        assert_eq!(reply.tool_calls.len(), 1);
        assert!(reply.tool_calls[0].tool_id.is_empty());
        assert_eq!(reply.usage.input_tokens, 5);
    }
}
