//! OpenRouter egress adapter
//!
//! OpenAI-compatible dialect with two identification headers
//! (`HTTP-Referer`, `X-Title`) that OpenRouter uses for app attribution.
//! Everything else delegates to the shared wire core.

use crate::{openai::CompatCore, state::SharedState, transport::HttpClientConfig};
use async_trait::async_trait;
use polyvox_core::{
    cancel::CancelToken,
    error::{Error, Result},
    model::ModelDescriptor,
    provider::{ChatProvider, ChatReply, ProviderCapabilities, StreamHandler},
    tool::ToolDefinition,
    types::ProviderKind,
};
use polyvox_models::{ModelCatalog, estimator};
use std::sync::Arc;
use tracing::instrument;

/// OpenRouter connector configuration
#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    /// Explicit API key; falls back to `OPENROUTER_API_KEY` when unset
    pub api_key: Option<String>,

    /// Base URL (default: https://openrouter.ai/api/v1)
    pub base_url: String,

    /// Sent as `HTTP-Referer` for app attribution
    pub referer: String,

    /// Sent as `X-Title` for app attribution
    pub title: String,

    pub client_config: HttpClientConfig,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            referer: "https://github.com/yourusername/polyvox".to_string(),
            title: "Polyvox".to_string(),
            client_config: HttpClientConfig::default(),
        }
    }
}

impl OpenRouterConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

pub struct OpenRouterConnector {
    core: CompatCore,
}

impl OpenRouterConnector {
    pub fn new(config: OpenRouterConfig, catalog: Arc<ModelCatalog>) -> Self {
        Self {
            core: CompatCore {
                kind: ProviderKind::OpenRouter,
                provider_name: "openrouter",
                env_var: "OPENROUTER_API_KEY",
                base_url: config.base_url,
                extra_headers: vec![
                    ("HTTP-Referer", config.referer),
                    ("X-Title", config.title),
                ],
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
impl ChatProvider for OpenRouterConnector {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenRouter
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
        estimator::estimate(text, ProviderKind::OpenRouter)
    }

    fn last_error(&self) -> Option<Error> {
        self.core.state.last_error()
    }

    fn list_models(&self) -> Vec<ModelDescriptor> {
        self.core
            .catalog
            .get_by_provider(ProviderKind::OpenRouter)
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
