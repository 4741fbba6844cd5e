//! Runtime facade
//!
//! Bundles the catalog, registry, tool registry and retry manager into one
//! explicitly constructed object. A convenience, not a singleton: every
//! part remains individually constructible and testable.

use crate::{registry::ProviderRegistry, retry::RetryManager};
use polyvox_core::{
    error::Result,
    provider::{ChatReply, StreamHandler},
    types::{ProviderKind, TokenUsage},
};
use polyvox_models::ModelCatalog;
use polyvox_tools::ToolRegistry;
use std::sync::{Arc, Mutex};
use tracing::instrument;

pub struct Runtime {
    catalog: Arc<ModelCatalog>,
    registry: ProviderRegistry,
    tools: ToolRegistry,
    retry: RetryManager,
    session_usage: Mutex<TokenUsage>,
}

impl Runtime {
    /// Runtime over the default adapters and the catalog found on disk
    /// (or the built-in fallback set).
    pub fn new() -> Self {
        Self::with_catalog(Arc::new(ModelCatalog::load_default()))
    }

    pub fn with_catalog(catalog: Arc<ModelCatalog>) -> Self {
        let registry = ProviderRegistry::with_default_adapters(catalog.clone());
        Self {
            catalog,
            registry,
            tools: ToolRegistry::new(),
            retry: RetryManager::new(),
            session_usage: Mutex::new(TokenUsage::default()),
        }
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn retry(&self) -> &RetryManager {
        &self.retry
    }

    /// Token and cost totals accumulated across every reply this runtime
    /// has returned.
    pub fn session_usage(&self) -> TokenUsage {
        *self.session_usage.lock().unwrap()
    }

    fn record_usage(&self, usage: &TokenUsage) {
        self.session_usage.lock().unwrap().accumulate(usage);
    }

    /// Route a chat request through the provider's retry policy and
    /// breaker, accumulating usage on success.
    #[instrument(skip(self, system, user))]
    pub async fn chat(
        &self,
        kind: ProviderKind,
        model: &str,
        system: Option<&str>,
        user: &str,
    ) -> Result<ChatReply> {
        let provider = self.registry.get(kind).await?;
        let reply = self
            .retry
            .execute(kind, || provider.chat(model, system, user))
            .await?;
        self.record_usage(&reply.usage);
        Ok(reply)
    }

    /// Chat with every registered tool attached. Degrades to a plain chat
    /// when the tool registry is empty.
    pub async fn chat_with_tools(
        &self,
        kind: ProviderKind,
        model: &str,
        system: Option<&str>,
        user: &str,
    ) -> Result<ChatReply> {
        let provider = self.registry.get(kind).await?;
        let tools = self.tools.all();
        let reply = self
            .retry
            .execute(kind, || provider.chat_with_tools(model, system, user, &tools))
            .await?;
        self.record_usage(&reply.usage);
        Ok(reply)
    }

    /// Stream a chat reply. Streaming requests are not retried: chunks
    /// already delivered cannot be taken back.
    pub async fn stream_chat(
        &self,
        kind: ProviderKind,
        model: &str,
        system: Option<&str>,
        user: &str,
        handler: StreamHandler,
    ) -> Result<()> {
        let provider = self.registry.get(kind).await?;
        provider.stream_chat(model, system, user, handler).await
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
