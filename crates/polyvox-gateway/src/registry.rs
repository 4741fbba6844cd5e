//! Provider registry
//!
//! Owns exactly one handle per provider kind for the lifetime of the
//! process. Handles are created at registry construction and lazily
//! network-initialized on first use; `shutdown` tears all of them down.
//! The registry lock is held only for map lookups; adapter `init` and
//! `shutdown` run outside it behind each adapter's own guard.

use polyvox_core::{
    error::{Error, ErrorKind, Result},
    provider::ChatProvider,
    types::ProviderKind,
};
use polyvox_egress::{
    anthropic::{AnthropicConfig, AnthropicConnector},
    gemini::{GeminiConfig, GeminiConnector},
    ollama::{OllamaConfig, OllamaConnector},
    openai::{OpenAiConfig, OpenAiConnector},
    openrouter::{OpenRouterConfig, OpenRouterConnector},
};
use polyvox_models::ModelCatalog;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

struct RegistryEntry {
    provider: Arc<dyn ChatProvider>,
    initialized: bool,
}

pub struct ProviderRegistry {
    entries: Mutex<HashMap<ProviderKind, RegistryEntry>>,
}

impl ProviderRegistry {
    /// Empty registry; register handles with [`ProviderRegistry::register`].
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registry with every remote adapter wired to its default endpoint.
    ///
    /// On-device adapters need a native bridge and are registered
    /// separately by the platform layer.
    pub fn with_default_adapters(catalog: Arc<ModelCatalog>) -> Self {
        let registry = Self::new();
        registry.register(Arc::new(AnthropicConnector::new(
            AnthropicConfig::default(),
            catalog.clone(),
        )));
        registry.register(Arc::new(OpenAiConnector::new(
            OpenAiConfig::default(),
            catalog.clone(),
        )));
        registry.register(Arc::new(GeminiConnector::new(
            GeminiConfig::default(),
            catalog.clone(),
        )));
        registry.register(Arc::new(OpenRouterConnector::new(
            OpenRouterConfig::default(),
            catalog.clone(),
        )));
        registry.register(Arc::new(OllamaConnector::new(
            OllamaConfig::default(),
            catalog,
        )));
        registry
    }

    /// Install a handle for its kind. Exactly one handle per kind: a
    /// second registration for the same kind is rejected.
    pub fn register(&self, provider: Arc<dyn ChatProvider>) {
        let kind = provider.kind();
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&kind) {
            warn!(provider = %kind, "ignoring duplicate provider registration");
            return;
        }
        debug!(provider = %kind, "provider registered");
        entries.insert(
            kind,
            RegistryEntry {
                provider,
                initialized: false,
            },
        );
    }

    pub fn registered_kinds(&self) -> Vec<ProviderKind> {
        let entries = self.entries.lock().unwrap();
        ProviderKind::ALL
            .into_iter()
            .filter(|k| entries.contains_key(k))
            .collect()
    }

    /// Fetch the handle for `kind`, initializing it on first use.
    ///
    /// Returns the same handle for the lifetime of the registry.
    pub async fn get(&self, kind: ProviderKind) -> Result<Arc<dyn ChatProvider>> {
        let (provider, needs_init) = {
            let entries = self.entries.lock().unwrap();
            let entry = entries.get(&kind).ok_or_else(|| {
                Error::new(
                    ErrorKind::NotInitialized,
                    format!("no provider registered for {kind}"),
                )
            })?;
            (entry.provider.clone(), !entry.initialized)
        };

        if needs_init {
            provider.init().await?;
            let mut entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get_mut(&kind) {
                entry.initialized = true;
            }
            info!(provider = %kind, "provider initialized");
        }
        Ok(provider)
    }

    /// Whether `kind` is registered and able to initialize.
    pub async fn is_available(&self, kind: ProviderKind) -> bool {
        self.get(kind).await.is_ok()
    }

    /// Tear down every initialized handle.
    pub async fn shutdown(&self) {
        let providers: Vec<(ProviderKind, Arc<dyn ChatProvider>)> = {
            let mut entries = self.entries.lock().unwrap();
            entries
                .iter_mut()
                .filter(|(_, e)| e.initialized)
                .map(|(&kind, e)| {
                    e.initialized = false;
                    (kind, e.provider.clone())
                })
                .collect()
        };
        for (kind, provider) in providers {
            provider.shutdown().await;
            debug!(provider = %kind, "provider shut down");
        }
        info!("provider registry shut down");
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
