//! On-device egress adapters
//!
//! MLX and Apple Foundation run through a synchronous bridge to a native
//! inference library instead of HTTP. The adapter owns hardware
//! precondition checks, the on-disk model cache with download progress, and
//! load/unload. Cost is always zero; usage is always heuristic.

use crate::transport;
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
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

/// Minimum machine spec a bridge needs before it will load anything.
#[derive(Debug, Clone)]
pub struct HardwareRequirements {
    pub min_memory_bytes: u64,
    /// Expected chip family prefix, e.g. "Apple M"
    pub chip_family: Option<String>,
}

/// What a bridge reports about the machine it runs on.
#[derive(Debug, Clone)]
pub struct HardwareInfo {
    pub total_memory_bytes: u64,
    pub chip_name: String,
}

impl HardwareRequirements {
    pub fn satisfied_by(&self, info: &HardwareInfo) -> bool {
        if info.total_memory_bytes < self.min_memory_bytes {
            return false;
        }
        match &self.chip_family {
            Some(family) => info.chip_name.starts_with(family.as_str()),
            None => true,
        }
    }
}

/// Request handed to the native bridge.
#[derive(Debug, Clone)]
pub struct LocalGenRequest {
    pub system: Option<String>,
    pub user: String,
    /// Tool schemas in OpenAI wrapper shape; bridges may ignore them
    pub tools_json: Option<serde_json::Value>,
}

/// What the native bridge produced.
#[derive(Debug, Clone, Default)]
pub struct LocalGenReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Synchronous bridge to a native inference library.
///
/// Implementations wrap MLX or the Apple Foundation framework behind an FFI
/// boundary. Calls block; the adapter moves them off the async runtime.
pub trait LocalBridge: Send + Sync {
    fn name(&self) -> &str;

    fn hardware_requirements(&self) -> HardwareRequirements;

    fn hardware_info(&self) -> HardwareInfo;

    /// Load model weights from an on-disk path. Idempotent per path.
    fn load_model(&self, path: &Path) -> Result<()>;

    fn unload_model(&self);

    fn is_model_loaded(&self) -> bool;

    /// Run one generation. Blocking.
    fn generate(&self, request: &LocalGenRequest) -> Result<LocalGenReply>;

    /// Whether the bridge can deliver incremental chunks. When false, the
    /// streaming contract is satisfied by single-chunk delivery.
    fn supports_incremental(&self) -> bool {
        false
    }
}

/// Progress hook for model downloads: (bytes so far, total when known).
pub type DownloadProgress = dyn Fn(u64, Option<u64>) + Send + Sync;

/// On-disk model cache under `$HOME/.polyvox/models/`.
pub struct ModelCache {
    root: PathBuf,
}

impl ModelCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn default_location() -> Self {
        let root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".polyvox")
            .join("models");
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache path for a model identifier ("/" becomes "--" so hub-style
    /// names stay a single path component).
    pub fn path_for(&self, api_id: &str) -> PathBuf {
        self.root.join(api_id.replace('/', "--"))
    }

    pub fn is_cached(&self, api_id: &str) -> bool {
        self.path_for(api_id).exists()
    }

    /// Download model weights to the cache, reporting progress.
    ///
    /// Writes to a `.partial` file first so an interrupted download never
    /// looks like a cached model.
    pub async fn download(
        &self,
        api_id: &str,
        url: &str,
        cancel: &CancelToken,
        progress: Option<&DownloadProgress>,
    ) -> Result<PathBuf> {
        let target = self.path_for(api_id);
        if target.exists() {
            debug!(model = api_id, "model already cached");
            return Ok(target);
        }
        std::fs::create_dir_all(&self.root)
            .map_err(|e| Error::new(ErrorKind::Unknown, format!("cannot create cache dir: {e}")))?;

        let client = transport::create_streaming_client(&transport::HttpClientConfig::default())?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(transport::map_transport_error)?;
        if !response.status().is_success() {
            return Err(Error::from_status(response.status().as_u16(), String::new()));
        }

        let total = response.content_length();
        let partial = target.with_extension("partial");
        let mut file = std::fs::File::create(&partial)
            .map_err(|e| Error::new(ErrorKind::Unknown, format!("cannot create file: {e}")))?;

        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                drop(file);
                let _ = std::fs::remove_file(&partial);
                return Err(Error::new(ErrorKind::Timeout, "download cancelled"));
            }
            let chunk = chunk.map_err(transport::map_transport_error)?;
            std::io::Write::write_all(&mut file, &chunk)
                .map_err(|e| Error::new(ErrorKind::Unknown, format!("write failed: {e}")))?;
            received += chunk.len() as u64;
            if let Some(progress) = progress {
                progress(received, total);
            }
        }
        drop(file);

        std::fs::rename(&partial, &target)
            .map_err(|e| Error::new(ErrorKind::Unknown, format!("rename failed: {e}")))?;
        info!(model = api_id, bytes = received, "model downloaded");
        Ok(target)
    }
}

/// Which on-device bridge serves a request.
///
/// The small-prompt / tool-using default goes to Apple Foundation, larger
/// prompts to MLX. Both knobs are configurable.
#[derive(Debug, Clone)]
pub struct LocalRouteConfig {
    /// Prompts shorter than this (in bytes) prefer Apple Foundation
    pub prompt_length_threshold: usize,
    /// Tool-using requests prefer Apple Foundation regardless of length
    pub prefer_foundation_for_tools: bool,
}

impl Default for LocalRouteConfig {
    fn default() -> Self {
        Self {
            prompt_length_threshold: 8000,
            prefer_foundation_for_tools: true,
        }
    }
}

impl LocalRouteConfig {
    pub fn preferred_kind(&self, prompt_len: usize, needs_tools: bool) -> ProviderKind {
        if (needs_tools && self.prefer_foundation_for_tools)
            || prompt_len < self.prompt_length_threshold
        {
            ProviderKind::AppleFoundation
        } else {
            ProviderKind::Mlx
        }
    }
}

struct LocalState {
    initialized: bool,
    last_error: Option<Error>,
}

/// Adapter over a [`LocalBridge`], one per on-device kind.
pub struct LocalConnector {
    kind: ProviderKind,
    bridge: Arc<dyn LocalBridge>,
    cache: ModelCache,
    catalog: Arc<ModelCatalog>,
    state: Mutex<LocalState>,
    cancel: CancelToken,
}

impl LocalConnector {
    pub fn new(
        kind: ProviderKind,
        bridge: Arc<dyn LocalBridge>,
        cache: ModelCache,
        catalog: Arc<ModelCatalog>,
    ) -> Self {
        debug_assert!(kind.is_local());
        Self {
            kind,
            bridge,
            cache,
            catalog,
            state: Mutex::new(LocalState {
                initialized: false,
                last_error: None,
            }),
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    fn record_error(&self, err: &Error) {
        self.state.lock().unwrap().last_error = Some(err.clone());
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.state.lock().unwrap().initialized {
            Ok(())
        } else {
            Err(Error::not_initialized(self.kind))
        }
    }

    /// Download (if needed) and load a model into the bridge.
    pub async fn prepare_model(
        &self,
        model: &str,
        download_url: Option<&str>,
        progress: Option<&DownloadProgress>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        let api_id = self
            .catalog
            .get_by_id(model)
            .map(|m| m.api_id.clone())
            .unwrap_or_else(|| model.to_string());

        let path = if self.cache.is_cached(&api_id) {
            self.cache.path_for(&api_id)
        } else if let Some(url) = download_url {
            self.cache.download(&api_id, url, &self.cancel, progress).await?
        } else {
            let err = Error::new(
                ErrorKind::ModelNotFound,
                format!("model {api_id} is not cached and no download URL was given"),
            );
            self.record_error(&err);
            return Err(err);
        };

        let bridge = self.bridge.clone();
        tokio::task::spawn_blocking(move || bridge.load_model(&path))
            .await
            .map_err(|e| Error::new(ErrorKind::Unknown, format!("load task failed: {e}")))?
            .inspect_err(|e| self.record_error(e))
    }

    async fn run_generate(
        &self,
        system: Option<&str>,
        user: &str,
        tools: &[ToolDefinition],
    ) -> Result<ChatReply> {
        if user.is_empty() {
            let err = Error::invalid_request("prompt must not be empty");
            self.record_error(&err);
            return Err(err);
        }
        self.ensure_initialized()?;
        if !self.bridge.is_model_loaded() {
            let err = Error::new(ErrorKind::ModelNotFound, "no model loaded");
            self.record_error(&err);
            return Err(err);
        }

        let request = LocalGenRequest {
            system: system.map(str::to_string),
            user: user.to_string(),
            tools_json: (!tools.is_empty())
                .then(|| polyvox_tools::tools_to_json(tools, self.kind)),
        };
        let bridge = self.bridge.clone();
        let reply = tokio::task::spawn_blocking(move || bridge.generate(&request))
            .await
            .map_err(|e| Error::new(ErrorKind::Unknown, format!("generate task failed: {e}")))?
            .inspect_err(|e| self.record_error(e))?;

        let input_tokens = estimator::estimate_message("user", user, self.kind)
            + system.map(|s| estimator::estimate(s, self.kind)).unwrap_or(0);
        let output_tokens = estimator::estimate(&reply.text, self.kind);
        Ok(ChatReply {
            text: reply.text,
            tool_calls: reply.tool_calls,
            usage: TokenUsage {
                input_tokens,
                output_tokens,
                cached_tokens: 0,
                estimated_cost: 0.0,
            },
        })
    }
}

#[async_trait]
impl ChatProvider for LocalConnector {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn init(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.initialized {
            return Ok(());
        }
        self.cancel.reset();
        let requirements = self.bridge.hardware_requirements();
        let info = self.bridge.hardware_info();
        if !requirements.satisfied_by(&info) {
            let err = Error::new(
                ErrorKind::InvalidRequest,
                format!(
                    "{} requires {} with at least {} MiB memory (found {} with {} MiB)",
                    self.bridge.name(),
                    requirements.chip_family.as_deref().unwrap_or("any chip"),
                    requirements.min_memory_bytes / (1024 * 1024),
                    info.chip_name,
                    info.total_memory_bytes / (1024 * 1024),
                ),
            );
            state.last_error = Some(err.clone());
            return Err(err);
        }
        state.initialized = true;
        debug!(bridge = self.bridge.name(), "local adapter initialized");
        Ok(())
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        self.bridge.unload_model();
        let mut state = self.state.lock().unwrap();
        state.initialized = false;
        state.last_error = None;
        debug!(bridge = self.bridge.name(), "local adapter shut down");
    }

    async fn validate_credentials(&self) -> bool {
        // No credentials; a supported machine is the precondition.
        self.init().await.is_ok()
    }

    #[instrument(skip(self, system, user))]
    async fn chat(&self, model: &str, system: Option<&str>, user: &str) -> Result<ChatReply> {
        let _ = model; // one loaded model at a time
        self.run_generate(system, user, &[]).await
    }

    async fn chat_with_tools(
        &self,
        model: &str,
        system: Option<&str>,
        user: &str,
        tools: &[ToolDefinition],
    ) -> Result<ChatReply> {
        let _ = model;
        self.run_generate(system, user, tools).await
    }

    async fn stream_chat(
        &self,
        model: &str,
        system: Option<&str>,
        user: &str,
        handler: StreamHandler,
    ) -> Result<()> {
        // The bridge has no incremental callbacks; deliver the full reply
        // as a single chunk, which satisfies the streaming contract.
        if self.bridge.supports_incremental() {
            warn!(
                bridge = self.bridge.name(),
                "incremental bridge output not wired, delivering single chunk"
            );
        }
        match self.chat(model, system, user).await {
            Ok(reply) => {
                (handler.on_chunk)(&reply.text, false);
                (handler.on_chunk)("", true);
                (handler.on_complete)(&reply.text, &reply.usage);
                Ok(())
            }
            Err(err) => {
                (handler.on_error)(&err);
                Err(err)
            }
        }
    }

    fn estimate_tokens(&self, text: &str) -> u64 {
        estimator::estimate(text, self.kind)
    }

    fn last_error(&self) -> Option<Error> {
        self.state.lock().unwrap().last_error.clone()
    }

    fn list_models(&self) -> Vec<ModelDescriptor> {
        self.catalog
            .get_by_provider(self.kind)
            .into_iter()
            .cloned()
            .collect()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: self.bridge.supports_incremental(),
            supports_tools: self.kind == ProviderKind::AppleFoundation,
            supports_vision: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeBridge {
        loaded: AtomicBool,
        memory: u64,
    }

    impl FakeBridge {
        fn new(memory: u64) -> Self {
            Self {
                loaded: AtomicBool::new(false),
                memory,
            }
        }
    }

    impl LocalBridge for FakeBridge {
        fn name(&self) -> &str {
            "fake"
        }

        fn hardware_requirements(&self) -> HardwareRequirements {
            HardwareRequirements {
                min_memory_bytes: 8 * 1024 * 1024 * 1024,
                chip_family: None,
            }
        }

        fn hardware_info(&self) -> HardwareInfo {
            HardwareInfo {
                total_memory_bytes: self.memory,
                chip_name: "Test Chip".to_string(),
            }
        }

        fn load_model(&self, _path: &Path) -> Result<()> {
            self.loaded.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn unload_model(&self) {
            self.loaded.store(false, Ordering::SeqCst);
        }

        fn is_model_loaded(&self) -> bool {
            self.loaded.load(Ordering::SeqCst)
        }

        fn generate(&self, request: &LocalGenRequest) -> Result<LocalGenReply> {
            Ok(LocalGenReply {
                text: format!("echo: {}", request.user),
                tool_calls: vec![],
            })
        }
    }

    fn connector(memory_gb: u64) -> LocalConnector {
        LocalConnector::new(
            ProviderKind::Mlx,
            Arc::new(FakeBridge::new(memory_gb * 1024 * 1024 * 1024)),
            ModelCache::new(std::env::temp_dir().join("polyvox-test-models")),
            Arc::new(ModelCatalog::with_fallback_models()),
        )
    }

    #[tokio::test]
    async fn test_hardware_gate() {
        let small = connector(4);
        let err = small.init().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);

        let big = connector(16);
        assert!(big.init().await.is_ok());
    }

    #[tokio::test]
    async fn test_chat_requires_loaded_model() {
        let c = connector(16);
        c.init().await.unwrap();
        let err = c.chat("mlx-llama-3.2-3b", None, "hi").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ModelNotFound);
    }

    #[tokio::test]
    async fn test_chat_is_free_and_heuristic() {
        let c = connector(16);
        c.init().await.unwrap();
        c.bridge.load_model(Path::new("/dev/null")).unwrap();

        let reply = c.chat("mlx-llama-3.2-3b", None, "hello there").await.unwrap();
        assert_eq!(reply.text, "echo: hello there");
        assert_eq!(reply.usage.estimated_cost, 0.0);
        assert!(reply.usage.input_tokens > 0);
        assert!(reply.usage.output_tokens > 0);
    }

    #[tokio::test]
    async fn test_single_chunk_stream_contract() {
        let c = connector(16);
        c.init().await.unwrap();
        c.bridge.load_model(Path::new("/dev/null")).unwrap();

        let (handler, mut rx) = StreamHandler::channel();
        c.stream_chat("mlx-llama-3.2-3b", None, "ping", handler)
            .await
            .unwrap();

        use polyvox_core::provider::StreamEvent;
        let mut finals = 0;
        let mut completes = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                StreamEvent::Chunk { is_final: true, .. } => finals += 1,
                StreamEvent::Complete { .. } => completes += 1,
                _ => {}
            }
        }
        assert_eq!(finals, 1);
        assert_eq!(completes, 1);
    }

    #[test]
    fn test_cache_path_sanitizes_slashes() {
        let cache = ModelCache::new(PathBuf::from("/tmp/models"));
        let path = cache.path_for("mlx-community/Llama-3.2-3B-Instruct-4bit");
        assert!(!path.file_name().unwrap().to_str().unwrap().contains('/'));
    }

    #[test]
    fn test_route_preference() {
        let route = LocalRouteConfig::default();
        assert_eq!(route.preferred_kind(100, false), ProviderKind::AppleFoundation);
        assert_eq!(route.preferred_kind(20_000, false), ProviderKind::Mlx);
        assert_eq!(route.preferred_kind(20_000, true), ProviderKind::AppleFoundation);

        let custom = LocalRouteConfig {
            prompt_length_threshold: 50,
            prefer_foundation_for_tools: false,
        };
        assert_eq!(custom.preferred_kind(100, true), ProviderKind::Mlx);
    }
}
