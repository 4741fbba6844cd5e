//! Provider contract
//!
//! Every adapter — remote wire format or on-device bridge — implements
//! [`ChatProvider`]. Adapters translate their provider's surface into this
//! contract and never retry internally.

use crate::{
    error::{Error, Result},
    model::ModelDescriptor,
    tool::{ToolCall, ToolDefinition},
    types::{ProviderKind, TokenUsage},
};

#[derive(Debug, Clone, Copy)]
pub struct ProviderCapabilities {
    pub supports_streaming: bool,
    pub supports_tools: bool,
    pub supports_vision: bool,
}

/// A completed (non-streaming) reply with populated usage.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    /// Empty when no tools were used
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

/// Event mirror of [`StreamHandler`] for channel-based consumers.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk { text: String, is_final: bool },
    Complete { text: String, usage: TokenUsage },
    Error(Error),
}

/// Streaming delivery callbacks.
///
/// Contract: zero or more `on_chunk(text, false)` calls in network arrival
/// order, then exactly one `on_chunk("", true)` terminal marker, then exactly
/// one `on_complete` with the concatenation of every chunk. `on_error` ends
/// the stream instead of `on_complete`.
pub struct StreamHandler {
    pub on_chunk: Box<dyn Fn(&str, bool) + Send + Sync>,
    pub on_complete: Box<dyn Fn(&str, &TokenUsage) + Send + Sync>,
    pub on_error: Box<dyn Fn(&Error) + Send + Sync>,
}

impl StreamHandler {
    pub fn new(
        on_chunk: impl Fn(&str, bool) + Send + Sync + 'static,
        on_complete: impl Fn(&str, &TokenUsage) + Send + Sync + 'static,
        on_error: impl Fn(&Error) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_chunk: Box::new(on_chunk),
            on_complete: Box::new(on_complete),
            on_error: Box::new(on_error),
        }
    }

    /// Handler that forwards every event into an unbounded channel.
    ///
    /// The receiver sees the same ordering guarantees as the callbacks.
    pub fn channel() -> (Self, tokio::sync::mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let chunk_tx = tx.clone();
        let complete_tx = tx.clone();
        let handler = Self::new(
            move |text, is_final| {
                let _ = chunk_tx.send(StreamEvent::Chunk {
                    text: text.to_string(),
                    is_final,
                });
            },
            move |text, usage| {
                let _ = complete_tx.send(StreamEvent::Complete {
                    text: text.to_string(),
                    usage: *usage,
                });
            },
            move |err| {
                let _ = tx.send(StreamEvent::Error(err.clone()));
            },
        );
        (handler, rx)
    }

    /// Handler that ignores everything. Useful in tests.
    pub fn sink() -> Self {
        Self::new(|_, _| {}, |_, _| {}, |_| {})
    }
}

impl std::fmt::Debug for StreamHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StreamHandler")
    }
}

impl std::fmt::Debug for dyn ChatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatProvider").field("kind", &self.kind()).finish()
    }
}

#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Prepare the adapter: discover credentials, build the HTTP client.
    ///
    /// Idempotent and mutex-guarded; must not perform network I/O beyond
    /// credential discovery. Full network setup is deferred to the first
    /// request or to [`ChatProvider::validate_credentials`].
    async fn init(&self) -> Result<()>;

    /// Release the HTTP client and clear any recorded error.
    async fn shutdown(&self);

    /// Probe that the configured credentials are accepted.
    async fn validate_credentials(&self) -> bool;

    /// Send a non-streaming chat request.
    async fn chat(&self, model: &str, system: Option<&str>, user: &str) -> Result<ChatReply>;

    /// Send a chat request with tool schemas attached.
    ///
    /// Degrades to [`ChatProvider::chat`] when `tools` is empty.
    async fn chat_with_tools(
        &self,
        model: &str,
        system: Option<&str>,
        user: &str,
        tools: &[ToolDefinition],
    ) -> Result<ChatReply>;

    /// Stream a chat reply through `handler`.
    ///
    /// Emits `on_chunk(.., true)` exactly once to signal termination.
    async fn stream_chat(
        &self,
        model: &str,
        system: Option<&str>,
        user: &str,
        handler: StreamHandler,
    ) -> Result<()>;

    /// Heuristic token estimate for `text` under this provider's tokenizer.
    fn estimate_tokens(&self, text: &str) -> u64;

    /// Most recent error recorded by this adapter, if any.
    fn last_error(&self) -> Option<Error>;

    /// Models this adapter can serve.
    fn list_models(&self) -> Vec<ModelDescriptor>;

    fn capabilities(&self) -> ProviderCapabilities;
}
