//! Polyvox Egress Adapters
//!
//! One adapter per provider wire format, all implementing the
//! [`polyvox_core::ChatProvider`] contract:
//!
//! - [`anthropic`]: Anthropic-style messages API (`x-api-key` auth)
//! - [`openai`]: OpenAI-style chat completions (bearer auth)
//! - [`openrouter`]: OpenAI-compatible with identification headers
//! - [`gemini`]: Gemini-style generateContent (query-parameter auth)
//! - [`ollama`]: local daemon, no auth, NDJSON streaming
//! - [`local`]: on-device bridges (MLX, Apple Foundation) with model cache
//!
//! Shared plumbing: [`transport`] (HTTP client construction and buffered
//! body reads), [`stream`] (per-format streaming parsers), [`escape`]
//! (JSON string escape helpers), [`retry_after`] (429 header parsing).

pub mod anthropic;
pub mod escape;
pub mod gemini;
pub mod local;
pub mod ollama;
pub mod openai;
pub mod openrouter;
pub mod retry_after;
pub(crate) mod state;
pub mod stream;
pub mod transport;

pub use retry_after::parse_retry_after;
