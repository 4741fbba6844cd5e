//! Polyvox Core Types and Traits
//!
//! This crate provides the fundamental types and traits used throughout Polyvox:
//!
//! - [`error`]: The closed provider error taxonomy
//! - [`types`]: Provider kinds, token usage accounting, model tiers
//! - [`model`]: Model descriptors placed on the wire and priced per token
//! - [`tool`]: Tool definitions, parameters and parsed tool calls
//! - [`provider`]: The `ChatProvider` contract every adapter implements
//! - [`cancel`]: Cancellation token shared between transport, retry and realtime

pub mod cancel;
pub mod error;
pub mod model;
pub mod provider;
pub mod tool;
pub mod types;

pub use cancel::CancelToken;
pub use error::{Error, ErrorKind, Result};
pub use model::{ModelDescriptor, ModelTier};
pub use provider::{ChatProvider, ChatReply, ProviderCapabilities, StreamEvent, StreamHandler};
pub use tool::{ParameterType, ToolCall, ToolDefinition, ToolParameter};
pub use types::{ProviderKind, TokenUsage};
