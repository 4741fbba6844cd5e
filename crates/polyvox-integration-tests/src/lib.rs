//! End-to-end test helpers
//!
//! The actual scenarios live in `tests/`; this crate exists so they can
//! share wiring helpers across files.

use polyvox_egress::anthropic::{AnthropicConfig, AnthropicConnector};
use polyvox_models::ModelCatalog;
use std::sync::Arc;

/// Anthropic adapter pointed at a mock server, with the built-in catalog.
pub fn anthropic_against(base_url: &str) -> AnthropicConnector {
    let config = AnthropicConfig::default()
        .with_base_url(base_url)
        .with_api_key("test-key");
    AnthropicConnector::new(config, Arc::new(ModelCatalog::with_fallback_models()))
}
