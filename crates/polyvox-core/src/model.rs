//! Model descriptors
//!
//! A descriptor is immutable after catalog load. `id` is globally unique
//! within a process; `api_id` is what actually goes on the wire.

use crate::types::ProviderKind;
use serde::{Deserialize, Serialize};

/// Coarse cost classification used for default model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Cheap,
    #[default]
    Mid,
    Premium,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    /// Identifier placed on the wire (may differ from `id`)
    pub api_id: String,
    pub provider_kind: ProviderKind,
    /// USD per million input tokens
    #[serde(default)]
    pub input_cost_per_mtok: f64,
    /// USD per million output tokens
    #[serde(default)]
    pub output_cost_per_mtok: f64,
    /// USD per million thinking tokens, for models that bill them separately
    #[serde(default)]
    pub thinking_cost_per_mtok: f64,
    #[serde(default = "default_context_window")]
    pub context_window: u64,
    #[serde(default = "default_max_output")]
    pub max_output: u64,
    #[serde(default)]
    pub supports_tools: bool,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default = "default_true")]
    pub supports_streaming: bool,
    #[serde(default)]
    pub tier: ModelTier,
    #[serde(default)]
    pub release_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub deprecated: bool,
}

fn default_context_window() -> u64 {
    128_000
}

fn default_max_output() -> u64 {
    8_192
}

fn default_true() -> bool {
    true
}

impl ModelDescriptor {
    /// Check structural invariants: non-negative costs and
    /// `max_output <= context_window`.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("model id must not be empty".to_string());
        }
        if self.api_id.is_empty() {
            return Err(format!("model {}: api_id must not be empty", self.id));
        }
        if self.input_cost_per_mtok < 0.0
            || self.output_cost_per_mtok < 0.0
            || self.thinking_cost_per_mtok < 0.0
        {
            return Err(format!("model {}: costs must be non-negative", self.id));
        }
        if self.max_output > self.context_window {
            return Err(format!(
                "model {}: max_output {} exceeds context window {}",
                self.id, self.max_output, self.context_window
            ));
        }
        Ok(())
    }

    /// USD cost for a single reply at this model's per-million-token rates.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        if self.provider_kind.is_local() {
            return 0.0;
        }
        (input_tokens as f64 * self.input_cost_per_mtok
            + output_tokens as f64 * self.output_cost_per_mtok)
            / 1_000_000.0
    }
}
