//! Runtime configuration file
//!
//! A single JSON document loaded at startup. Unknown fields are ignored;
//! missing fields fall back to per-field defaults so old config files keep
//! working across releases.

use polyvox_core::model::{ModelDescriptor, ModelTier};
use polyvox_core::types::ProviderKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub version: String,

    /// Provider-kind name → models map
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderModels>,

    #[serde(default)]
    pub compare_defaults: CompareDefaults,

    #[serde(default)]
    pub benchmark_defaults: BenchmarkDefaults,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderModels {
    /// Model id → record
    #[serde(default)]
    pub models: BTreeMap<String, ModelRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompareDefaults {
    #[serde(default)]
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkDefaults {
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

impl Default for BenchmarkDefaults {
    fn default() -> Self {
        Self {
            model: String::new(),
            iterations: default_iterations(),
        }
    }
}

fn default_iterations() -> u32 {
    3
}

/// One model as written in the config file.
///
/// Field names follow the file format, not the in-memory descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRecord {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub api_id: String,
    #[serde(default)]
    pub input_cost: f64,
    #[serde(default)]
    pub output_cost: f64,
    #[serde(default)]
    pub thinking_cost: f64,
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
    pub released: Option<chrono::NaiveDate>,
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

impl RuntimeConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Flatten the providers map into validated model descriptors.
    ///
    /// Records under an unrecognized provider key and records failing
    /// validation are skipped with a warning rather than failing the load.
    pub fn descriptors(&self) -> Vec<ModelDescriptor> {
        let mut out = Vec::new();
        for (provider_name, entry) in &self.providers {
            let Ok(kind) = provider_name.parse::<ProviderKind>() else {
                tracing::warn!(provider = %provider_name, "skipping unknown provider in config");
                continue;
            };
            for (id, record) in &entry.models {
                let descriptor = record.to_descriptor(id, kind);
                match descriptor.validate() {
                    Ok(()) => out.push(descriptor),
                    Err(reason) => {
                        tracing::warn!(model = %id, %reason, "skipping invalid model record");
                    }
                }
            }
        }
        out
    }
}

impl ModelRecord {
    pub fn to_descriptor(&self, id: &str, kind: ProviderKind) -> ModelDescriptor {
        ModelDescriptor {
            id: id.to_string(),
            display_name: if self.display_name.is_empty() {
                id.to_string()
            } else {
                self.display_name.clone()
            },
            api_id: if self.api_id.is_empty() {
                id.to_string()
            } else {
                self.api_id.clone()
            },
            provider_kind: kind,
            input_cost_per_mtok: self.input_cost,
            output_cost_per_mtok: self.output_cost,
            thinking_cost_per_mtok: self.thinking_cost,
            context_window: self.context_window,
            max_output: self.max_output,
            supports_tools: self.supports_tools,
            supports_vision: self.supports_vision,
            supports_streaming: self.supports_streaming,
            tier: self.tier,
            release_date: self.released,
            deprecated: self.deprecated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "version": "1",
        "providers": {
            "anthropic": {
                "models": {
                    "claude-sonnet-4.5": {
                        "display_name": "Claude Sonnet 4.5",
                        "api_id": "claude-sonnet-4-5",
                        "input_cost": 3.0,
                        "output_cost": 15.0,
                        "context_window": 200000,
                        "max_output": 64000,
                        "supports_tools": true,
                        "supports_vision": true,
                        "tier": "mid",
                        "released": "2025-09-29"
                    }
                }
            },
            "openai": {
                "models": {
                    "gpt-5-mini": {
                        "input_cost": 0.25,
                        "output_cost": 2.0,
                        "tier": "cheap"
                    }
                }
            }
        },
        "compare_defaults": { "models": ["claude-sonnet-4.5", "gpt-5-mini"] },
        "benchmark_defaults": { "model": "gpt-5-mini", "iterations": 5 },
        "unknown_top_level_key": { "ignored": true }
    }"#;

    #[test]
    fn test_parse_sample_config() {
        let config = RuntimeConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.version, "1");
        assert_eq!(config.compare_defaults.models.len(), 2);
        assert_eq!(config.benchmark_defaults.iterations, 5);

        let descriptors = config.descriptors();
        assert_eq!(descriptors.len(), 2);

        let sonnet = descriptors
            .iter()
            .find(|d| d.id == "claude-sonnet-4.5")
            .unwrap();
        assert_eq!(sonnet.api_id, "claude-sonnet-4-5");
        assert_eq!(sonnet.provider_kind, ProviderKind::Anthropic);
        assert_eq!(sonnet.max_output, 64_000);
        assert!(sonnet.supports_tools);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = RuntimeConfig::from_json(SAMPLE).unwrap();
        let descriptors = config.descriptors();
        let mini = descriptors.iter().find(|d| d.id == "gpt-5-mini").unwrap();
        // api_id falls back to the map key, window/output to defaults
        assert_eq!(mini.api_id, "gpt-5-mini");
        assert_eq!(mini.context_window, 128_000);
        assert!(mini.supports_streaming);
        assert!(!mini.supports_tools);
    }

    #[test]
    fn test_unknown_provider_skipped() {
        let json = r#"{
            "providers": {
                "frobnicator": { "models": { "x": {} } },
                "ollama": { "models": { "llama3.2": {} } }
            }
        }"#;
        let config = RuntimeConfig::from_json(json).unwrap();
        let descriptors = config.descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].provider_kind, ProviderKind::Ollama);
    }

    #[test]
    fn test_invalid_record_skipped() {
        let json = r#"{
            "providers": {
                "openai": {
                    "models": {
                        "broken": { "max_output": 999999999, "context_window": 1000 },
                        "fine": {}
                    }
                }
            }
        }"#;
        let config = RuntimeConfig::from_json(json).unwrap();
        let descriptors = config.descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].id, "fine");
    }

    #[test]
    fn test_empty_document_is_valid() {
        let config = RuntimeConfig::from_json("{}").unwrap();
        assert!(config.descriptors().is_empty());
        assert_eq!(config.benchmark_defaults.iterations, 3);
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = RuntimeConfig::load(&path).unwrap();
        assert_eq!(config.descriptors().len(), 2);

        assert!(RuntimeConfig::load(&dir.path().join("missing.json")).is_err());

        std::fs::write(&path, "{ not json").unwrap();
        let err = RuntimeConfig::load(&path).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
