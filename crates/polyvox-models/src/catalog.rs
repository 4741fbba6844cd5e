//! Immutable model registry
//!
//! Loaded once at startup from the first readable JSON config location,
//! falling back to a hard-coded descriptor set so the system stays
//! operational with no config file at all. Read-only after construction;
//! share it as `Arc<ModelCatalog>`.

use crate::config::RuntimeConfig;
use polyvox_core::model::{ModelDescriptor, ModelTier};
use polyvox_core::types::ProviderKind;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
    by_id: HashMap<String, usize>,
}

impl ModelCatalog {
    /// Candidate config locations, most specific first: user config
    /// directory, project-local file, system config.
    pub fn config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("polyvox").join("models.json"));
        }
        paths.push(PathBuf::from("polyvox.models.json"));
        paths.push(PathBuf::from("/etc/polyvox/models.json"));
        paths
    }

    /// Load from the first readable config location, else the fallback set.
    pub fn load_default() -> Self {
        for path in Self::config_paths() {
            match RuntimeConfig::load(&path) {
                Ok(config) => {
                    let descriptors = config.descriptors();
                    if descriptors.is_empty() {
                        warn!(path = %path.display(), "model config has no usable models, ignoring");
                        continue;
                    }
                    info!(path = %path.display(), models = descriptors.len(), "loaded model catalog");
                    return Self::from_descriptors(descriptors);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read model config");
                }
            }
        }
        debug!("no model config found, using built-in catalog");
        Self::with_fallback_models()
    }

    pub fn from_descriptors(models: Vec<ModelDescriptor>) -> Self {
        let mut by_id = HashMap::with_capacity(models.len());
        for (i, model) in models.iter().enumerate() {
            if by_id.insert(model.id.clone(), i).is_some() {
                warn!(model = %model.id, "duplicate model id in catalog, keeping the later entry");
            }
        }
        Self { models, by_id }
    }

    /// Built-in descriptors: one line per model the runtime ships knowing
    /// about, at least one per remote provider kind.
    pub fn with_fallback_models() -> Self {
        fn m(
            id: &str,
            display: &str,
            api_id: &str,
            kind: ProviderKind,
            input: f64,
            output: f64,
            window: u64,
            max_out: u64,
            tools: bool,
            vision: bool,
            tier: ModelTier,
        ) -> ModelDescriptor {
            ModelDescriptor {
                id: id.to_string(),
                display_name: display.to_string(),
                api_id: api_id.to_string(),
                provider_kind: kind,
                input_cost_per_mtok: input,
                output_cost_per_mtok: output,
                thinking_cost_per_mtok: 0.0,
                context_window: window,
                max_output: max_out,
                supports_tools: tools,
                supports_vision: vision,
                supports_streaming: true,
                tier,
                release_date: None,
                deprecated: false,
            }
        }

        use ModelTier::*;
        use ProviderKind::*;
        let models = vec![
            m("claude-haiku-4.5", "Claude Haiku 4.5", "claude-haiku-4-5", Anthropic, 1.0, 5.0, 200_000, 64_000, true, true, Cheap),
            m("claude-sonnet-4.5", "Claude Sonnet 4.5", "claude-sonnet-4-5", Anthropic, 3.0, 15.0, 200_000, 64_000, true, true, Mid),
            m("claude-opus-4.5", "Claude Opus 4.5", "claude-opus-4-5", Anthropic, 5.0, 25.0, 200_000, 64_000, true, true, Premium),
            m("gpt-5-nano", "GPT-5 Nano", "gpt-5-nano", OpenAi, 0.05, 0.4, 400_000, 128_000, true, true, Cheap),
            m("gpt-5-mini", "GPT-5 Mini", "gpt-5-mini", OpenAi, 0.25, 2.0, 400_000, 128_000, true, true, Mid),
            m("gpt-5", "GPT-5", "gpt-5", OpenAi, 1.25, 10.0, 400_000, 128_000, true, true, Premium),
            m("gemini-2.5-flash", "Gemini 2.5 Flash", "gemini-2.5-flash", Gemini, 0.3, 2.5, 1_048_576, 65_536, true, true, Cheap),
            m("gemini-2.5-pro", "Gemini 2.5 Pro", "gemini-2.5-pro", Gemini, 1.25, 10.0, 1_048_576, 65_536, true, true, Premium),
            m("openrouter-llama-3.3-70b", "Llama 3.3 70B (OpenRouter)", "meta-llama/llama-3.3-70b-instruct", OpenRouter, 0.12, 0.3, 131_072, 16_384, true, false, Cheap),
            m("ollama-llama3.2", "Llama 3.2 (Ollama)", "llama3.2", Ollama, 0.0, 0.0, 131_072, 8_192, true, false, Cheap),
            m("mlx-llama-3.2-3b", "Llama 3.2 3B (MLX)", "mlx-community/Llama-3.2-3B-Instruct-4bit", Mlx, 0.0, 0.0, 131_072, 8_192, false, false, Cheap),
            m("apple-foundation", "Apple Foundation (on-device)", "apple-foundation", AppleFoundation, 0.0, 0.0, 8_192, 4_096, true, false, Cheap),
        ];
        Self::from_descriptors(models)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&ModelDescriptor> {
        self.by_id.get(id).map(|&i| &self.models[i])
    }

    pub fn get_by_provider(&self, kind: ProviderKind) -> Vec<&ModelDescriptor> {
        self.models
            .iter()
            .filter(|m| m.provider_kind == kind)
            .collect()
    }

    /// Cheapest non-deprecated model for a provider, by the sum of input
    /// and output rates.
    pub fn get_cheapest(&self, kind: ProviderKind) -> Option<&ModelDescriptor> {
        self.models
            .iter()
            .filter(|m| m.provider_kind == kind && !m.deprecated)
            .min_by(|a, b| {
                let ca = a.input_cost_per_mtok + a.output_cost_per_mtok;
                let cb = b.input_cost_per_mtok + b.output_cost_per_mtok;
                ca.partial_cmp(&cb).unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// USD cost for a reply; 0 when the model is unknown.
    pub fn estimate_cost(&self, model_id: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.get_by_id(model_id)
            .map(|m| m.cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }

    pub fn all(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_set_is_valid() {
        let catalog = ModelCatalog::with_fallback_models();
        assert!(!catalog.is_empty());
        for model in catalog.all() {
            model.validate().unwrap();
        }
    }

    #[test]
    fn test_fallback_covers_every_provider() {
        let catalog = ModelCatalog::with_fallback_models();
        for kind in ProviderKind::ALL {
            assert!(
                !catalog.get_by_provider(kind).is_empty(),
                "no fallback model for {kind}"
            );
        }
    }

    #[test]
    fn test_get_by_id() {
        let catalog = ModelCatalog::with_fallback_models();
        let sonnet = catalog.get_by_id("claude-sonnet-4.5").unwrap();
        assert_eq!(sonnet.api_id, "claude-sonnet-4-5");
        assert!(catalog.get_by_id("no-such-model").is_none());
    }

    #[test]
    fn test_get_cheapest_skips_deprecated() {
        let mut cheap = ModelCatalog::with_fallback_models()
            .get_by_id("gpt-5-nano")
            .unwrap()
            .clone();
        let mut premium = ModelCatalog::with_fallback_models()
            .get_by_id("gpt-5")
            .unwrap()
            .clone();
        cheap.deprecated = true;
        premium.deprecated = false;

        let catalog = ModelCatalog::from_descriptors(vec![cheap, premium]);
        let pick = catalog.get_cheapest(ProviderKind::OpenAi).unwrap();
        assert_eq!(pick.id, "gpt-5");
    }

    #[test]
    fn test_estimate_cost_matches_descriptor() {
        let catalog = ModelCatalog::with_fallback_models();
        let model = catalog.get_by_id("claude-sonnet-4.5").unwrap();
        let direct = model.cost(8, 2);
        assert_eq!(catalog.estimate_cost("claude-sonnet-4.5", 8, 2), direct);
        assert_eq!(catalog.estimate_cost("missing", 8, 2), 0.0);
    }

    #[test]
    fn test_local_models_cost_zero() {
        let catalog = ModelCatalog::with_fallback_models();
        assert_eq!(catalog.estimate_cost("mlx-llama-3.2-3b", 10_000, 10_000), 0.0);
        assert_eq!(catalog.estimate_cost("apple-foundation", 10_000, 10_000), 0.0);
    }
}
