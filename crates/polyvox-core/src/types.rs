//! Provider kinds and token accounting

use serde::{Deserialize, Serialize};

/// Closed taxonomy of provider wire formats.
///
/// Remote kinds speak HTTP; `Mlx` and `AppleFoundation` are synchronous
/// bridges to a native inference library and never touch the network for
/// inference itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Gemini,
    OpenRouter,
    Ollama,
    Mlx,
    AppleFoundation,
}

impl ProviderKind {
    /// Every kind, in registry order.
    pub const ALL: [ProviderKind; 7] = [
        ProviderKind::Anthropic,
        ProviderKind::OpenAi,
        ProviderKind::Gemini,
        ProviderKind::OpenRouter,
        ProviderKind::Ollama,
        ProviderKind::Mlx,
        ProviderKind::AppleFoundation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Mlx => "mlx",
            ProviderKind::AppleFoundation => "apple_foundation",
        }
    }

    /// Environment variable holding this provider's credential, if it uses one.
    pub fn auth_env_var(self) -> Option<&'static str> {
        match self {
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Gemini => Some("GEMINI_API_KEY"),
            ProviderKind::OpenRouter => Some("OPENROUTER_API_KEY"),
            ProviderKind::Ollama | ProviderKind::Mlx | ProviderKind::AppleFoundation => None,
        }
    }

    /// True for on-device kinds that run without any HTTP endpoint.
    pub fn is_local(self) -> bool {
        matches!(self, ProviderKind::Mlx | ProviderKind::AppleFoundation)
    }

    /// Correction factor applied to the character-based token heuristic.
    ///
    /// The three primary remote wire formats tokenize slightly differently;
    /// everything else uses the neutral factor.
    pub fn token_estimate_factor(self) -> f64 {
        match self {
            ProviderKind::Anthropic => 1.0,
            ProviderKind::OpenAi | ProviderKind::OpenRouter => 0.95,
            ProviderKind::Gemini => 1.05,
            _ => 1.0,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAi),
            "gemini" => Ok(ProviderKind::Gemini),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            "ollama" => Ok(ProviderKind::Ollama),
            "mlx" => Ok(ProviderKind::Mlx),
            "apple_foundation" => Ok(ProviderKind::AppleFoundation),
            other => Err(format!("unknown provider kind: {other}")),
        }
    }
}

/// Per-reply token and cost accounting.
///
/// Populated from server-reported counts when present, else from the
/// heuristic estimator. `estimated_cost` is always computed from the model
/// catalog at reply time, in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub estimated_cost: f64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cached_tokens: 0,
            estimated_cost: 0.0,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Fold another reply's usage into a running session total.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_tokens += other.cached_tokens;
        self.estimated_cost += other.estimated_cost;
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.accumulate(&rhs);
    }
}

/// Format a USD cost for display: `$0.0042`, `<$0.0001`, `$1.23`.
pub fn format_cost(cost: f64) -> String {
    if cost <= 0.0 {
        "$0.00".to_string()
    } else if cost < 0.0001 {
        "<$0.0001".to_string()
    } else if cost < 1.0 {
        format!("${cost:.4}")
    } else {
        format!("${cost:.2}")
    }
}

/// Format a token count for display: `842`, `1.2K`, `3.4M`.
pub fn format_tokens(tokens: u64) -> String {
    if tokens >= 1_000_000 {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{:.1}K", tokens as f64 / 1_000.0)
    } else {
        tokens.to_string()
    }
}
