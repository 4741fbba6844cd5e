//! Character-heuristic token estimation
//!
//! Exact tokenization is provider-proprietary. The estimator's contract is
//! to overestimate modestly and never overflow a model's declared context
//! window. Content is classified from its leading bytes and divided by a
//! per-class chars-per-token constant, then corrected by a per-provider
//! factor.

use crate::catalog::ModelCatalog;
use polyvox_core::types::ProviderKind;
use std::sync::Arc;

/// How many leading bytes participate in content classification.
const CLASSIFY_WINDOW: usize = 1000;

/// Safety margin applied when inverting the heuristic for truncation.
const TRUNCATE_MARGIN: f64 = 0.95;

/// Coarse content classes with their chars-per-token constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    English,
    Code,
    Json,
    Unicode,
}

impl ContentClass {
    pub fn chars_per_token(self) -> f64 {
        match self {
            ContentClass::English => 4.0,
            ContentClass::Code => 3.5,
            ContentClass::Json => 3.0,
            ContentClass::Unicode => 2.5,
        }
    }
}

/// Classify text by scanning up to [`CLASSIFY_WINDOW`] leading bytes.
///
/// Non-ASCII dominance wins first (multibyte scripts tokenize densest),
/// then brace/bracket/colon density separates JSON from general code.
pub fn classify(text: &str) -> ContentClass {
    let window = &text.as_bytes()[..text.len().min(CLASSIFY_WINDOW)];
    if window.is_empty() {
        return ContentClass::English;
    }

    let len = window.len() as f64;
    let mut non_ascii = 0usize;
    let mut json_marks = 0usize; // { } [ ] : "
    let mut code_marks = 0usize; // ( ) ; = < >
    for &b in window {
        if b >= 0x80 {
            non_ascii += 1;
        }
        match b {
            b'{' | b'}' | b'[' | b']' | b':' | b'"' => json_marks += 1,
            b'(' | b')' | b';' | b'=' | b'<' | b'>' => code_marks += 1,
            _ => {}
        }
    }

    if non_ascii as f64 / len > 0.15 {
        ContentClass::Unicode
    } else if json_marks as f64 / len > 0.08 {
        ContentClass::Json
    } else if (json_marks + code_marks) as f64 / len > 0.05 {
        ContentClass::Code
    } else {
        ContentClass::English
    }
}

/// Heuristic token count for `text` under `provider_kind`'s tokenizer.
pub fn estimate(text: &str, provider_kind: ProviderKind) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let class = classify(text);
    let raw = text.len() as f64 / class.chars_per_token();
    (raw * provider_kind.token_estimate_factor()).ceil() as u64
}

/// Token count for a chat message including its wire envelope.
///
/// Each wire format wraps a message in a small JSON envelope; the role name
/// itself is also tokenized.
pub fn estimate_message(role: &str, content: &str, provider_kind: ProviderKind) -> u64 {
    let envelope = match provider_kind {
        ProviderKind::Anthropic => 8,
        ProviderKind::Gemini => 6,
        _ => 4,
    };
    envelope + role.len() as u64 / 4 + estimate(content, provider_kind)
}

/// Truncate `text` so its estimate stays at or under `max_tokens`.
///
/// Inverts the heuristic with a 5% safety margin, backs off to the nearest
/// whitespace (never splitting a UTF-8 sequence), and appends an ellipsis.
/// Returns the input unchanged when it already fits.
pub fn truncate(text: &str, max_tokens: u64, provider_kind: ProviderKind) -> String {
    if estimate(text, provider_kind) <= max_tokens {
        return text.to_string();
    }

    let class = classify(text);
    let budget = (max_tokens as f64 * class.chars_per_token()
        / provider_kind.token_estimate_factor()
        * TRUNCATE_MARGIN) as usize;
    let mut cut = budget.min(text.len());
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }

    // Back off to whitespace so we never end mid-word.
    let head = &text[..cut];
    let cut = head
        .rfind(|c: char| c.is_whitespace())
        .unwrap_or(cut);

    format!("{}…", text[..cut].trim_end())
}

/// Estimator bound to a model catalog for cost and window queries.
#[derive(Clone)]
pub struct TokenEstimator {
    catalog: Arc<ModelCatalog>,
}

impl TokenEstimator {
    pub fn new(catalog: Arc<ModelCatalog>) -> Self {
        Self { catalog }
    }

    pub fn estimate(&self, text: &str, provider_kind: ProviderKind) -> u64 {
        estimate(text, provider_kind)
    }

    pub fn estimate_message(&self, role: &str, content: &str, provider_kind: ProviderKind) -> u64 {
        estimate_message(role, content, provider_kind)
    }

    /// USD cost of a reply; 0 for unknown models and local providers.
    pub fn cost(&self, model_id: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.catalog
            .get_by_id(model_id)
            .map(|m| m.cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }

    /// Whether `input_tokens` plus a reserved output budget fit the window.
    pub fn fits_context(&self, input_tokens: u64, reserved_output: u64, model_id: &str) -> bool {
        match self.catalog.get_by_id(model_id) {
            Some(model) => input_tokens + reserved_output <= model.context_window,
            None => false,
        }
    }

    /// Output tokens still available after `input_tokens` are consumed.
    pub fn available_for_output(&self, input_tokens: u64, model_id: &str) -> u64 {
        match self.catalog.get_by_id(model_id) {
            Some(model) => model
                .max_output
                .min(model.context_window.saturating_sub(input_tokens)),
            None => 0,
        }
    }

    pub fn truncate(&self, text: &str, max_tokens: u64, provider_kind: ProviderKind) -> String {
        truncate(text, max_tokens, provider_kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelCatalog;

    #[test]
    fn test_classify_english() {
        assert_eq!(
            classify("The quick brown fox jumps over the lazy dog."),
            ContentClass::English
        );
    }

    #[test]
    fn test_classify_json() {
        assert_eq!(
            classify(r#"{"name": "value", "items": [1, 2, 3], "nested": {"k": true}}"#),
            ContentClass::Json
        );
    }

    #[test]
    fn test_classify_code() {
        let src = "fn main() { let x = compute(42); if x > 0 { print(x); } }";
        let class = classify(src);
        assert!(class == ContentClass::Code || class == ContentClass::Json);
    }

    #[test]
    fn test_classify_unicode() {
        assert_eq!(classify("こんにちは、世界。今日はいい天気ですね。"), ContentClass::Unicode);
    }

    #[test]
    fn test_estimate_empty_is_zero() {
        assert_eq!(estimate("", ProviderKind::Anthropic), 0);
    }

    #[test]
    fn test_estimate_uses_provider_factor() {
        let text = "Hello world, this is a plain English sentence for counting.";
        let anthropic = estimate(text, ProviderKind::Anthropic);
        let openai = estimate(text, ProviderKind::OpenAi);
        let gemini = estimate(text, ProviderKind::Gemini);
        assert!(openai <= anthropic);
        assert!(gemini >= anthropic);
    }

    #[test]
    fn test_estimate_monotone_under_concatenation() {
        let base = "The quick brown fox jumps over the lazy dog. ";
        let mut prev = 0;
        let mut text = String::new();
        for _ in 0..50 {
            text.push_str(base);
            let est = estimate(&text, ProviderKind::Anthropic);
            assert!(est >= prev, "estimate decreased: {est} < {prev}");
            prev = est;
        }
    }

    #[test]
    fn test_estimate_message_adds_envelope() {
        let bare = estimate("Hello", ProviderKind::OpenAi);
        let framed = estimate_message("user", "Hello", ProviderKind::OpenAi);
        assert!(framed > bare);
    }

    #[test]
    fn test_truncate_short_text_unchanged() {
        let text = "short";
        assert_eq!(truncate(text, 100, ProviderKind::Anthropic), "short");
    }

    #[test]
    fn test_truncate_respects_budget() {
        let text = "word ".repeat(2000);
        let truncated = truncate(&text, 100, ProviderKind::Anthropic);
        assert!(truncated.ends_with('…'));
        assert!(estimate(&truncated, ProviderKind::Anthropic) <= 100);
    }

    #[test]
    fn test_truncate_never_splits_utf8() {
        let text = "日本語のテキスト ".repeat(500);
        let truncated = truncate(&text, 50, ProviderKind::Anthropic);
        // Would have panicked on a bad boundary; also verify it's valid.
        assert!(truncated.chars().count() > 0);
    }

    #[test]
    fn test_catalog_bound_queries() {
        let catalog = Arc::new(ModelCatalog::with_fallback_models());
        let estimator = TokenEstimator::new(catalog.clone());

        let model = catalog
            .get_by_provider(ProviderKind::Anthropic)
            .into_iter()
            .next()
            .expect("fallback set has an anthropic model");

        assert!(estimator.fits_context(100, 100, &model.id));
        assert!(!estimator.fits_context(model.context_window, 1, &model.id));
        assert_eq!(
            estimator.available_for_output(model.context_window, &model.id),
            0
        );
        assert!(estimator.available_for_output(0, &model.id) <= model.max_output);
    }

    #[test]
    fn test_cost_unknown_model_is_zero() {
        let estimator = TokenEstimator::new(Arc::new(ModelCatalog::with_fallback_models()));
        assert_eq!(estimator.cost("no-such-model", 1000, 1000), 0.0);
    }
}
