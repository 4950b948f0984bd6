//! Model selection, pricing and cost accounting.
//!
//! A [`Model`] pairs a [`LanguageModel`] handle with static [`ModelInfo`]
//! (context window, capabilities, pricing). The orchestrator holds a large
//! model for turns and summaries and a small model for titles and follow-up
//! suggestions.
//!
//! Step cost is computed from [`ModelPricing`] unless a provider reports an
//! authoritative figure in its step metadata; [`CostExtractors`] maps
//! metadata keys to functions that pull that figure out.

use crate::provider::{LanguageModel, ProviderMetadata, Usage};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Per-model pricing (USD per 1M tokens).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    /// Price per 1M tokens written to the prompt cache.
    pub cache_write_per_million: f64,
    /// Price per 1M tokens read from the prompt cache.
    pub cache_read_per_million: f64,
}

impl ModelPricing {
    /// Pricing with cache rates derived from the input rate
    /// (writes at 1.25x, reads at 0.1x).
    pub fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
            cache_write_per_million: input_per_million * 1.25,
            cache_read_per_million: input_per_million * 0.1,
        }
    }

    pub fn with_cache_rates(mut self, write_per_million: f64, read_per_million: f64) -> Self {
        self.cache_write_per_million = write_per_million;
        self.cache_read_per_million = read_per_million;
        self
    }

    /// Cost of one step's usage report.
    pub fn cost(&self, usage: &Usage) -> f64 {
        let per = |tokens: u64, rate: f64| tokens as f64 / 1_000_000.0 * rate;
        per(usage.cache_creation_tokens, self.cache_write_per_million)
            + per(usage.cache_read_tokens, self.cache_read_per_million)
            + per(usage.input_tokens, self.input_per_million)
            + per(usage.output_tokens, self.output_per_million)
    }
}

impl Default for ModelPricing {
    fn default() -> Self {
        Self::new(3.0, 15.0)
    }
}

/// Lookup approximate pricing for a model by name.
///
/// Matches on the segment after the last `/` so org prefixes do not
/// produce false positives.
pub fn pricing_for_model(model: &str) -> ModelPricing {
    let name = model.rsplit('/').next().unwrap_or(model).to_lowercase();

    if name.contains("opus") {
        ModelPricing::new(15.0, 75.0)
    } else if name.contains("sonnet") {
        ModelPricing::new(3.0, 15.0)
    } else if name.contains("haiku") {
        ModelPricing::new(0.25, 1.25)
    } else if name.contains("gpt-4o-mini") || name.contains("4o-mini") {
        ModelPricing::new(0.15, 0.60).with_cache_rates(0.0, 0.075)
    } else if name.contains("gpt-4o") || name.contains("gpt-4") {
        ModelPricing::new(2.50, 10.0).with_cache_rates(0.0, 1.25)
    } else if name.starts_with("o1") || name.starts_with("o3") {
        ModelPricing::new(15.0, 60.0).with_cache_rates(0.0, 7.5)
    } else if name.contains("gemini") && name.contains("flash") {
        ModelPricing::new(0.075, 0.30)
    } else if name.contains("gemini") {
        ModelPricing::new(1.25, 5.0)
    } else if name.contains("deepseek") {
        ModelPricing::new(0.27, 1.10)
    } else {
        ModelPricing::default()
    }
}

/// Static description of a model.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub context_window: u64,
    /// User override of the context window, takes precedence when set.
    pub context_window_override: Option<u64>,
    pub default_max_tokens: u64,
    pub can_reason: bool,
    pub supports_images: bool,
    /// Whether the provider accepts media inside tool-result parts.
    pub native_tool_result_media: bool,
    pub pricing: ModelPricing,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, provider: impl Into<String>, context_window: u64) -> Self {
        let id = id.into();
        let provider = provider.into();
        let native_tool_result_media = matches!(provider.as_str(), "anthropic" | "bedrock");
        Self {
            name: id.clone(),
            pricing: pricing_for_model(&id),
            id,
            provider,
            context_window,
            context_window_override: None,
            default_max_tokens: 4096,
            can_reason: false,
            supports_images: false,
            native_tool_result_media,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_default_max_tokens(mut self, tokens: u64) -> Self {
        self.default_max_tokens = tokens;
        self
    }

    pub fn with_reasoning(mut self, can_reason: bool) -> Self {
        self.can_reason = can_reason;
        self
    }

    pub fn with_images(mut self, supports_images: bool) -> Self {
        self.supports_images = supports_images;
        self
    }

    pub fn with_native_tool_result_media(mut self, native: bool) -> Self {
        self.native_tool_result_media = native;
        self
    }

    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_context_window_override(mut self, window: Option<u64>) -> Self {
        self.context_window_override = window;
        self
    }

    /// Effective context window.
    pub fn context_window(&self) -> u64 {
        self.context_window_override.unwrap_or(self.context_window)
    }
}

/// A selected model: provider handle plus static info.
#[derive(Clone)]
pub struct Model {
    pub handle: Arc<dyn LanguageModel>,
    pub info: ModelInfo,
}

impl Model {
    pub fn new(handle: Arc<dyn LanguageModel>, info: ModelInfo) -> Self {
        Self { handle, info }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("provider", &self.handle.provider())
            .field("model_id", &self.handle.model_id())
            .field("info", &self.info)
            .finish()
    }
}

/// The large/small pair used by the orchestrator.
#[derive(Debug, Clone)]
pub struct Models {
    pub large: Model,
    pub small: Model,
}

// ── Cost extraction ────────────────────────────────────────────────

/// Pulls an authoritative step cost out of one provider's metadata.
pub type CostExtractor = fn(&serde_json::Value) -> Option<f64>;

/// Registry of metadata key → [`CostExtractor`].
#[derive(Clone)]
pub struct CostExtractors {
    extractors: BTreeMap<String, CostExtractor>,
}

impl CostExtractors {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            extractors: BTreeMap::new(),
        }
    }

    pub fn with(mut self, provider: impl Into<String>, extractor: CostExtractor) -> Self {
        self.extractors.insert(provider.into(), extractor);
        self
    }

    /// First cost reported by a registered provider, in key order.
    pub fn extract(&self, metadata: &ProviderMetadata) -> Option<f64> {
        self.extractors
            .iter()
            .find_map(|(provider, extract)| metadata.get(provider).and_then(|v| extract(v)))
    }

    /// Cost for a step: the reported cost when present, else the priced usage.
    pub fn step_cost(&self, pricing: &ModelPricing, usage: &Usage, metadata: &ProviderMetadata) -> f64 {
        self.extract(metadata).unwrap_or_else(|| pricing.cost(usage))
    }
}

impl Default for CostExtractors {
    fn default() -> Self {
        Self::empty().with("openrouter", openrouter_cost)
    }
}

impl fmt::Debug for CostExtractors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.extractors.keys()).finish()
    }
}

fn openrouter_cost(metadata: &serde_json::Value) -> Option<f64> {
    metadata.pointer("/usage/cost").and_then(|v| v.as_f64())
}
