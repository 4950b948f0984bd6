//! Configuration for the [`SessionAgent`](super::SessionAgent).
//!
//! Every knob has a default matching production behavior. Override
//! through struct fields or the builder methods:
//!
//! ```ignore
//! let config = AgentConfig::from_env()
//!     .with_system_prompt("You are a careful coding assistant.")
//!     .with_max_steps(50)
//!     .with_auto_summarize(false);
//! ```
//!
//! Nested sub-configs can be replaced wholesale:
//!
//! ```ignore
//! let config = AgentConfig {
//!     cache: CachePolicy::disabled(),
//!     tiers: TierConfig::default().with_preserve_keywords(["must", "never"]),
//!     ..AgentConfig::default()
//! };
//! ```

use crate::context::{BudgetConfig, CachePolicy, TierConfig};
use crate::model::CostExtractors;
use std::time::Duration;

/// Title used when no title could be generated.
pub const DEFAULT_SESSION_TITLE: &str = "Untitled Session";

// ── Title config ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleConfig {
    /// Fallback title.
    pub default_title: String,
    /// Output budget for non-reasoning models. Reasoning models use their
    /// own default max tokens instead.
    pub max_output_tokens: u64,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            default_title: DEFAULT_SESSION_TITLE.to_string(),
            max_output_tokens: 40,
        }
    }
}

// ── Agent config ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Initial system prompt.
    pub system_prompt: String,
    /// Extra system message prepended to every request, never cached.
    pub system_prompt_prefix: String,
    /// Marks agents driving delegated sub-tasks. Reported in events.
    pub is_sub_agent: bool,
    /// Upper bound on generation steps in one turn.
    pub max_steps: u32,
    /// Output token cap per step. `None` defers to the model default.
    pub max_output_tokens: Option<u64>,
    pub budget: BudgetConfig,
    pub cache: CachePolicy,
    pub tiers: TierConfig,
    pub title: TitleConfig,
    pub costs: CostExtractors,
    /// Ceiling on how long `cancel_all` waits for sessions to go idle.
    pub cancel_all_timeout: Duration,
    pub cancel_all_poll_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            system_prompt_prefix: String::new(),
            is_sub_agent: false,
            max_steps: 200,
            max_output_tokens: None,
            budget: BudgetConfig::default(),
            cache: CachePolicy::default(),
            tiers: TierConfig::default(),
            title: TitleConfig::default(),
            costs: CostExtractors::default(),
            cancel_all_timeout: Duration::from_secs(5),
            cancel_all_poll_interval: Duration::from_millis(200),
        }
    }
}

impl AgentConfig {
    /// Defaults with environment toggles applied.
    pub fn from_env() -> Self {
        Self {
            cache: CachePolicy::from_env(),
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_system_prompt_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.system_prompt_prefix = prefix.into();
        self
    }

    pub fn with_sub_agent(mut self, is_sub_agent: bool) -> Self {
        self.is_sub_agent = is_sub_agent;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u64) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn with_auto_summarize(mut self, enabled: bool) -> Self {
        self.budget.disable_auto_summarize = !enabled;
        self
    }

    pub fn with_cache(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_tiers(mut self, tiers: TierConfig) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_costs(mut self, costs: CostExtractors) -> Self {
        self.costs = costs;
        self
    }

    pub fn with_cancel_all_timeout(mut self, timeout: Duration) -> Self {
        self.cancel_all_timeout = timeout;
        self
    }
}
