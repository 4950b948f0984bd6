//! Context window management: budget, caching, tiers and summarization.
//!
//! 1. **[`budget`]**: [`StopBudgetEvaluator`] decides after each step whether
//!    the remaining window is small enough to stop and summarize.
//!
//! 2. **[`cache`]**: [`CachePolicy`] places provider prompt-caching hints on
//!    the stable prefix and the tail of the history.
//!
//! 3. **[`tiers`]**: [`TieredClassifier`] splits a transcript into
//!    preserve / compress / discard buckets and mines tool activity.
//!
//! 4. **[`summary`]**: [`SummaryPromptBuilder`] renders the tier-aware
//!    compaction prompt that the summarization call runs with.
//!
//! 5. **[`dynamic`]**: the per-turn `<env>` block, kept out of the cached
//!    prefix.

pub mod budget;
pub mod cache;
pub mod dynamic;
pub mod summary;
pub mod tiers;

pub use budget::{BudgetConfig, BudgetDecision, BudgetUsage, StopBudgetEvaluator};
pub use cache::CachePolicy;
pub use dynamic::{CacheablePrompt, DynamicContext, split_cacheable_prompt};
pub use summary::{
    SUMMARY_SYSTEM_PROMPT, SummarizationLog, SummaryPromptBuilder, compress_tool_result, continuation_prompt,
};
pub use tiers::{Tier, TierConfig, TierStats, TieredClassifier, TieredContext};

/// First `max` characters of `s`.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
