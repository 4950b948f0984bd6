//! Stop-for-summary decision made after every generation step.
//!
//! `remaining = context_window - (prompt_tokens + completion_tokens)` is
//! compared against a threshold: a fixed buffer for large windows, a fixed
//! fraction of the window otherwise. Summarization always restores headroom,
//! so the decision is a single comparison with no hysteresis.

use crate::session::Session;

/// Windows at or above this size use the absolute buffer.
pub const LARGE_CONTEXT_WINDOW_THRESHOLD: u64 = 200_000;
/// Headroom kept free on large windows.
pub const LARGE_CONTEXT_WINDOW_BUFFER: u64 = 20_000;
/// Fraction of the window kept free on small windows.
pub const SMALL_CONTEXT_WINDOW_RATIO: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetConfig {
    pub large_window_threshold: u64,
    pub large_window_buffer: u64,
    pub small_window_ratio: f64,
    /// Never request a stop, regardless of usage.
    pub disable_auto_summarize: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            large_window_threshold: LARGE_CONTEXT_WINDOW_THRESHOLD,
            large_window_buffer: LARGE_CONTEXT_WINDOW_BUFFER,
            small_window_ratio: SMALL_CONTEXT_WINDOW_RATIO,
            disable_auto_summarize: false,
        }
    }
}

/// Outcome of a budget check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    Continue,
    StopForSummary,
}

/// Snapshot of the numbers behind a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetUsage {
    pub context_window: u64,
    pub used_tokens: u64,
    pub remaining_tokens: u64,
    pub threshold: u64,
}

impl BudgetUsage {
    pub fn usage_pct(&self) -> f64 {
        if self.context_window == 0 {
            return 100.0;
        }
        self.used_tokens as f64 / self.context_window as f64 * 100.0
    }

    /// Format as a short log string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: {}/{} tokens ({:.1}%), remaining {} (threshold {})",
            self.used_tokens,
            self.context_window,
            self.usage_pct(),
            self.remaining_tokens,
            self.threshold,
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct StopBudgetEvaluator {
    config: BudgetConfig,
}

impl StopBudgetEvaluator {
    pub fn new(config: BudgetConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Headroom that must stay free for a given window.
    pub fn threshold(&self, context_window: u64) -> u64 {
        if context_window >= self.config.large_window_threshold {
            self.config.large_window_buffer
        } else {
            (context_window as f64 * self.config.small_window_ratio) as u64
        }
    }

    pub fn usage(&self, context_window: u64, prompt_tokens: u64, completion_tokens: u64) -> BudgetUsage {
        let used_tokens = prompt_tokens + completion_tokens;
        BudgetUsage {
            context_window,
            used_tokens,
            remaining_tokens: context_window.saturating_sub(used_tokens),
            threshold: self.threshold(context_window),
        }
    }

    /// Decide from raw counters.
    pub fn decide(&self, context_window: u64, prompt_tokens: u64, completion_tokens: u64) -> BudgetDecision {
        let usage = self.usage(context_window, prompt_tokens, completion_tokens);
        if usage.remaining_tokens <= usage.threshold && !self.config.disable_auto_summarize {
            BudgetDecision::StopForSummary
        } else {
            BudgetDecision::Continue
        }
    }

    /// Decide from a session's latest usage.
    pub fn evaluate(&self, context_window: u64, session: &Session) -> BudgetDecision {
        self.decide(context_window, session.prompt_tokens, session.completion_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_window_uses_absolute_buffer() {
        let eval = StopBudgetEvaluator::default();
        assert_eq!(eval.threshold(200_000), 20_000);
        assert_eq!(
            eval.decide(200_000, 150_000, 35_000),
            BudgetDecision::StopForSummary
        );
        assert_eq!(eval.decide(200_000, 150_000, 29_000), BudgetDecision::Continue);
    }

    #[test]
    fn remaining_equal_to_threshold_stops() {
        let eval = StopBudgetEvaluator::default();
        assert_eq!(eval.decide(200_000, 180_000, 0), BudgetDecision::StopForSummary);
        assert_eq!(eval.decide(200_000, 179_999, 0), BudgetDecision::Continue);
    }

    #[test]
    fn small_window_uses_ratio() {
        let eval = StopBudgetEvaluator::default();
        assert_eq!(eval.threshold(100_000), 20_000);
        assert_eq!(eval.threshold(128_000), 25_600);
        assert_eq!(eval.decide(128_000, 100_000, 3_000), BudgetDecision::StopForSummary);
        assert_eq!(eval.decide(128_000, 100_000, 2_000), BudgetDecision::Continue);
    }

    #[test]
    fn overflow_counts_as_zero_remaining() {
        let eval = StopBudgetEvaluator::default();
        let usage = eval.usage(8_000, 9_000, 500);
        assert_eq!(usage.remaining_tokens, 0);
        assert_eq!(eval.decide(8_000, 9_000, 500), BudgetDecision::StopForSummary);
    }

    #[test]
    fn disabled_auto_summarize_never_stops() {
        let eval = StopBudgetEvaluator::new(BudgetConfig {
            disable_auto_summarize: true,
            ..Default::default()
        });
        assert_eq!(eval.decide(200_000, 199_000, 1_000), BudgetDecision::Continue);
    }

    #[test]
    fn log_string_mentions_threshold() {
        let usage = StopBudgetEvaluator::default().usage(200_000, 100_000, 0);
        let s = usage.to_log_string();
        assert!(s.contains("100000/200000"));
        assert!(s.contains("threshold 20000"));
    }
}
