//! Prompt-caching hints.
//!
//! When enabled, a stable cache hint is attached to the last tool
//! definition, the last system message that precedes the conversation, and
//! the last two messages of the assembled history. The per-turn
//! dynamic-context message is never hinted because it changes every turn.
//! Setting `STEWARD_DISABLE_CACHE` to a true value turns the policy off.

use crate::provider::{CacheHint, PromptMessage};
use crate::message::MessageRole;
use crate::tools::ToolDefinition;

/// Environment toggle that disables cache hints.
pub const DISABLE_CACHE_ENV: &str = "STEWARD_DISABLE_CACHE";

/// Stable key for providers that cache by key.
pub const DEFAULT_CACHE_KEY: &str = "steward-prompt-cache-v2";

/// Number of trailing history messages that receive a hint.
const TRAILING_HINTED_MESSAGES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub enabled: bool,
    pub cache_key: String,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_key: DEFAULT_CACHE_KEY.to_string(),
        }
    }
}

impl CachePolicy {
    /// Default policy, disabled when the environment toggle is set.
    pub fn from_env() -> Self {
        let disabled = std::env::var(DISABLE_CACHE_ENV)
            .ok()
            .and_then(|v| parse_bool(&v))
            .unwrap_or(false);
        Self {
            enabled: !disabled,
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// The hint to attach, or `None` when disabled.
    pub fn hint(&self) -> Option<CacheHint> {
        self.enabled.then(|| CacheHint {
            cache_key: self.cache_key.clone(),
            ephemeral: true,
        })
    }

    /// Hint the last tool definition.
    pub fn apply_to_tools(&self, tools: &mut [ToolDefinition]) {
        for tool in tools.iter_mut() {
            tool.cache = None;
        }
        if let Some(last) = tools.last_mut() {
            last.cache = self.hint();
        }
    }

    /// Reset hints on `messages` and apply the policy. `exempt` is the index
    /// of the dynamic-context message, which never carries a hint.
    pub fn apply_to_messages(&self, messages: &mut [PromptMessage], exempt: Option<usize>) {
        for msg in messages.iter_mut() {
            msg.cache = None;
        }
        let Some(hint) = self.hint() else { return };

        let first_non_system = messages.iter().position(|m| m.role != MessageRole::System);
        if let Some(first) = first_non_system
            && first > 0
        {
            messages[first - 1].cache = Some(hint.clone());
        }

        let start = messages.len().saturating_sub(TRAILING_HINTED_MESSAGES);
        for msg in &mut messages[start..] {
            msg.cache = Some(hint.clone());
        }

        if let Some(idx) = exempt
            && let Some(msg) = messages.get_mut(idx)
        {
            msg.cache = None;
        }
    }
}

/// Boolean parsing with the usual spellings: 1/0, t/f, true/false.
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn history() -> Vec<PromptMessage> {
        vec![
            PromptMessage::system("base"),
            PromptMessage::system("project rules"),
            PromptMessage::user("<env>cwd</env>"),
            PromptMessage::user("first"),
            PromptMessage::user("second"),
            PromptMessage::user("third"),
        ]
    }

    fn hinted(messages: &[PromptMessage]) -> Vec<usize> {
        messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.cache.is_some())
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn hints_last_system_and_last_two() {
        let mut msgs = history();
        CachePolicy::default().apply_to_messages(&mut msgs, Some(2));
        assert_eq!(hinted(&msgs), vec![1, 4, 5]);
        assert_eq!(msgs[1].cache.as_ref().unwrap().cache_key, DEFAULT_CACHE_KEY);
    }

    #[test]
    fn dynamic_context_stays_exempt_when_trailing() {
        let mut msgs = vec![
            PromptMessage::system("base"),
            PromptMessage::user("<env>cwd</env>"),
            PromptMessage::user("hi"),
        ];
        CachePolicy::default().apply_to_messages(&mut msgs, Some(1));
        assert_eq!(hinted(&msgs), vec![0, 2]);
    }

    #[test]
    fn disabled_policy_clears_hints() {
        let mut msgs = history();
        CachePolicy::default().apply_to_messages(&mut msgs, None);
        CachePolicy::disabled().apply_to_messages(&mut msgs, None);
        assert!(hinted(&msgs).is_empty());
    }

    #[test]
    fn only_last_tool_is_hinted() {
        let mut tools = vec![
            ToolDefinition::new("a", "", json!({})),
            ToolDefinition::new("b", "", json!({})),
        ];
        CachePolicy::default().apply_to_tools(&mut tools);
        assert!(tools[0].cache.is_none());
        assert!(tools[1].cache.as_ref().is_some_and(|h| h.ephemeral));
    }

    #[test]
    fn applying_twice_is_stable() {
        let mut once = history();
        CachePolicy::default().apply_to_messages(&mut once, Some(2));
        let mut twice = once.clone();
        CachePolicy::default().apply_to_messages(&mut twice, Some(2));
        assert_eq!(once, twice);
    }

    #[test]
    fn parse_bool_spellings() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("False"), Some(false));
        assert_eq!(parse_bool("yes"), None);
    }
}
