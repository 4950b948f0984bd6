//! Importance tiers for summarization.
//!
//! Every transcript message lands in exactly one tier:
//!
//! - **Tier 1 (preserve)**: the first user message, and user messages that
//!   contain a requirement keyword. Quoted verbatim in the compaction prompt.
//! - **Tier 3 (discard)**: tool messages with an error result or with a
//!   result longer than the verbose threshold.
//! - **Tier 2 (compress)**: everything else. Tool activity in this tier is
//!   mined for tool-usage counts, touched files and key decisions.
//!
//! Classification depends only on a message's role and content plus whether
//! it is the first user message, so it is deterministic for a given
//! transcript.

use super::truncate_chars;
use crate::message::{Message, MessageRole};
use std::collections::BTreeMap;
use std::fmt;

/// Default keywords that promote a user message to Tier 1.
pub const DEFAULT_PRESERVE_KEYWORDS: &[&str] = &[
    "require",
    "must",
    "need to",
    "important",
    "critical",
    "don't",
    "do not",
    "never",
    "always",
    "essential",
    "constraint",
    "spec",
];

/// Tool results longer than this (in characters) are Tier 3.
pub const DEFAULT_VERBOSE_RESULT_CHARS: usize = 3_000;

/// Tier-1 messages are quoted up to this many characters.
pub const DEFAULT_PRESERVE_EXCERPT_CHARS: usize = 500;

/// Tool-name fragments that mark a file-oriented tool.
const FILE_TOOLS: &[&str] = &["view", "write", "edit", "multiedit", "glob", "grep", "ls"];

/// Extracted paths are capped at this many characters.
const MAX_PATH_CHARS: usize = 100;

/// Key-decision lines are capped at this many characters.
const MAX_DECISION_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Preserve = 1,
    Compress = 2,
    Discard = 3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierConfig {
    /// Lowercase substrings that promote a user message to Tier 1.
    pub preserve_keywords: Vec<String>,
    pub verbose_result_chars: usize,
    pub preserve_excerpt_chars: usize,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            preserve_keywords: DEFAULT_PRESERVE_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            verbose_result_chars: DEFAULT_VERBOSE_RESULT_CHARS,
            preserve_excerpt_chars: DEFAULT_PRESERVE_EXCERPT_CHARS,
        }
    }
}

impl TierConfig {
    pub fn with_preserve_keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.preserve_keywords = keywords.into_iter().map(|k| k.into().to_lowercase()).collect();
        self
    }

    pub fn with_verbose_result_chars(mut self, chars: usize) -> Self {
        self.verbose_result_chars = chars;
        self
    }
}

// ── Extracted metadata ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Created,
    Modified,
    Read,
    Searched,
    Listed,
    Accessed,
}

impl FileAction {
    /// Infer the action from a tool name.
    pub fn from_tool_name(name: &str) -> Self {
        let name = name.to_lowercase();
        if name.contains("write") {
            FileAction::Created
        } else if name.contains("edit") {
            FileAction::Modified
        } else if name.contains("view") {
            FileAction::Read
        } else if name.contains("glob") || name.contains("grep") {
            FileAction::Searched
        } else if name.contains("ls") {
            FileAction::Listed
        } else {
            FileAction::Accessed
        }
    }
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileAction::Created => "created",
            FileAction::Modified => "modified",
            FileAction::Read => "read",
            FileAction::Searched => "searched",
            FileAction::Listed => "listed",
            FileAction::Accessed => "accessed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSummary {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOperation {
    /// Best-effort path; empty when none could be found.
    pub path: String,
    pub action: FileAction,
}

/// Message counts per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TierStats {
    pub preserve: usize,
    pub compress: usize,
    pub discard: usize,
}

impl fmt::Display for TierStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Preserved: {}, Compressed: {}, Discarded: {}",
            self.preserve, self.compress, self.discard
        )
    }
}

/// A transcript split into tiers, plus metadata mined from Tier 2.
#[derive(Debug, Clone, Default)]
pub struct TieredContext {
    pub preserve: Vec<Message>,
    pub compress: Vec<Message>,
    pub discard: Vec<Message>,
    pub tool_summaries: Vec<ToolSummary>,
    pub file_operations: Vec<FileOperation>,
    pub key_decisions: Vec<String>,
}

impl TieredContext {
    pub fn stats(&self) -> TierStats {
        TierStats {
            preserve: self.preserve.len(),
            compress: self.compress.len(),
            discard: self.discard.len(),
        }
    }

    /// "Preserved: N, Compressed: N, Discarded: N".
    pub fn format_stats(&self) -> String {
        self.stats().to_string()
    }

    /// File operations with a non-empty path, first occurrence per path.
    pub fn unique_file_operations(&self) -> Vec<&FileOperation> {
        let mut seen = std::collections::HashSet::new();
        self.file_operations
            .iter()
            .filter(|op| !op.path.is_empty() && seen.insert(op.path.as_str()))
            .collect()
    }

    /// Call counts per tool name, sorted by name.
    pub fn tool_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for summary in &self.tool_summaries {
            *counts.entry(summary.name.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

// ── Classifier ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct TieredClassifier {
    config: TierConfig,
}

impl TieredClassifier {
    pub fn new(config: TierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    /// Tier of a single message.
    pub fn classify(&self, msg: &Message, is_first_user: bool) -> Tier {
        match msg.role {
            MessageRole::User => {
                if is_first_user {
                    return Tier::Preserve;
                }
                let text = msg.content().to_lowercase();
                if self
                    .config
                    .preserve_keywords
                    .iter()
                    .any(|kw| text.contains(kw.as_str()))
                {
                    return Tier::Preserve;
                }
                Tier::Compress
            }
            MessageRole::Tool => {
                let results = msg.tool_results();
                let noisy = results.iter().any(|r| r.is_error)
                    || results
                        .iter()
                        .any(|r| r.content.chars().count() > self.config.verbose_result_chars);
                if noisy { Tier::Discard } else { Tier::Compress }
            }
            MessageRole::System | MessageRole::Assistant => Tier::Compress,
        }
    }

    /// Classify a whole transcript, preserving order within each tier.
    pub fn prepare(&self, messages: &[Message]) -> TieredContext {
        let mut ctx = TieredContext::default();
        let first_user = messages.iter().position(|m| m.role == MessageRole::User);

        for (i, msg) in messages.iter().enumerate() {
            match self.classify(msg, Some(i) == first_user) {
                Tier::Preserve => ctx.preserve.push(msg.clone()),
                Tier::Compress => {
                    extract_tool_info(&mut ctx, msg);
                    ctx.compress.push(msg.clone());
                }
                Tier::Discard => ctx.discard.push(msg.clone()),
            }
        }
        ctx
    }
}

fn extract_tool_info(ctx: &mut TieredContext, msg: &Message) {
    match msg.role {
        MessageRole::Assistant => {
            for call in msg.tool_calls() {
                ctx.tool_summaries.push(ToolSummary {
                    name: call.name.clone(),
                });
            }
            for line in msg.content().lines().map(str::trim) {
                let lower = line.to_lowercase();
                if lower.starts_with("decision:") || lower.contains("decided to") {
                    ctx.key_decisions.push(truncate_chars(line, MAX_DECISION_CHARS));
                }
            }
        }
        MessageRole::Tool => {
            for result in msg.tool_results() {
                if is_file_tool(&result.name) {
                    ctx.file_operations.push(FileOperation {
                        path: extract_file_path(&result.content),
                        action: FileAction::from_tool_name(&result.name),
                    });
                }
            }
        }
        _ => {}
    }
}

/// Whether a tool name looks file-oriented.
pub fn is_file_tool(name: &str) -> bool {
    let name = name.to_lowercase();
    FILE_TOOLS.iter().any(|t| name.contains(t))
}

/// First path-shaped line of a tool output, else a short first line.
pub fn extract_file_path(content: &str) -> String {
    for line in content.lines().map(str::trim) {
        if line.starts_with('/') || line.starts_with("./") || line.starts_with("~/") {
            return truncate_chars(line, MAX_PATH_CHARS);
        }
    }
    match content.lines().next() {
        Some(first) if first.chars().count() < MAX_PATH_CHARS => first.trim().to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ContentPart, ToolCall, ToolResult};

    fn user(text: &str) -> Message {
        Message::new("s", MessageRole::User, vec![ContentPart::Text { text: text.into() }])
    }

    fn assistant_calls(names: &[&str]) -> Message {
        let parts = names
            .iter()
            .enumerate()
            .map(|(i, n)| {
                ContentPart::ToolCall(ToolCall {
                    id: format!("c{i}"),
                    name: n.to_string(),
                    finished: true,
                    ..Default::default()
                })
            })
            .collect();
        Message::new("s", MessageRole::Assistant, parts)
    }

    fn tool(result: ToolResult) -> Message {
        Message::new("s", MessageRole::Tool, vec![ContentPart::ToolResult(result)])
    }

    #[test]
    fn first_user_message_is_always_preserved() {
        let c = TieredClassifier::default();
        let msgs = vec![user("hello there"), user("thanks")];
        let ctx = c.prepare(&msgs);
        assert_eq!(ctx.preserve.len(), 1);
        assert_eq!(ctx.preserve[0].content(), "hello there");
        assert_eq!(ctx.compress.len(), 1);
    }

    #[test]
    fn first_user_found_after_system_message() {
        let c = TieredClassifier::default();
        let sys = Message::new("s", MessageRole::System, vec![ContentPart::Text { text: "x".into() }]);
        let ctx = c.prepare(&[sys, user("plain request")]);
        assert_eq!(ctx.stats(), TierStats { preserve: 1, compress: 1, discard: 0 });
    }

    #[test]
    fn keyword_promotes_user_message() {
        let c = TieredClassifier::default();
        assert_eq!(c.classify(&user("You MUST keep the API stable"), false), Tier::Preserve);
        assert_eq!(c.classify(&user("looks good"), false), Tier::Compress);
    }

    #[test]
    fn keyword_list_is_configurable() {
        let c = TieredClassifier::new(TierConfig::default().with_preserve_keywords(["Deadline"]));
        assert_eq!(c.classify(&user("the deadline is friday"), false), Tier::Preserve);
        assert_eq!(c.classify(&user("you must hurry"), false), Tier::Compress);
    }

    #[test]
    fn verbose_boundary_is_exclusive() {
        let c = TieredClassifier::default();
        let at = tool(ToolResult::text("c1", "bash", "x".repeat(3_000)));
        let over = tool(ToolResult::text("c1", "bash", "x".repeat(3_001)));
        assert_eq!(c.classify(&at, false), Tier::Compress);
        assert_eq!(c.classify(&over, false), Tier::Discard);
    }

    #[test]
    fn error_result_is_discarded_even_with_keywords() {
        let c = TieredClassifier::default();
        let msg = tool(ToolResult::error("c1", "bash", "critical: you must never do this"));
        assert_eq!(c.classify(&msg, false), Tier::Discard);
    }

    #[test]
    fn tiers_are_disjoint_and_order_preserving() {
        let c = TieredClassifier::default();
        let msgs = vec![
            user("build it"),
            assistant_calls(&["view"]),
            tool(ToolResult::text("c0", "view", "/src/main.rs\nfn main() {}")),
            user("important: keep tests"),
            tool(ToolResult::error("c1", "bash", "fail")),
            user("ok"),
        ];
        let ctx = c.prepare(&msgs);
        let total = ctx.preserve.len() + ctx.compress.len() + ctx.discard.len();
        assert_eq!(total, msgs.len());
        let preserved: Vec<String> = ctx.preserve.iter().map(|m| m.content()).collect();
        assert_eq!(preserved, vec!["build it", "important: keep tests"]);
        assert_eq!(ctx.compress.last().unwrap().content(), "ok");
    }

    #[test]
    fn extracts_tools_files_and_decisions() {
        let c = TieredClassifier::default();
        let mut reply = assistant_calls(&["view", "grep", "view"]);
        reply.append_content("Decision: use tokio for the runtime.\nOther text.");
        let msgs = vec![
            user("start"),
            reply,
            tool(ToolResult::text("c0", "view", "/src/lib.rs\ncontents")),
            tool(ToolResult::text("c1", "grep", "./src/a.rs:3: match")),
            tool(ToolResult::text("c2", "bash", "/usr/bin/ok")),
        ];
        let ctx = c.prepare(&msgs);
        let counts = ctx.tool_counts();
        assert_eq!(counts.get("view"), Some(&2));
        assert_eq!(counts.get("grep"), Some(&1));
        assert_eq!(ctx.file_operations.len(), 2);
        assert_eq!(ctx.file_operations[0].path, "/src/lib.rs");
        assert_eq!(ctx.file_operations[0].action, FileAction::Read);
        assert_eq!(ctx.file_operations[1].action, FileAction::Searched);
        assert_eq!(ctx.key_decisions, vec!["Decision: use tokio for the runtime."]);
    }

    #[test]
    fn file_path_extraction_rules() {
        assert_eq!(extract_file_path("Listing\n  ~/proj/file.rs  \n"), "~/proj/file.rs");
        let long = format!("/{}", "a".repeat(150));
        assert_eq!(extract_file_path(&long).chars().count(), 100);
        assert_eq!(extract_file_path("no path here"), "no path here");
        assert_eq!(extract_file_path(&"b".repeat(120)), "");
    }

    #[test]
    fn file_actions_from_tool_names() {
        assert_eq!(FileAction::from_tool_name("write"), FileAction::Created);
        assert_eq!(FileAction::from_tool_name("multiedit"), FileAction::Modified);
        assert_eq!(FileAction::from_tool_name("glob"), FileAction::Searched);
        assert_eq!(FileAction::from_tool_name("ls"), FileAction::Listed);
        assert_eq!(FileAction::from_tool_name("fetch"), FileAction::Accessed);
        assert!(is_file_tool("View"));
        assert!(!is_file_tool("bash"));
    }

    #[test]
    fn unique_file_operations_dedupes_by_path() {
        let ctx = TieredContext {
            file_operations: vec![
                FileOperation { path: "/a".into(), action: FileAction::Read },
                FileOperation { path: "/a".into(), action: FileAction::Modified },
                FileOperation { path: String::new(), action: FileAction::Listed },
            ],
            ..Default::default()
        };
        let ops = ctx.unique_file_operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].action, FileAction::Read);
    }

    #[test]
    fn format_stats_string() {
        let ctx = TieredClassifier::default().prepare(&[user("a"), user("b")]);
        assert_eq!(ctx.format_stats(), "Preserved: 1, Compressed: 1, Discarded: 0");
    }
}
