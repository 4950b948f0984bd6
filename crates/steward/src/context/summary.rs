//! Tier-aware compaction prompt and summarization bookkeeping.
//!
//! The summarization call runs with [`SUMMARY_SYSTEM_PROMPT`], no tools, the
//! reconstructed history, and a final user message produced by
//! [`SummaryPromptBuilder::build`]. The prompt quotes Tier-1 messages,
//! gives compression rules for Tier 2, states the Tier-3 discard count, and
//! lists the files, tools and open tasks mined from the transcript.

use super::tiers::{DEFAULT_PRESERVE_EXCERPT_CHARS, TieredContext};
use super::truncate_chars;
use crate::session::Todo;
use std::fmt::Write as _;

/// System prompt of the summarization call.
pub const SUMMARY_SYSTEM_PROMPT: &str = "\
You are a helpful AI assistant tasked with summarizing conversations so that \
work can resume in a fresh context.

When asked to summarize, produce a detailed but concise summary of the \
conversation so far. The summary replaces the full history, so everything \
the next assistant needs to continue must be in it:
- What the user asked for, in their own words where it matters.
- What has been done, what is in progress, and what remains.
- Files read, created or modified, with paths and relevant line numbers.
- Commands run, decisions taken and the reasons behind them.
- Any open problems or errors that still need attention.

Only include facts stated in the conversation. Preserve file paths, function \
names and error messages verbatim.";

/// Prompt used to re-queue a turn interrupted by auto-summarization.
pub fn continuation_prompt(original_prompt: &str) -> String {
    format!(
        "The previous session was interrupted because it got too long, the initial user request was: `{original_prompt}`"
    )
}

/// Render a task list as `- [status] content` lines.
pub fn render_todos(todos: &[Todo]) -> String {
    let mut out = String::new();
    for todo in todos {
        let _ = writeln!(out, "- [{}] {}", todo.status, todo.content);
    }
    out
}

#[derive(Debug, Clone)]
pub struct SummaryPromptBuilder {
    excerpt_chars: usize,
}

impl Default for SummaryPromptBuilder {
    fn default() -> Self {
        Self {
            excerpt_chars: DEFAULT_PRESERVE_EXCERPT_CHARS,
        }
    }
}

impl SummaryPromptBuilder {
    pub fn new(excerpt_chars: usize) -> Self {
        Self { excerpt_chars }
    }

    /// Render the compaction prompt. Output is a pure function of the
    /// tiered context and the task list.
    pub fn build(&self, todos: &[Todo], ctx: &TieredContext) -> String {
        let mut sb = String::new();

        sb.push_str("You are summarizing a conversation with TIERED COMPRESSION.\n\n");
        sb.push_str("## COMPRESSION RULES\n\n");

        sb.push_str("### TIER 1 - PRESERVE (Do NOT summarize these):\n");
        for msg in &ctx.preserve {
            let text = msg.content();
            sb.push_str("- ");
            if text.chars().count() > self.excerpt_chars {
                sb.push_str(&truncate_chars(&text, self.excerpt_chars));
                sb.push_str("...");
            } else {
                sb.push_str(&text);
            }
            sb.push('\n');
        }

        sb.push_str("\n### TIER 2 - COMPRESS (Extract key info):\n");
        sb.push_str("- Tool calls: Preserve the tool name + purpose, compress result\n");
        sb.push_str("- Exploration: Summarize as 'Searched X, found Y'\n");
        sb.push_str("- Decisions: Capture what was decided and why\n");

        sb.push_str("\n### TIER 3 - DISCARD (Omit from summary):\n");
        let _ = writeln!(
            sb,
            "- {} messages with verbose/duplicate content omitted",
            ctx.discard.len()
        );

        let files = ctx.unique_file_operations();
        if !files.is_empty() {
            sb.push_str("\n## FILES ACCESSED\n\n");
            for op in files {
                let _ = writeln!(sb, "- {}: {}", op.action, op.path);
            }
        }

        let counts = ctx.tool_counts();
        if !counts.is_empty() {
            sb.push_str("\n## TOOLS USED\n\n");
            for (name, count) in counts {
                let _ = writeln!(sb, "- {name} ({count} times)");
            }
        }

        if !ctx.key_decisions.is_empty() {
            sb.push_str("\n## KEY DECISIONS\n\n");
            for decision in &ctx.key_decisions {
                let _ = writeln!(sb, "- {decision}");
            }
        }

        if !todos.is_empty() {
            sb.push_str("\n## CURRENT TODO LIST\n\n");
            sb.push_str(&render_todos(todos));
            sb.push_str("\nInclude these tasks in your summary. ");
            sb.push_str("Instruct the resuming assistant to use the `todos` tool.\n");
        }

        sb.push_str("\n## SUMMARY SECTIONS\n\n");
        sb.push_str("1. **Original Request** - The exact user request (from TIER 1)\n");
        sb.push_str("2. **Current State** - Progress, what's done, what's in progress\n");
        sb.push_str("3. **Files & Changes** - Files modified/read with line numbers\n");
        sb.push_str("4. **Technical Context** - Decisions, patterns, commands\n");
        sb.push_str("5. **Next Steps** - Specific, actionable next steps\n\n");

        sb.push_str("**Tone**: Brief a teammate taking over. No emojis. Be thorough but concise.\n");
        sb
    }
}

/// What a summarization pass compressed and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummarizationLog {
    pub messages_summarized: usize,
    pub tool_calls_compressed: usize,
    pub files_referenced: Vec<String>,
    pub key_decisions: Vec<String>,
    pub discarded_count: usize,
}

impl SummarizationLog {
    pub fn from_context(ctx: &TieredContext) -> Self {
        Self {
            messages_summarized: ctx.compress.len(),
            tool_calls_compressed: ctx.tool_summaries.len(),
            files_referenced: ctx
                .unique_file_operations()
                .into_iter()
                .map(|op| op.path.clone())
                .collect(),
            key_decisions: ctx.key_decisions.clone(),
            discarded_count: ctx.discard.len(),
        }
    }
}

/// One-line digest of a tool result.
pub fn compress_tool_result(tool_name: &str, content: &str, is_error: bool) -> String {
    if is_error {
        return format!("[ERROR] {tool_name}: failed");
    }
    if content.chars().count() <= 200 {
        return content.to_string();
    }
    match content.lines().next() {
        Some(first) if first.chars().count() <= 200 => format!("{first}..."),
        _ => format!("{}...", truncate_chars(content, 197)),
    }
}
