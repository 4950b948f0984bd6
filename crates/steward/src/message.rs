//! Transcript messages and their content parts.
//!
//! A [`Message`] is an ordered log entry with a role and a list of
//! [`ContentPart`]s. Assistant messages are created empty and mutated in
//! place while a step streams in; once a [`Finish`] part is recorded the
//! message is terminal.
//!
//! [`Message::to_prompt_messages`] converts a stored message into the
//! provider-visible [`PromptMessage`] shape.

use crate::provider::{FilePart, PromptMessage, PromptPart, ReasoningMetadata, ToolResultOutput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Generate a unique, roughly time-ordered id such as `msg-18c3f2a9b1c-0001`.
pub fn generate_id(prefix: &str) -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{ts:x}-{count:04x}")
}

// ── Roles and parts ────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// Closed vocabulary of terminal reasons.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    Canceled,
    Error,
    PermissionDenied,
    Unknown,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::EndTurn => "end_turn",
            FinishReason::MaxTokens => "max_tokens",
            FinishReason::ToolUse => "tool_use",
            FinishReason::Canceled => "canceled",
            FinishReason::Error => "error",
            FinishReason::PermissionDenied => "permission_denied",
            FinishReason::Unknown => "unknown",
        }
    }
}

/// The terminal marker of a message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Finish {
    pub reason: FinishReason,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ReasoningContent {
    pub thinking: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ReasoningMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments. Empty while the call is still streaming.
    pub input: String,
    #[serde(default)]
    pub provider_executed: bool,
    pub finished: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
    /// Base64-encoded media payload, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metadata: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn error(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(tool_call_id, name, content)
        }
    }

    pub fn has_media(&self) -> bool {
        !self.data.is_empty() && !self.mime_type.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BinaryContent {
    pub path: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Reasoning(ReasoningContent),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
    Binary(BinaryContent),
    Finish(Finish),
}

/// A file attached to a user turn.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub file_path: String,
    pub file_name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

impl Attachment {
    /// Text attachments are inlined into the prompt; others become file parts.
    pub fn is_text(&self) -> bool {
        is_text_mime(&self.mime_type)
    }
}

fn is_text_mime(mime_type: &str) -> bool {
    mime_type.starts_with("text/")
}

/// Whether any attachment would contribute prompt text.
pub fn contains_text_attachment(attachments: &[Attachment]) -> bool {
    attachments.iter().any(|a| a.is_text() && !a.content.is_empty())
}

const ATTACHED_FILES_NOTE: &str =
    "<system_info>The files below have been attached by the user, consider them in your response</system_info>";

/// Append `<file>` blocks for every text attachment to `prompt`.
pub fn prompt_with_text_attachments(prompt: &str, attachments: &[Attachment]) -> String {
    inline_text_files(
        prompt,
        attachments
            .iter()
            .filter(|a| a.is_text())
            .map(|a| (a.file_path.as_str(), a.content.as_slice())),
    )
}

fn inline_text_files<'a>(prompt: &str, files: impl Iterator<Item = (&'a str, &'a [u8])>) -> String {
    let mut out = prompt.to_string();
    let mut first = true;
    for (path, data) in files {
        if first {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(ATTACHED_FILES_NOTE);
            first = false;
        }
        out.push_str(&format!(
            "\n<file path='{path}'>\n{}\n</file>",
            String::from_utf8_lossy(data)
        ));
    }
    out
}

// ── Message ────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub parts: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
    #[serde(default)]
    pub is_summary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn new(session_id: impl Into<String>, role: MessageRole, parts: Vec<ContentPart>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id("msg"),
            session_id: session_id.into(),
            role,
            parts,
            model: String::new(),
            provider: String::new(),
            is_summary: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Concatenated visible text.
    pub fn content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn reasoning(&self) -> Option<&ReasoningContent> {
        self.parts.iter().find_map(|p| match p {
            ContentPart::Reasoning(r) => Some(r),
            _ => None,
        })
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn tool_results(&self) -> Vec<&ToolResult> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn binary_content(&self) -> Vec<&BinaryContent> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Binary(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    pub fn finish(&self) -> Option<&Finish> {
        self.parts.iter().find_map(|p| match p {
            ContentPart::Finish(f) => Some(f),
            _ => None,
        })
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish().map(|f| f.reason)
    }

    pub fn is_finished(&self) -> bool {
        self.finish().is_some()
    }

    /// Whether the message carries anything a provider would accept back.
    pub fn has_substance(&self) -> bool {
        !self.tool_calls().is_empty()
            || !self.content().trim().is_empty()
            || self.reasoning().is_some_and(|r| !r.thinking.trim().is_empty())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn append_content(&mut self, delta: &str) {
        if let Some(text) = self.parts.iter_mut().find_map(|p| match p {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }) {
            text.push_str(delta);
        } else {
            self.parts.push(ContentPart::Text {
                text: delta.to_string(),
            });
        }
        self.touch();
    }

    pub fn append_reasoning(&mut self, delta: &str) {
        if let Some(r) = self.reasoning_mut() {
            r.thinking.push_str(delta);
        } else {
            self.parts.push(ContentPart::Reasoning(ReasoningContent {
                thinking: delta.to_string(),
                started_at: Some(Utc::now()),
                ..Default::default()
            }));
        }
        self.touch();
    }

    fn reasoning_mut(&mut self) -> Option<&mut ReasoningContent> {
        self.parts.iter_mut().find_map(|p| match p {
            ContentPart::Reasoning(r) => Some(r),
            _ => None,
        })
    }

    /// Attach provider metadata to the reasoning block, creating it if absent.
    pub fn set_reasoning_metadata(&mut self, metadata: ReasoningMetadata) {
        if self.reasoning_mut().is_none() {
            self.append_reasoning("");
        }
        if let Some(r) = self.reasoning_mut() {
            r.metadata = Some(metadata);
        }
        self.touch();
    }

    /// Stamp the end of reasoning. Idempotent.
    pub fn finish_thinking(&mut self) {
        if let Some(r) = self.reasoning_mut()
            && r.finished_at.is_none()
        {
            r.finished_at = Some(Utc::now());
        }
    }

    /// Insert or replace the tool call with the same id.
    pub fn add_tool_call(&mut self, call: ToolCall) {
        if let Some(existing) = self.parts.iter_mut().find_map(|p| match p {
            ContentPart::ToolCall(c) if c.id == call.id => Some(c),
            _ => None,
        }) {
            *existing = call;
        } else {
            self.parts.push(ContentPart::ToolCall(call));
        }
        self.touch();
    }

    /// Replace every tool call part, preserving other parts.
    pub fn set_tool_calls(&mut self, calls: Vec<ToolCall>) {
        self.parts.retain(|p| !matches!(p, ContentPart::ToolCall(_)));
        self.parts.extend(calls.into_iter().map(ContentPart::ToolCall));
        self.touch();
    }

    pub fn add_tool_result(&mut self, result: ToolResult) {
        self.parts.push(ContentPart::ToolResult(result));
        self.touch();
    }

    /// Record the terminal marker, replacing any earlier one.
    pub fn add_finish(&mut self, reason: FinishReason, title: impl Into<String>, detail: impl Into<String>) {
        self.parts.retain(|p| !matches!(p, ContentPart::Finish(_)));
        self.parts.push(ContentPart::Finish(Finish {
            reason,
            time: Utc::now(),
            title: title.into(),
            detail: detail.into(),
        }));
        self.touch();
    }

    /// Convert into provider-visible messages. Assistant messages keep their
    /// reasoning, text and tool calls; tool messages become tool-result parts.
    pub fn to_prompt_messages(&self) -> Vec<PromptMessage> {
        match self.role {
            MessageRole::System => vec![PromptMessage::system(self.content())],
            MessageRole::User => {
                let binaries = self.binary_content();
                let text = inline_text_files(
                    &self.content(),
                    binaries
                        .iter()
                        .filter(|b| is_text_mime(&b.mime_type))
                        .map(|b| (b.path.as_str(), b.data.as_slice())),
                );
                let files = binaries
                    .iter()
                    .filter(|b| !is_text_mime(&b.mime_type))
                    .map(|b| FilePart {
                        filename: b.path.clone(),
                        data: b.data.clone(),
                        media_type: b.mime_type.clone(),
                    })
                    .collect();
                vec![PromptMessage::user_with_files(text, files)]
            }
            MessageRole::Assistant => {
                let mut parts = Vec::new();
                if let Some(r) = self.reasoning()
                    && (!r.thinking.is_empty() || r.metadata.is_some())
                {
                    parts.push(PromptPart::Reasoning {
                        text: r.thinking.clone(),
                        metadata: r.metadata.clone(),
                    });
                }
                let text = self.content();
                if !text.is_empty() {
                    parts.push(PromptPart::Text(text));
                }
                for call in self.tool_calls() {
                    parts.push(PromptPart::ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.input.clone(),
                        provider_executed: call.provider_executed,
                    });
                }
                vec![PromptMessage::new(MessageRole::Assistant, parts)]
            }
            MessageRole::Tool => {
                let parts = self
                    .tool_results()
                    .into_iter()
                    .map(|r| PromptPart::ToolResult {
                        tool_call_id: r.tool_call_id.clone(),
                        output: result_output(r),
                    })
                    .collect();
                vec![PromptMessage::new(MessageRole::Tool, parts)]
            }
        }
    }
}

fn result_output(result: &ToolResult) -> ToolResultOutput {
    if result.is_error {
        ToolResultOutput::Error {
            message: result.content.clone(),
        }
    } else if result.has_media() {
        ToolResultOutput::Media {
            data: result.data.clone(),
            media_type: result.mime_type.clone(),
            text: result.content.clone(),
        }
    } else {
        ToolResultOutput::Text {
            text: result.content.clone(),
        }
    }
}
