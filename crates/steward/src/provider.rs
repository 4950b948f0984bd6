//! Model provider contract: one streamed generation step per call.
//!
//! A [`LanguageModel`] turns a [`StreamRequest`] into a stream of
//! [`StreamEvent`]s that ends with [`StreamEvent::StepFinish`]. Vendor wire
//! formats live behind implementations of this trait; the orchestrator only
//! sees the provider-neutral event vocabulary defined here.
//!
//! [`collect_step`] drains a stream into a [`StepOutcome`] for one-shot
//! generations (titles, follow-up suggestions) that are not persisted
//! incrementally.

use crate::error::{AgentError, ProviderError};
use crate::message::MessageRole;
use crate::tools::ToolDefinition;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Boxed stream of provider events for a single generation step.
pub type EventStream<'a> = BoxStream<'a, Result<StreamEvent, ProviderError>>;

/// Provider-specific request options, keyed by provider id.
pub type ProviderOptions = BTreeMap<String, serde_json::Value>;

/// A streaming language model.
pub trait LanguageModel: Send + Sync {
    /// Provider id, e.g. `"anthropic"` or `"openrouter"`.
    fn provider(&self) -> &str;

    /// Model id as understood by the provider.
    fn model_id(&self) -> &str;

    /// Start one generation step.
    ///
    /// The returned stream must end with exactly one
    /// [`StreamEvent::StepFinish`] on success.
    fn stream(&self, request: StreamRequest) -> EventStream<'_>;
}

// ── Request types ──────────────────────────────────────────────────

/// Prompt-caching hint attached to a message or tool definition.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CacheHint {
    /// Stable key for providers that cache by key.
    pub cache_key: String,
    /// Request an ephemeral cache breakpoint (Anthropic-style providers).
    pub ephemeral: bool,
}

/// A provider-visible message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PromptMessage {
    pub role: MessageRole,
    pub parts: Vec<PromptPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheHint>,
}

impl PromptMessage {
    pub fn new(role: MessageRole, parts: Vec<PromptPart>) -> Self {
        Self {
            role,
            parts,
            cache: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageRole::System, vec![PromptPart::Text(text.into())])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, vec![PromptPart::Text(text.into())])
    }

    /// A user message with text followed by file parts.
    pub fn user_with_files(text: impl Into<String>, files: Vec<FilePart>) -> Self {
        let mut parts = vec![PromptPart::Text(text.into())];
        parts.extend(files.into_iter().map(PromptPart::File));
        Self::new(MessageRole::User, parts)
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                PromptPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// A binary file sent alongside a message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FilePart {
    pub filename: String,
    pub data: Vec<u8>,
    pub media_type: String,
}

/// One part of a [`PromptMessage`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PromptPart {
    Text(String),
    Reasoning {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<ReasoningMetadata>,
    },
    File(FilePart),
    ToolCall {
        id: String,
        name: String,
        input: String,
        provider_executed: bool,
    },
    ToolResult {
        tool_call_id: String,
        output: ToolResultOutput,
    },
}

/// The output carried by a tool-result part.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolResultOutput {
    Text { text: String },
    Error { message: String },
    /// Base64-encoded media with optional accompanying text.
    Media {
        data: String,
        media_type: String,
        text: String,
    },
}

/// Everything a provider needs for one generation step.
#[derive(Clone, Debug, Default)]
pub struct StreamRequest {
    /// Full history including system messages.
    pub messages: Vec<PromptMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_output_tokens: Option<u64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub provider_options: ProviderOptions,
}

// ── Stream events ──────────────────────────────────────────────────

/// Why the provider ended a step, in the provider's own vocabulary.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other,
    #[default]
    Unknown,
}

/// Token usage reported for a step (or summed over a run).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
        self.reasoning_tokens += rhs.reasoning_tokens;
        self.cache_creation_tokens += rhs.cache_creation_tokens;
        self.cache_read_tokens += rhs.cache_read_tokens;
    }
}

/// Provider-specific metadata attached to reasoning blocks.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ReasoningMetadata {
    /// Signed thinking block.
    Anthropic { signature: String },
    /// Thought signature bound to a tool call.
    Google { signature: String, tool_id: String },
    /// Opaque reasoning item from the responses API.
    OpenAiResponses { item: serde_json::Value },
}

/// Free-form per-provider metadata returned with a step.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ProviderMetadata(pub BTreeMap<String, serde_json::Value>);

impl ProviderMetadata {
    pub fn get(&self, provider: &str) -> Option<&serde_json::Value> {
        self.0.get(provider)
    }

    pub fn with(mut self, provider: impl Into<String>, value: serde_json::Value) -> Self {
        self.0.insert(provider.into(), value);
        self
    }
}

/// An event emitted by a provider stream.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    ReasoningStart {
        id: String,
        text: String,
    },
    ReasoningDelta {
        id: String,
        text: String,
    },
    ReasoningEnd {
        id: String,
        metadata: Option<ReasoningMetadata>,
    },
    TextDelta {
        id: String,
        text: String,
    },
    /// The model started emitting arguments for a tool call.
    ToolInputStart {
        id: String,
        name: String,
    },
    /// The tool call is complete.
    ToolCall {
        id: String,
        name: String,
        input: String,
        provider_executed: bool,
    },
    /// A result for a tool the provider executed itself.
    ToolResult {
        tool_call_id: String,
        name: String,
        output: ToolResultOutput,
    },
    StepFinish {
        finish_reason: ProviderFinishReason,
        usage: Usage,
        provider_metadata: ProviderMetadata,
    },
}

// ── One-shot collection ────────────────────────────────────────────

/// Collected output of a step that is not streamed into the transcript.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub text: String,
    pub reasoning: String,
    pub finish_reason: ProviderFinishReason,
    pub usage: Usage,
    pub provider_metadata: ProviderMetadata,
}

/// Drain a provider stream, racing `cancel`.
pub async fn collect_step(
    mut stream: EventStream<'_>,
    cancel: &CancellationToken,
) -> Result<StepOutcome, AgentError> {
    let mut outcome = StepOutcome::default();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Canceled),
            next = stream.next() => next,
        };
        let Some(event) = next else { break };
        match event? {
            StreamEvent::TextDelta { text, .. } => outcome.text.push_str(&text),
            StreamEvent::ReasoningStart { text, .. } | StreamEvent::ReasoningDelta { text, .. } => {
                outcome.reasoning.push_str(&text)
            }
            StreamEvent::StepFinish {
                finish_reason,
                usage,
                provider_metadata,
            } => {
                outcome.finish_reason = finish_reason;
                outcome.usage = usage;
                outcome.provider_metadata = provider_metadata;
            }
            other => trace!("Ignoring event in one-shot step: {other:?}"),
        }
    }
    debug!(
        "One-shot step collected: {} chars text, {} output tokens",
        outcome.text.len(),
        outcome.usage.output_tokens
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(items: Vec<Result<StreamEvent, ProviderError>>) -> EventStream<'static> {
        futures::stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn collect_text_reasoning_and_usage() {
        let stream = events(vec![
            Ok(StreamEvent::ReasoningDelta {
                id: "r".into(),
                text: "hmm".into(),
            }),
            Ok(StreamEvent::TextDelta {
                id: "t".into(),
                text: "Hello ".into(),
            }),
            Ok(StreamEvent::TextDelta {
                id: "t".into(),
                text: "world".into(),
            }),
            Ok(StreamEvent::StepFinish {
                finish_reason: ProviderFinishReason::Stop,
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 2,
                    ..Default::default()
                },
                provider_metadata: ProviderMetadata::default(),
            }),
        ]);
        let outcome = collect_step(stream, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.text, "Hello world");
        assert_eq!(outcome.reasoning, "hmm");
        assert_eq!(outcome.finish_reason, ProviderFinishReason::Stop);
        assert_eq!(outcome.usage.total_tokens(), 12);
    }

    #[tokio::test]
    async fn collect_propagates_provider_error() {
        let stream = events(vec![Err(ProviderError::new("overloaded", "try later"))]);
        let err = collect_step(stream, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Provider(_)));
    }

    #[tokio::test]
    async fn collect_stops_on_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stream = futures::stream::pending().boxed();
        let err = collect_step(stream, &cancel).await.unwrap_err();
        assert!(err.is_canceled());
    }

    #[test]
    fn usage_add_assign_sums_fields() {
        let mut total = Usage::default();
        total += Usage {
            input_tokens: 5,
            output_tokens: 1,
            cache_read_tokens: 3,
            ..Default::default()
        };
        total += Usage {
            input_tokens: 2,
            output_tokens: 4,
            ..Default::default()
        };
        assert_eq!(total.input_tokens, 7);
        assert_eq!(total.output_tokens, 5);
        assert_eq!(total.cache_read_tokens, 3);
    }

    #[test]
    fn prompt_message_text_joins_text_parts() {
        let msg = PromptMessage::user_with_files(
            "look",
            vec![FilePart {
                filename: "a.png".into(),
                data: vec![1, 2],
                media_type: "image/png".into(),
            }],
        );
        assert_eq!(msg.text(), "look");
        assert_eq!(msg.parts.len(), 2);
    }
}
