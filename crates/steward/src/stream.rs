//! Incremental assembly of an assistant message from provider events.
//!
//! One [`AssistantStream`] exists per generation step. It owns the
//! in-progress assistant [`Message`], applies each [`StreamEvent`] through a
//! dedicated `on_*` method, and writes the message back to the store after
//! every mutation, so a crash mid-stream leaves a partial but well-formed
//! transcript entry.
//!
//! ```text
//!   Idle ──reasoning──▶ Reasoning ──text──▶ Text
//!     │                    │                  │
//!     └──────── tool-input / tool-call ───────┤
//!                                             ▼
//!                                  step-finish ▶ Finished
//! ```
//!
//! Replays are tolerated: tool calls upsert by id, reasoning-end is
//! idempotent, and a repeated step-finish is ignored so usage is never
//! counted twice.

use crate::error::AgentError;
use crate::message::{ContentPart, FinishReason, Message, MessageRole, ToolCall, ToolResult};
use crate::model::{CostExtractors, ModelPricing};
use crate::provider::{
    ProviderFinishReason, ProviderMetadata, ReasoningMetadata, StreamEvent, ToolResultOutput, Usage,
};
use crate::session::Session;
use crate::store::{CreateMessage, MessageStore, SessionStore};
use crate::tools::media_caption;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Where the in-progress message currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Reasoning,
    Text,
    Finished,
}

/// Map a provider finish reason onto the transcript vocabulary.
pub fn map_finish_reason(reason: ProviderFinishReason) -> FinishReason {
    match reason {
        ProviderFinishReason::Length => FinishReason::MaxTokens,
        ProviderFinishReason::Stop => FinishReason::EndTurn,
        ProviderFinishReason::ToolCalls => FinishReason::ToolUse,
        _ => FinishReason::Unknown,
    }
}

/// Convert a provider-side tool result into the persisted record.
pub fn convert_tool_result(tool_call_id: &str, name: &str, output: ToolResultOutput) -> ToolResult {
    match output {
        ToolResultOutput::Text { text } => ToolResult::text(tool_call_id, name, text),
        ToolResultOutput::Error { message } => ToolResult::error(tool_call_id, name, message),
        ToolResultOutput::Media {
            data,
            media_type,
            text,
        } => ToolResult {
            content: media_caption(&text, &media_type),
            data,
            mime_type: media_type,
            ..ToolResult::text(tool_call_id, name, "")
        },
    }
}

/// Outcome of a step-finish event.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFinish {
    pub reason: FinishReason,
    pub usage: Usage,
    pub provider_metadata: ProviderMetadata,
    /// Cost charged for the step (zero when no ledger is attached).
    pub cost: f64,
}

// ── Usage ledger ───────────────────────────────────────────────────

/// Writes per-step usage into the session record.
///
/// Clones share one async lock, so concurrent step finishes within a turn
/// re-read and save the session one at a time.
#[derive(Clone)]
pub struct UsageLedger {
    sessions: Arc<dyn SessionStore>,
    lock: Arc<Mutex<()>>,
    pricing: ModelPricing,
    costs: CostExtractors,
}

impl UsageLedger {
    pub fn new(sessions: Arc<dyn SessionStore>, pricing: ModelPricing, costs: CostExtractors) -> Self {
        Self {
            sessions,
            lock: Arc::new(Mutex::new(())),
            pricing,
            costs,
        }
    }

    /// Reported cost when a provider supplies one, else priced usage.
    pub fn step_cost(&self, usage: &Usage, metadata: &ProviderMetadata) -> f64 {
        self.costs.step_cost(&self.pricing, usage, metadata)
    }

    /// Re-read the session, fold in one step's usage and save it.
    pub async fn record_step(&self, session_id: &str, usage: &Usage, cost: f64) -> Result<Session, AgentError> {
        let _guard = self.lock.lock().await;
        let mut session = self
            .sessions
            .get(session_id)
            .await
            .map_err(AgentError::store("failed to get session"))?;
        apply_usage(&mut session, usage, cost);
        self.sessions
            .save(&session)
            .await
            .map_err(AgentError::store("failed to save session"))
    }
}

/// Token counters are overwritten from the latest report; cost accumulates.
pub fn apply_usage(session: &mut Session, usage: &Usage, cost: f64) {
    session.cost += cost;
    session.prompt_tokens = usage.input_tokens;
    session.completion_tokens = usage.output_tokens;
    session.cache_read_tokens = usage.cache_read_tokens;
    session.updated_at = Utc::now();
}

// ── Assistant stream ───────────────────────────────────────────────

pub struct AssistantStream {
    messages: Arc<dyn MessageStore>,
    ledger: Option<UsageLedger>,
    message: Message,
    state: StreamState,
}

impl AssistantStream {
    /// Create the assistant message in the store and start tracking it.
    pub async fn start(
        messages: Arc<dyn MessageStore>,
        session_id: &str,
        params: CreateMessage,
    ) -> Result<Self, AgentError> {
        let message = messages
            .create(session_id, params)
            .await
            .map_err(AgentError::store("failed to create assistant message"))?;
        debug!("Assistant message {} started for session {session_id}", message.id);
        Ok(Self::new(messages, message))
    }

    /// Track an existing message.
    pub fn new(messages: Arc<dyn MessageStore>, message: Message) -> Self {
        Self {
            messages,
            ledger: None,
            message,
            state: StreamState::Idle,
        }
    }

    /// Record step usage into the session on step finish.
    pub fn with_ledger(mut self, ledger: UsageLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Finished tool calls the orchestrator still has to execute.
    pub fn client_tool_calls(&self) -> Vec<ToolCall> {
        self.message
            .tool_calls()
            .into_iter()
            .filter(|c| c.finished && !c.provider_executed)
            .cloned()
            .collect()
    }

    async fn persist(&self) -> Result<(), AgentError> {
        self.messages
            .update(&self.message)
            .await
            .map_err(AgentError::store("failed to update assistant message"))
    }

    fn close_reasoning(&mut self) {
        if self.state == StreamState::Reasoning {
            self.message.finish_thinking();
        }
    }

    pub async fn on_reasoning_start(&mut self, text: &str) -> Result<(), AgentError> {
        self.state = StreamState::Reasoning;
        self.message.append_reasoning(text);
        self.persist().await
    }

    pub async fn on_reasoning_delta(&mut self, text: &str) -> Result<(), AgentError> {
        self.state = StreamState::Reasoning;
        self.message.append_reasoning(text);
        self.persist().await
    }

    pub async fn on_reasoning_end(&mut self, metadata: Option<ReasoningMetadata>) -> Result<(), AgentError> {
        if let Some(metadata) = metadata {
            self.message.set_reasoning_metadata(metadata);
        }
        self.message.finish_thinking();
        self.state = StreamState::Idle;
        self.persist().await
    }

    pub async fn on_text_delta(&mut self, text: &str) -> Result<(), AgentError> {
        self.close_reasoning();
        let text = if self.message.parts.is_empty() {
            text.strip_prefix('\n').unwrap_or(text)
        } else {
            text
        };
        self.state = StreamState::Text;
        self.message.append_content(text);
        self.persist().await
    }

    pub async fn on_tool_input_start(&mut self, id: &str, name: &str) -> Result<(), AgentError> {
        self.close_reasoning();
        let already_known = self.message.tool_calls().iter().any(|c| c.id == id);
        if !already_known {
            self.message.add_tool_call(ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                ..Default::default()
            });
        }
        self.persist().await
    }

    pub async fn on_tool_call(&mut self, mut call: ToolCall) -> Result<(), AgentError> {
        self.close_reasoning();
        call.finished = true;
        trace!("Tool call {} ({}) complete", call.id, call.name);
        self.message.add_tool_call(call);
        self.persist().await
    }

    /// Persist a tool result as its own tool message.
    pub async fn on_tool_result(&mut self, result: ToolResult) -> Result<Message, AgentError> {
        self.messages
            .create(
                &self.message.session_id,
                CreateMessage::new(MessageRole::Tool, vec![ContentPart::ToolResult(result)]),
            )
            .await
            .map_err(AgentError::store("failed to create tool result message"))
    }

    /// Record the step's finish reason and, with a ledger attached, its usage.
    /// Returns `None` for a replayed step finish.
    pub async fn on_step_finish(
        &mut self,
        reason: ProviderFinishReason,
        usage: Usage,
        provider_metadata: ProviderMetadata,
    ) -> Result<Option<StepFinish>, AgentError> {
        if self.state == StreamState::Finished {
            debug!("Ignoring repeated step finish for {}", self.message.id);
            return Ok(None);
        }
        self.close_reasoning();
        let reason = map_finish_reason(reason);
        self.message.add_finish(reason, "", "");
        self.state = StreamState::Finished;
        self.persist().await?;

        let mut cost = 0.0;
        if let Some(ledger) = &self.ledger {
            cost = ledger.step_cost(&usage, &provider_metadata);
            ledger
                .record_step(&self.message.session_id, &usage, cost)
                .await?;
        }
        Ok(Some(StepFinish {
            reason,
            usage,
            provider_metadata,
            cost,
        }))
    }

    /// Dispatch one provider event.
    pub async fn apply(&mut self, event: StreamEvent) -> Result<Option<StepFinish>, AgentError> {
        match event {
            StreamEvent::ReasoningStart { text, .. } => self.on_reasoning_start(&text).await?,
            StreamEvent::ReasoningDelta { text, .. } => self.on_reasoning_delta(&text).await?,
            StreamEvent::ReasoningEnd { metadata, .. } => self.on_reasoning_end(metadata).await?,
            StreamEvent::TextDelta { text, .. } => self.on_text_delta(&text).await?,
            StreamEvent::ToolInputStart { id, name } => self.on_tool_input_start(&id, &name).await?,
            StreamEvent::ToolCall {
                id,
                name,
                input,
                provider_executed,
            } => {
                self.on_tool_call(ToolCall {
                    id,
                    name,
                    input,
                    provider_executed,
                    finished: true,
                })
                .await?
            }
            StreamEvent::ToolResult {
                tool_call_id,
                name,
                output,
            } => {
                self.on_tool_result(convert_tool_result(&tool_call_id, &name, output))
                    .await?;
            }
            StreamEvent::StepFinish {
                finish_reason,
                usage,
                provider_metadata,
            } => return self.on_step_finish(finish_reason, usage, provider_metadata).await,
        }
        Ok(None)
    }

    /// Stamp a terminal marker outside the normal step flow (errors, summaries).
    pub async fn finish(
        &mut self,
        reason: FinishReason,
        title: &str,
        detail: &str,
    ) -> Result<(), AgentError> {
        self.message.finish_thinking();
        self.message.add_finish(reason, title, detail);
        self.state = StreamState::Finished;
        self.persist().await
    }

    /// Write back direct edits made through [`message_mut`](Self::message_mut).
    pub async fn sync(&self) -> Result<(), AgentError> {
        self.persist().await
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }
}
