//! Events emitted by the [`SessionAgent`](super::SessionAgent).
//!
//! The agent reports progress through [`AgentEvent`] variants covering
//! the lifecycle of a turn: prompt sent, step start, tool execution, usage,
//! stop-for-summary, summarization and completion. Callers implement
//! [`EventHandler`] to observe them. The handler is injected at
//! construction, so separate agents never share one.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures that may answer approvals |
//! | [`EventObserver`] | Closures that only observe |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use crate::context::{BudgetUsage, SummarizationLog, TierStats};
use crate::error::AgentError;
use crate::message::FinishReason;
use crate::provider::Usage;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

// ── Events ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum AgentEvent<'a> {
    /// A call arrived while the session was busy and was queued.
    Queued { session_id: &'a str, depth: usize },
    /// The user turn was persisted and generation is starting.
    PromptSent { session_id: &'a str, is_sub_agent: bool },
    /// A generation step is starting.
    StepStart {
        session_id: &'a str,
        step: u32,
        max_steps: u32,
    },
    /// Queued calls were injected into the running turn.
    QueuedInjected { session_id: &'a str, count: usize },
    /// Incremental visible text.
    TextDelta { session_id: &'a str, text: &'a str },
    /// Incremental reasoning text.
    ReasoningDelta { session_id: &'a str, text: &'a str },
    /// A tool needs approval before it runs. Answer with
    /// [`EventResponse::Deny`] to refuse it.
    ApprovalRequired {
        session_id: &'a str,
        name: &'a str,
        input: &'a str,
    },
    /// A tool is about to run.
    ToolExecuting {
        session_id: &'a str,
        name: &'a str,
        call_id: &'a str,
    },
    /// A tool produced a result.
    ToolResult {
        session_id: &'a str,
        name: &'a str,
        call_id: &'a str,
        content: &'a str,
        is_error: bool,
    },
    /// Usage reported at the end of a step.
    TokensUsed {
        session_id: &'a str,
        usage: &'a Usage,
        cost: f64,
    },
    /// The remaining context budget is exhausted; the turn stops to summarize.
    StopForSummary {
        session_id: &'a str,
        usage: &'a BudgetUsage,
    },
    /// The step limit was reached with tool calls still pending.
    StepLimitReached { session_id: &'a str, max_steps: u32 },
    /// The turn finished.
    Finished {
        session_id: &'a str,
        reason: FinishReason,
        steps: u32,
        duration: Duration,
    },
    /// The turn failed and its assistant message was closed out.
    TurnFailed {
        session_id: &'a str,
        reason: FinishReason,
        error: &'a AgentError,
    },
    SummaryStarted {
        session_id: &'a str,
        stats: &'a TierStats,
    },
    SummaryCompleted {
        session_id: &'a str,
        message_id: &'a str,
        log: &'a SummarizationLog,
    },
    /// Summarization was cancelled and its partial message removed.
    SummaryCanceled { session_id: &'a str },
    TitleGenerated { session_id: &'a str, title: &'a str },
    /// Cancellation was requested for a session.
    CancelRequested { session_id: &'a str },
}

impl AgentEvent<'_> {
    /// Session the event belongs to.
    pub fn session_id(&self) -> &str {
        match self {
            AgentEvent::Queued { session_id, .. }
            | AgentEvent::PromptSent { session_id, .. }
            | AgentEvent::StepStart { session_id, .. }
            | AgentEvent::QueuedInjected { session_id, .. }
            | AgentEvent::TextDelta { session_id, .. }
            | AgentEvent::ReasoningDelta { session_id, .. }
            | AgentEvent::ApprovalRequired { session_id, .. }
            | AgentEvent::ToolExecuting { session_id, .. }
            | AgentEvent::ToolResult { session_id, .. }
            | AgentEvent::TokensUsed { session_id, .. }
            | AgentEvent::StopForSummary { session_id, .. }
            | AgentEvent::StepLimitReached { session_id, .. }
            | AgentEvent::Finished { session_id, .. }
            | AgentEvent::TurnFailed { session_id, .. }
            | AgentEvent::SummaryStarted { session_id, .. }
            | AgentEvent::SummaryCompleted { session_id, .. }
            | AgentEvent::SummaryCanceled { session_id }
            | AgentEvent::TitleGenerated { session_id, .. }
            | AgentEvent::CancelRequested { session_id } => session_id,
        }
    }
}

/// Response from an event handler for events that accept feedback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventResponse {
    Approve,
    /// Refuse the pending action. The turn ends as permission-denied.
    Deny(String),
}

/// Handler for agent events.
///
/// The default implementation returns `None` (auto-approve, no side
/// effects). Only [`AgentEvent::ApprovalRequired`] looks at the return value.
///
/// ```ignore
/// struct Guard;
///
/// impl EventHandler for Guard {
///     fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
///         match event {
///             AgentEvent::ApprovalRequired { name: &"bash", .. } => {
///                 Some(EventResponse::Deny("shell disabled".into()))
///             }
///             _ => None,
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
        let _ = event;
        None
    }
}

/// A no-op event handler that auto-approves all actions.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&AgentEvent<'_>) -> Option<EventResponse> + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&AgentEvent<'_>) -> Option<EventResponse> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&AgentEvent<'_>) -> Option<EventResponse> + Send + Sync,
{
    fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
        (self.0)(event)
    }
}

/// An observation-only closure adapted into an [`EventHandler`].
pub struct EventObserver<F>(F)
where
    F: Fn(&AgentEvent<'_>) + Send + Sync;

impl<F> EventObserver<F>
where
    F: Fn(&AgentEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for EventObserver<F>
where
    F: Fn(&AgentEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
        (self.0)(event);
        None
    }
}

/// Dispatches to inner handlers in registration order. The first
/// non-`None` response wins.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(verbose, DebugHandler::new())
///     .with_opt(ui.map(UiHandler::new));
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
        let mut response = None;
        for handler in &self.handlers {
            let r = handler.on_event(event);
            if response.is_none() {
                response = r;
            }
        }
        response
    }
}

/// An event handler that logs events via `tracing`.
pub struct LoggingHandler;

fn preview(text: &str, max: usize) -> String {
    let head: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        format!("{head}...")
    } else {
        head
    }
}

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
        match event {
            AgentEvent::Queued { session_id, depth } => {
                info!("[{session_id}] session busy, queued call (depth {depth})");
            }
            AgentEvent::PromptSent {
                session_id,
                is_sub_agent,
            } => {
                info!("[{session_id}] prompt sent (sub-agent: {is_sub_agent})");
            }
            AgentEvent::StepStart {
                session_id,
                step,
                max_steps,
            } => {
                debug!("[{session_id}] step {step}/{max_steps}");
            }
            AgentEvent::QueuedInjected { session_id, count } => {
                debug!("[{session_id}] injected {count} queued call(s) into the running turn");
            }
            AgentEvent::TextDelta { text, .. } => {
                trace!("Stream text delta: {}", preview(text, 80));
            }
            AgentEvent::ReasoningDelta { text, .. } => {
                trace!("Stream reasoning delta: {}", preview(text, 80));
            }
            AgentEvent::ApprovalRequired { name, .. } => {
                info!("Approval required for tool: {name}");
                // LoggingHandler auto-approves.
                return Some(EventResponse::Approve);
            }
            AgentEvent::ToolExecuting { name, call_id, .. } => {
                debug!("Executing tool: {name} ({call_id})");
            }
            AgentEvent::ToolResult {
                name,
                content,
                is_error,
                ..
            } => {
                if *is_error {
                    debug!("Tool {name} failed: {}", preview(content, 200));
                } else {
                    debug!("Tool {name} result: {} bytes", content.len());
                }
            }
            AgentEvent::TokensUsed {
                session_id,
                usage,
                cost,
            } => {
                debug!(
                    "[{session_id}] tokens: prompt={}, completion={}, cache_read={}, cost=${cost:.4}",
                    usage.input_tokens, usage.output_tokens, usage.cache_read_tokens
                );
            }
            AgentEvent::StopForSummary { session_id, usage } => {
                info!("[{session_id}] stopping to summarize: {}", usage.to_log_string());
            }
            AgentEvent::StepLimitReached {
                session_id,
                max_steps,
            } => {
                warn!("[{session_id}] hit step limit ({max_steps})");
            }
            AgentEvent::Finished {
                session_id,
                reason,
                steps,
                duration,
            } => {
                info!(
                    "[{session_id}] turn finished: {} after {steps} step(s) in {}s",
                    reason.as_str(),
                    duration.as_secs()
                );
            }
            AgentEvent::TurnFailed {
                session_id,
                reason,
                error,
            } => {
                warn!("[{session_id}] turn ended as {}: {error}", reason.as_str());
            }
            AgentEvent::SummaryStarted { session_id, stats } => {
                info!("[{session_id}] summarizing ({stats})");
            }
            AgentEvent::SummaryCompleted {
                session_id,
                message_id,
                log,
            } => {
                info!(
                    "[{session_id}] summary {message_id} written: {} compressed, {} discarded, {} file(s)",
                    log.messages_summarized,
                    log.discarded_count,
                    log.files_referenced.len()
                );
            }
            AgentEvent::SummaryCanceled { session_id } => {
                info!("[{session_id}] summarization canceled");
            }
            AgentEvent::TitleGenerated { session_id, title } => {
                debug!("[{session_id}] title: {title}");
            }
            AgentEvent::CancelRequested { session_id } => {
                debug!("[{session_id}] cancellation requested");
            }
        }
        None
    }
}
