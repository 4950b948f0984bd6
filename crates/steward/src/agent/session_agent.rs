//! The per-session orchestrator.
//!
//! [`SessionAgent`] owns the active-request registry and the per-session
//! queue. A session has at most one active request at a time: calls that
//! arrive while it is busy are queued and either injected into the running
//! turn at its next step or run afterwards, in arrival order.
//!
//! A turn is a loop of generation steps. Each step rebuilds its request
//! from the store, streams the response into a fresh assistant message,
//! executes the client-side tool calls, and asks the
//! [`StopBudgetEvaluator`] whether the context window is nearly exhausted.
//! When it is, the turn stops, the slot is handed over to summarization,
//! and the interrupted request is re-queued as a continuation prompt.
//!
//! ```ignore
//! let agent = SessionAgent::new(models, messages, sessions, AgentConfig::from_env())
//!     .with_tools(tools)
//!     .with_event_handler(Arc::new(LoggingHandler));
//!
//! match agent.run(SessionAgentCall::new(&session_id, "fix the failing test")).await? {
//!     Some(turn) => println!("{}", turn.text),
//!     None => println!("queued behind the running request"),
//! }
//! ```

use super::config::AgentConfig;
use super::events::{AgentEvent, EventHandler, EventResponse, NoopHandler};
use super::finish::close_out_failed_turn;
use super::history::{StepPrompt, assemble_step, prepare_prompt, session_messages};
use super::title::TitleJob;
use crate::context::{
    BudgetDecision, SUMMARY_SYSTEM_PROMPT, StopBudgetEvaluator, SummarizationLog, SummaryPromptBuilder,
    TieredClassifier, continuation_prompt,
};
use crate::error::AgentError;
use crate::message::{
    Attachment, BinaryContent, ContentPart, FinishReason, Message, MessageRole, ToolCall,
    contains_text_attachment,
};
use crate::model::{Model, Models};
use crate::provider::{PromptMessage, ProviderOptions, StreamEvent, StreamRequest, Usage, collect_step};
use crate::session::Session;
use crate::store::{CreateMessage, MessageStore, SessionStore};
use crate::stream::{AssistantStream, StepFinish, UsageLedger, apply_usage};
use crate::sync::{SyncMap, SyncSlice, SyncValue};
use crate::tools::{AgentTool, ToolContext, ToolDefinition, ToolOutput, find_tool};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const FOLLOWUP_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. Based on the conversation history, suggest the most likely next user action or question. Reply with ONLY a single short prompt (5-10 words max), no quotes, no explanation, no preamble.";
pub const FOLLOWUP_PROMPT: &str = "What should the user ask or do next?";
const FOLLOWUP_HISTORY: usize = 4;
const FOLLOWUP_MAX_TOKENS: u64 = 50;

/// Registry key of a session's summarization.
pub fn summarize_key(session_id: &str) -> String {
    format!("{session_id}-summarize")
}

// ── Calls and results ──────────────────────────────────────────────

/// One user request against a session.
#[derive(Debug, Clone, Default)]
pub struct SessionAgentCall {
    pub session_id: String,
    pub prompt: String,
    pub attachments: Vec<Attachment>,
    /// Per-call output cap; overrides the configured cap.
    pub max_output_tokens: Option<u64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub provider_options: ProviderOptions,
}

impl SessionAgentCall {
    pub fn new(session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u64) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_provider_options(mut self, options: ProviderOptions) -> Self {
        self.provider_options = options;
        self
    }

    fn validate(&self) -> Result<(), AgentError> {
        if self.prompt.is_empty() && !contains_text_attachment(&self.attachments) {
            return Err(AgentError::EmptyPrompt);
        }
        if self.session_id.is_empty() {
            return Err(AgentError::SessionMissing);
        }
        Ok(())
    }
}

/// Outcome of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub session_id: String,
    /// The last assistant message of the turn.
    pub message: Message,
    pub text: String,
    pub finish_reason: FinishReason,
    pub steps: u32,
    /// Usage summed over every step.
    pub usage: Usage,
    pub cost: f64,
    /// Whether the turn stopped to summarize the session.
    pub summarized: bool,
}

enum Admission {
    Admitted(CancellationToken),
    Queued(usize),
}

/// Releases a registry entry when dropped, so a request abandoned by its
/// caller (a dropped future) never leaves the session busy. Disarm it when
/// the entry is handed over or moved instead.
struct ActiveSlot<'a> {
    active: &'a SyncMap<String, CancellationToken>,
    key: String,
    armed: bool,
}

impl<'a> ActiveSlot<'a> {
    fn new(active: &'a SyncMap<String, CancellationToken>, key: impl Into<String>) -> Self {
        Self {
            active,
            key: key.into(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Releasing abandoned request slot {}", self.key);
            self.active.delete(&self.key);
        }
    }
}

/// What one generation step produced.
struct StepReport {
    finish: Option<StepFinish>,
    executed_tools: usize,
}

// ── Agent ──────────────────────────────────────────────────────────

pub struct SessionAgent {
    messages: Arc<dyn MessageStore>,
    sessions: Arc<dyn SessionStore>,
    events: Arc<dyn EventHandler>,
    config: AgentConfig,
    large: SyncValue<Model>,
    small: SyncValue<Model>,
    tools: SyncSlice<Arc<dyn AgentTool>>,
    system_prompt: SyncValue<String>,
    system_prompt_prefix: SyncValue<String>,
    dynamic_context: SyncValue<String>,
    /// Cancellation handles of in-flight requests, keyed by session id or
    /// [`summarize_key`].
    active: SyncMap<String, CancellationToken>,
    /// Calls waiting for a busy session, in arrival order.
    queue: SyncMap<String, Vec<SessionAgentCall>>,
}

impl SessionAgent {
    pub fn new(
        models: Models,
        messages: Arc<dyn MessageStore>,
        sessions: Arc<dyn SessionStore>,
        config: AgentConfig,
    ) -> Self {
        Self {
            messages,
            sessions,
            events: Arc::new(NoopHandler),
            large: SyncValue::new(models.large),
            small: SyncValue::new(models.small),
            tools: SyncSlice::from_vec(Vec::new()),
            system_prompt: SyncValue::new(config.system_prompt.clone()),
            system_prompt_prefix: SyncValue::new(config.system_prompt_prefix.clone()),
            dynamic_context: SyncValue::new(String::new()),
            active: SyncMap::new(),
            queue: SyncMap::new(),
            config,
        }
    }

    pub fn with_tools(self, tools: Vec<Arc<dyn AgentTool>>) -> Self {
        self.tools.set_slice(tools);
        self
    }

    pub fn with_event_handler(mut self, events: Arc<dyn EventHandler>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    // ── Run ────────────────────────────────────────────────────────

    /// Submit a call. Returns `Ok(None)` when the session was busy and the
    /// call was queued. Otherwise runs the turn, then every call queued
    /// behind it, and returns the result of the last turn.
    pub async fn run(&self, call: SessionAgentCall) -> Result<Option<TurnResult>, AgentError> {
        call.validate()?;
        match self.admit(&call) {
            Admission::Queued(depth) => {
                debug!("Session {} busy; queued call (depth {depth})", call.session_id);
                self.events.on_event(&AgentEvent::Queued {
                    session_id: &call.session_id,
                    depth,
                });
                Ok(None)
            }
            Admission::Admitted(token) => self.drive(call, token).await.map(Some),
        }
    }

    /// Queue the call if the session is busy, otherwise claim its slot.
    /// Holds the queue lock so no call can slip between the check and the
    /// enqueue or claim.
    fn admit(&self, call: &SessionAgentCall) -> Admission {
        self.queue.with(|queue| {
            if self.is_session_busy(&call.session_id) {
                let pending = queue.entry(call.session_id.clone()).or_default();
                pending.push(call.clone());
                Admission::Queued(pending.len())
            } else {
                let token = CancellationToken::new();
                self.active.set(call.session_id.clone(), token.clone());
                Admission::Admitted(token)
            }
        })
    }

    /// Release `held_key` and, if calls are waiting, claim the session slot
    /// for the oldest one in the same critical section.
    fn hand_over(&self, session_id: &str, held_key: &str) -> Option<(SessionAgentCall, CancellationToken)> {
        self.queue.with(|queue| {
            self.active.delete(held_key);
            let next = match queue.get_mut(session_id) {
                Some(pending) if !pending.is_empty() => Some(pending.remove(0)),
                _ => None,
            };
            if queue.get(session_id).is_some_and(Vec::is_empty) {
                queue.remove(session_id);
            }
            next.map(|call| {
                let token = CancellationToken::new();
                self.active.set(session_id.to_string(), token.clone());
                (call, token)
            })
        })
    }

    /// Run `call` and then drain the session's queue one call at a time.
    /// On error, or when the caller drops the future, the slot is released
    /// and remaining queued calls are injected by the next turn.
    async fn drive(&self, mut call: SessionAgentCall, mut token: CancellationToken) -> Result<TurnResult, AgentError> {
        loop {
            let session_id = call.session_id.clone();
            let slot = ActiveSlot::new(&self.active, session_id.as_str());
            let turn = self.run_turn(&call, &token).await?;
            slot.disarm();
            match self.hand_over(&session_id, &session_id) {
                Some((next, next_token)) => {
                    debug!("Draining queued call for session {session_id}");
                    call = next;
                    token = next_token;
                }
                None => return Ok(turn),
            }
        }
    }

    /// One turn: persist the user message, kick off title generation for a
    /// fresh session, and run the step loop.
    async fn run_turn(&self, call: &SessionAgentCall, token: &CancellationToken) -> Result<TurnResult, AgentError> {
        let session = self
            .sessions
            .get(&call.session_id)
            .await
            .map_err(AgentError::store("failed to get session"))?;
        let history = session_messages(self.messages.as_ref(), &session).await?;

        let title = if history.is_empty() {
            let models = self.models();
            let job = TitleJob {
                session_id: call.session_id.clone(),
                user_prompt: call.prompt.clone(),
                small: models.small,
                large: models.large,
                system_prompt_prefix: self.system_prompt_prefix.get(),
                config: self.config.title.clone(),
                costs: self.config.costs.clone(),
                sessions: Arc::clone(&self.sessions),
                events: Arc::clone(&self.events),
                cancel: token.clone(),
            };
            Some(tokio::spawn(job.run()))
        } else {
            None
        };

        let result = async {
            self.create_user_message(call).await?;
            self.events.on_event(&AgentEvent::PromptSent {
                session_id: &call.session_id,
                is_sub_agent: self.config.is_sub_agent,
            });
            self.step_loop(call, token).await
        }
        .await;

        if let Some(handle) = title
            && let Err(e) = handle.await
        {
            error!("Title generation task failed: {e}");
        }
        result
    }

    async fn create_user_message(&self, call: &SessionAgentCall) -> Result<Message, AgentError> {
        let mut parts = vec![ContentPart::Text {
            text: call.prompt.clone(),
        }];
        parts.extend(call.attachments.iter().map(|a| {
            ContentPart::Binary(BinaryContent {
                path: a.file_path.clone(),
                mime_type: a.mime_type.clone(),
                data: a.content.clone(),
            })
        }));
        self.messages
            .create(&call.session_id, CreateMessage::new(MessageRole::User, parts))
            .await
            .map_err(AgentError::store("failed to create user message"))
    }

    /// Move every queued call for the session into the transcript.
    async fn inject_queued(&self, session_id: &str) -> Result<(), AgentError> {
        let pending = self.queue.take(session_id).unwrap_or_default();
        if pending.is_empty() {
            return Ok(());
        }
        for call in &pending {
            self.create_user_message(call).await?;
        }
        debug!("Injected {} queued call(s) into session {session_id}", pending.len());
        self.events.on_event(&AgentEvent::QueuedInjected {
            session_id,
            count: pending.len(),
        });
        Ok(())
    }

    async fn step_loop(&self, call: &SessionAgentCall, token: &CancellationToken) -> Result<TurnResult, AgentError> {
        let session_id = call.session_id.as_str();
        let started = Instant::now();
        let large = self.large.get();
        let tools = self.tools.copy();
        let system_prompt = self.system_prompt.get();
        let prefix = self.system_prompt_prefix.get();
        let mut tool_defs: Vec<_> = tools.iter().map(|t| t.definition()).collect();
        self.config.cache.apply_to_tools(&mut tool_defs);
        let ledger = UsageLedger::new(
            Arc::clone(&self.sessions),
            large.info.pricing.clone(),
            self.config.costs.clone(),
        );
        let evaluator = StopBudgetEvaluator::new(self.config.budget.clone());
        let max_steps = self.config.max_steps;

        let mut usage = Usage::default();
        let mut cost = 0.0;
        let mut steps = 0;
        let mut last: Option<Message> = None;
        let mut finish_reason = FinishReason::Unknown;
        let mut summarize = false;

        while steps < max_steps {
            steps += 1;
            info!("Step {steps}/{max_steps} for session {session_id}");
            self.events.on_event(&AgentEvent::StepStart {
                session_id,
                step: steps,
                max_steps,
            });

            self.inject_queued(session_id).await?;
            let request = self
                .step_request(call, &large, &system_prompt, &prefix, tool_defs.clone())
                .await?;
            let mut stream = AssistantStream::start(
                Arc::clone(&self.messages),
                session_id,
                CreateMessage::new(MessageRole::Assistant, vec![]).with_model(&large.info.id, &large.info.provider),
            )
            .await?
            .with_ledger(ledger.clone());

            let report = match self.run_step(&mut stream, &large, request, token, &tools).await {
                Ok(report) => report,
                Err(err) => {
                    let finish = close_out_failed_turn(&mut stream, self.messages.as_ref(), &err, &large.info.name).await?;
                    warn!("Turn for session {session_id} failed: {err}");
                    self.events.on_event(&AgentEvent::TurnFailed {
                        session_id,
                        reason: finish.reason,
                        error: &err,
                    });
                    return Err(err);
                }
            };

            match &report.finish {
                Some(finish) => {
                    usage += finish.usage;
                    cost += finish.cost;
                    finish_reason = finish.reason;
                }
                None => {
                    warn!("Provider stream for session {session_id} ended without a step finish");
                    stream.finish(FinishReason::Unknown, "", "").await?;
                    finish_reason = FinishReason::Unknown;
                }
            }
            last = Some(stream.into_message());

            let session = self
                .sessions
                .get(session_id)
                .await
                .map_err(AgentError::store("failed to get session"))?;
            let window = large.info.context_window();
            if evaluator.evaluate(window, &session) == BudgetDecision::StopForSummary {
                let budget = evaluator.usage(window, session.prompt_tokens, session.completion_tokens);
                info!("{}", budget.to_log_string());
                self.events.on_event(&AgentEvent::StopForSummary {
                    session_id,
                    usage: &budget,
                });
                summarize = true;
                break;
            }

            if report.executed_tools == 0 {
                break;
            }
            if steps == max_steps {
                warn!("Session {session_id} reached the step limit ({max_steps})");
                self.events.on_event(&AgentEvent::StepLimitReached { session_id, max_steps });
            }
        }

        if summarize {
            self.summarize_in_turn(session_id, token).await?;
            if last.as_ref().is_some_and(|m| !m.tool_calls().is_empty()) {
                let continuation = SessionAgentCall {
                    prompt: continuation_prompt(&call.prompt),
                    ..call.clone()
                };
                self.queue.with(|queue| {
                    queue.entry(session_id.to_string()).or_default().push(continuation);
                });
                debug!("Re-queued interrupted request for session {session_id}");
            }
        }

        let duration = started.elapsed();
        info!(
            "Turn for session {session_id} finished after {steps} step(s) in {:.1}s ({} in / {} out tokens, ${cost:.4})",
            duration.as_secs_f64(),
            usage.input_tokens,
            usage.output_tokens,
        );
        self.events.on_event(&AgentEvent::Finished {
            session_id,
            reason: finish_reason,
            steps,
            duration,
        });

        let message = match last {
            Some(message) => message,
            None => Message::new(session_id, MessageRole::Assistant, vec![]),
        };
        Ok(TurnResult {
            session_id: session_id.to_string(),
            text: message.content(),
            message,
            finish_reason,
            steps,
            usage,
            cost,
            summarized: summarize,
        })
    }

    /// Rebuild the provider request for the next step from the store. The
    /// system prompt and prefix are the turn's snapshot; the dynamic context
    /// is read fresh.
    async fn step_request(
        &self,
        call: &SessionAgentCall,
        large: &Model,
        system_prompt: &str,
        prefix: &str,
        tools: Vec<ToolDefinition>,
    ) -> Result<StreamRequest, AgentError> {
        let session = self
            .sessions
            .get(&call.session_id)
            .await
            .map_err(AgentError::store("failed to get session"))?;
        let history = prepare_prompt(&session_messages(self.messages.as_ref(), &session).await?);
        let dynamic_context = self.dynamic_context.get();
        let messages = assemble_step(
            StepPrompt {
                system_prompt,
                system_prompt_prefix: prefix,
                dynamic_context: &dynamic_context,
                cache: &self.config.cache,
                native_tool_result_media: large.info.native_tool_result_media,
            },
            history,
        );
        Ok(StreamRequest {
            messages,
            tools,
            max_output_tokens: call
                .max_output_tokens
                .or(self.config.max_output_tokens)
                .or(Some(large.info.default_max_tokens)),
            temperature: call.temperature,
            top_p: call.top_p,
            top_k: call.top_k,
            frequency_penalty: call.frequency_penalty,
            presence_penalty: call.presence_penalty,
            provider_options: call.provider_options.clone(),
        })
    }

    /// Stream one step into `stream`, then execute its client-side tools.
    async fn run_step(
        &self,
        stream: &mut AssistantStream,
        model: &Model,
        request: StreamRequest,
        token: &CancellationToken,
        tools: &[Arc<dyn AgentTool>],
    ) -> Result<StepReport, AgentError> {
        let finish = self.consume(stream, model, request, token).await?;
        let calls = stream.client_tool_calls();
        for call in &calls {
            self.execute_tool(stream, model, call, token, tools).await?;
        }
        Ok(StepReport {
            finish,
            executed_tools: calls.len(),
        })
    }

    /// Feed provider events into `stream` until the provider closes it or
    /// the request is cancelled.
    async fn consume(
        &self,
        stream: &mut AssistantStream,
        model: &Model,
        request: StreamRequest,
        token: &CancellationToken,
    ) -> Result<Option<StepFinish>, AgentError> {
        let session_id = stream.message().session_id.clone();
        let mut events = model.handle.stream(request);
        let mut finish = None;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(AgentError::Canceled),
                next = events.next() => next,
            };
            let Some(event) = next else { break };
            let event = event?;
            match &event {
                StreamEvent::TextDelta { text, .. } => {
                    self.events.on_event(&AgentEvent::TextDelta {
                        session_id: &session_id,
                        text,
                    });
                }
                StreamEvent::ReasoningStart { text, .. }
                | StreamEvent::ReasoningDelta { text, .. } => {
                    self.events.on_event(&AgentEvent::ReasoningDelta {
                        session_id: &session_id,
                        text,
                    });
                }
                _ => {}
            }
            if let Some(step) = stream.apply(event).await? {
                self.events.on_event(&AgentEvent::TokensUsed {
                    session_id: &session_id,
                    usage: &step.usage,
                    cost: step.cost,
                });
                finish = Some(step);
            }
        }
        Ok(finish)
    }

    async fn execute_tool(
        &self,
        stream: &mut AssistantStream,
        model: &Model,
        call: &ToolCall,
        token: &CancellationToken,
        tools: &[Arc<dyn AgentTool>],
    ) -> Result<(), AgentError> {
        let session_id = stream.message().session_id.clone();
        let response = self.events.on_event(&AgentEvent::ApprovalRequired {
            session_id: &session_id,
            name: &call.name,
            input: &call.input,
        });
        if let Some(EventResponse::Deny(reason)) = response {
            info!("Tool {} denied: {reason}", call.name);
            return Err(AgentError::PermissionDenied);
        }

        self.events.on_event(&AgentEvent::ToolExecuting {
            session_id: &session_id,
            name: &call.name,
            call_id: &call.id,
        });
        let output = match find_tool(tools, &call.name) {
            Some(tool) => {
                let ctx = ToolContext {
                    session_id: session_id.clone(),
                    message_id: stream.message().id.clone(),
                    supports_images: model.info.supports_images,
                    model_name: model.info.name.clone(),
                    cancel: token.child_token(),
                };
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(AgentError::Canceled),
                    output = tool.execute(call, ctx) => output?,
                }
            }
            None => {
                warn!("Model called unknown tool {}", call.name);
                ToolOutput::Error(format!("tool not found: {}", call.name))
            }
        };

        let result = output.into_result(call);
        self.events.on_event(&AgentEvent::ToolResult {
            session_id: &session_id,
            name: &call.name,
            call_id: &call.id,
            content: &result.content,
            is_error: result.is_error,
        });
        stream.on_tool_result(result).await?;
        Ok(())
    }

    // ── Summarize ──────────────────────────────────────────────────

    /// Compact the session into a summary message. Fails with
    /// [`AgentError::SessionBusy`] while the session has an active request.
    ///
    /// Calls queued while the summary runs are driven before this returns.
    /// A summarization error takes precedence over an error from those calls.
    pub async fn summarize(&self, session_id: &str) -> Result<(), AgentError> {
        let key = summarize_key(session_id);
        let token = self.queue.with(|_| {
            if self.is_session_busy(session_id) {
                return None;
            }
            let token = CancellationToken::new();
            self.active.set(key.clone(), token.clone());
            Some(token)
        });
        let Some(token) = token else {
            return Err(AgentError::SessionBusy);
        };

        let slot = ActiveSlot::new(&self.active, key.as_str());
        let result = self.summarize_with(session_id, &token).await;
        slot.disarm();

        let drained = match self.hand_over(session_id, &key) {
            Some((next, next_token)) => {
                debug!("Draining calls queued during summarization of {session_id}");
                self.drive(next, next_token).await.map(|_| ())
            }
            None => Ok(()),
        };
        result.and(drained)
    }

    /// Summarize from inside a turn. The turn's slot moves to the summarize
    /// key for the duration and back afterwards.
    async fn summarize_in_turn(&self, session_id: &str, token: &CancellationToken) -> Result<(), AgentError> {
        let key = summarize_key(session_id);
        self.active.with(|active| {
            if let Some(t) = active.remove(session_id) {
                active.insert(key.clone(), t);
            }
        });
        let slot = ActiveSlot::new(&self.active, key.as_str());
        let result = self.summarize_with(session_id, token).await;
        slot.disarm();
        self.active.with(|active| {
            if let Some(t) = active.remove(&key) {
                active.insert(session_id.to_string(), t);
            }
        });
        result
    }

    async fn summarize_with(&self, session_id: &str, token: &CancellationToken) -> Result<(), AgentError> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .map_err(AgentError::store("failed to get session"))?;
        let msgs = session_messages(self.messages.as_ref(), &session).await?;
        if msgs.is_empty() {
            debug!("Nothing to summarize for session {session_id}");
            return Ok(());
        }

        let large = self.large.get();
        let history = prepare_prompt(&msgs);
        let tiered = TieredClassifier::new(self.config.tiers.clone()).prepare(&msgs);
        let stats = tiered.stats();
        info!("Summarizing session {session_id}: {}", tiered.format_stats());
        self.events.on_event(&AgentEvent::SummaryStarted {
            session_id,
            stats: &stats,
        });

        let prompt = SummaryPromptBuilder::new(self.config.tiers.preserve_excerpt_chars).build(&session.todos, &tiered);
        let prefix = self.system_prompt_prefix.get();
        let mut messages = Vec::with_capacity(history.len() + 3);
        if !prefix.is_empty() {
            messages.push(PromptMessage::system(prefix));
        }
        messages.push(PromptMessage::system(SUMMARY_SYSTEM_PROMPT));
        messages.extend(history);
        messages.push(PromptMessage::user(prompt));
        let request = StreamRequest {
            messages,
            max_output_tokens: Some(large.info.default_max_tokens),
            ..Default::default()
        };

        let mut stream = AssistantStream::start(
            Arc::clone(&self.messages),
            session_id,
            CreateMessage::new(MessageRole::Assistant, vec![])
                .with_model(&large.info.id, &large.info.provider)
                .summary(),
        )
        .await?;

        let step = match self.consume(&mut stream, &large, request, token).await {
            Ok(step) => step,
            Err(AgentError::Canceled) => {
                self.messages
                    .delete(&stream.message().id)
                    .await
                    .map_err(AgentError::store("failed to delete summary message"))?;
                info!("Summarization of session {session_id} canceled");
                self.events.on_event(&AgentEvent::SummaryCanceled { session_id });
                return Err(AgentError::Canceled);
            }
            Err(err) => {
                close_out_failed_turn(&mut stream, self.messages.as_ref(), &err, &large.info.name).await?;
                return Err(err);
            }
        };

        stream.finish(FinishReason::EndTurn, "", "").await?;
        let (usage, metadata) = step
            .map(|s| (s.usage, s.provider_metadata))
            .unwrap_or_default();
        let cost = self
            .config
            .costs
            .step_cost(&large.info.pricing, &usage, &metadata);

        let mut session: Session = self
            .sessions
            .get(session_id)
            .await
            .map_err(AgentError::store("failed to get session"))?;
        apply_usage(&mut session, &usage, cost);
        session.summary_message_id = Some(stream.message().id.clone());
        session.completion_tokens = usage.output_tokens;
        session.prompt_tokens = 0;
        self.sessions
            .save(&session)
            .await
            .map_err(AgentError::store("failed to save session"))?;

        let log = SummarizationLog::from_context(&tiered);
        self.events.on_event(&AgentEvent::SummaryCompleted {
            session_id,
            message_id: &stream.message().id,
            log: &log,
        });
        Ok(())
    }

    // ── Follow-up ──────────────────────────────────────────────────

    /// Suggest the user's next prompt from the last few messages, using the
    /// small model. Empty sessions yield an empty suggestion.
    pub async fn suggest_followup(&self, session_id: &str) -> Result<String, AgentError> {
        if self.is_session_busy(session_id) {
            return Err(AgentError::SessionBusy);
        }
        let session = self
            .sessions
            .get(session_id)
            .await
            .map_err(AgentError::store("failed to get session"))?;
        let msgs = session_messages(self.messages.as_ref(), &session).await?;
        if msgs.is_empty() {
            return Ok(String::new());
        }
        let recent = &msgs[msgs.len().saturating_sub(FOLLOWUP_HISTORY)..];

        let prefix = self.system_prompt_prefix.get();
        let mut messages = Vec::new();
        if !prefix.is_empty() {
            messages.push(PromptMessage::system(prefix));
        }
        messages.push(PromptMessage::system(FOLLOWUP_SYSTEM_PROMPT));
        messages.extend(prepare_prompt(recent));
        messages.push(PromptMessage::user(FOLLOWUP_PROMPT));

        let small = self.small.get();
        let request = StreamRequest {
            messages,
            max_output_tokens: Some(FOLLOWUP_MAX_TOKENS),
            ..Default::default()
        };
        let outcome = collect_step(small.handle.stream(request), &CancellationToken::new()).await?;
        Ok(outcome.text.trim().trim_matches(['"', '\'']).trim().to_string())
    }

    // ── Cancellation ───────────────────────────────────────────────

    /// Cancel the session's active request and summarization and drop its
    /// queued calls. Registry entries are removed by the tasks themselves
    /// as they unwind.
    pub fn cancel(&self, session_id: &str) {
        let key = summarize_key(session_id);
        let (request, summary) = self
            .active
            .with(|active| (active.get(session_id).cloned(), active.get(&key).cloned()));
        if let Some(token) = request {
            info!("Request cancellation initiated for session {session_id}");
            token.cancel();
        }
        if let Some(token) = summary {
            info!("Summarize cancellation initiated for session {session_id}");
            token.cancel();
        }
        if self.queued_prompts(session_id) > 0 {
            info!("Clearing queued prompts for session {session_id}");
            self.clear_queue(session_id);
        }
        self.events.on_event(&AgentEvent::CancelRequested { session_id });
    }

    /// Cancel everything, then wait until every session is idle or the
    /// configured timeout passes.
    pub async fn cancel_all(&self) {
        if !self.is_busy() {
            return;
        }
        for (key, token) in self.active.copy() {
            debug!("Cancelling {key}");
            token.cancel();
        }
        self.queue.with(|queue| queue.clear());

        let wait = async {
            while self.is_busy() {
                tokio::time::sleep(self.config.cancel_all_poll_interval).await;
            }
        };
        if tokio::time::timeout(self.config.cancel_all_timeout, wait).await.is_err() {
            warn!(
                "Timed out after {:?} waiting for {} request(s) to stop",
                self.config.cancel_all_timeout,
                self.active.len()
            );
        }
    }

    pub fn clear_queue(&self, session_id: &str) {
        self.queue.delete(session_id);
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn is_busy(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn is_session_busy(&self, session_id: &str) -> bool {
        self.active.with(|active| active.contains_key(session_id) || active.contains_key(&summarize_key(session_id)))
    }

    pub fn queued_prompts(&self, session_id: &str) -> usize {
        self.queue.get(session_id).map_or(0, |q| q.len())
    }

    pub fn queued_prompts_list(&self, session_id: &str) -> Vec<String> {
        self.queue
            .get(session_id)
            .unwrap_or_default()
            .into_iter()
            .map(|c| c.prompt)
            .collect()
    }

    // ── Live configuration ─────────────────────────────────────────

    /// The large model.
    pub fn model(&self) -> Model {
        self.large.get()
    }

    pub fn models(&self) -> Models {
        Models {
            large: self.large.get(),
            small: self.small.get(),
        }
    }

    pub fn set_models(&self, large: Model, small: Model) {
        self.large.set(large);
        self.small.set(small);
    }

    pub fn set_tools(&self, tools: Vec<Arc<dyn AgentTool>>) {
        self.tools.set_slice(tools);
    }

    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        self.system_prompt.set(prompt.into());
    }

    pub fn set_system_prompt_prefix(&self, prefix: impl Into<String>) {
        self.system_prompt_prefix.set(prefix.into());
    }

    /// Replace the per-turn `<env>` block sent uncached before the history.
    pub fn set_dynamic_context(&self, context: impl Into<String>) {
        self.dynamic_context.set(context.into());
    }
}
