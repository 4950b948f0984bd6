//! Shared fixtures: a scripted language model and an agent wired to an
//! in-memory store.

#![allow(dead_code)]

use futures::StreamExt;
use futures::stream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use steward::agent::{AgentConfig, AgentEvent, EventHandler, EventResponse, SessionAgent};
use steward::context::CachePolicy;
use steward::error::ProviderError;
use steward::message::{ContentPart, FinishReason, Message, MessageRole};
use steward::model::{Model, ModelInfo, ModelPricing, Models};
use steward::provider::{
    EventStream, LanguageModel, ProviderFinishReason, ProviderMetadata, StreamEvent, StreamRequest, Usage,
};
use steward::session::Session;
use steward::store::{CreateMessage, MemoryStore, MessageStore, SessionStore};
use tokio::sync::Semaphore;

pub const SESSION: &str = "ses-test";

// ── Scripted model ─────────────────────────────────────────────────

/// One scripted response.
pub enum Script {
    /// Emit the events and close the stream.
    Events(Vec<StreamEvent>),
    /// Fail immediately.
    Fail(ProviderError),
    /// Emit the events, then never finish.
    Hang(Vec<StreamEvent>),
    /// Wait for a gate permit, then emit the events.
    Gated(Arc<Semaphore>, Vec<StreamEvent>),
}

/// A [`LanguageModel`] that replays scripted responses in order and
/// records every request. Once the script runs out it answers with an
/// empty text step.
pub struct ScriptedModel {
    id: String,
    script: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedModel {
    pub fn new(id: &str, script: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Poll until `n` requests have been made.
    pub async fn wait_for_requests(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.request_count() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("model was never called");
    }
}

impl LanguageModel for ScriptedModel {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        &self.id
    }

    fn stream(&self, request: StreamRequest) -> EventStream<'_> {
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        match next.unwrap_or_else(|| Script::Events(text_step(""))) {
            Script::Events(events) => stream::iter(events.into_iter().map(Ok)).boxed(),
            Script::Fail(err) => stream::iter(vec![Err(err)]).boxed(),
            Script::Hang(events) => stream::iter(events.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed(),
            Script::Gated(gate, events) => {
                let wait = stream::once(async move {
                    if let Ok(permit) = gate.acquire().await {
                        permit.forget();
                    }
                })
                .filter_map(|_| async { None });
                wait.chain(stream::iter(events.into_iter().map(Ok))).boxed()
            }
        }
    }
}

// ── Event builders ─────────────────────────────────────────────────

pub fn usage(input: u64, output: u64) -> Usage {
    Usage {
        input_tokens: input,
        output_tokens: output,
        ..Default::default()
    }
}

pub fn finish(reason: ProviderFinishReason, usage: Usage) -> StreamEvent {
    StreamEvent::StepFinish {
        finish_reason: reason,
        usage,
        provider_metadata: ProviderMetadata::default(),
    }
}

pub fn text(t: &str) -> StreamEvent {
    StreamEvent::TextDelta {
        id: "t".into(),
        text: t.into(),
    }
}

pub fn tool_call(id: &str, name: &str, input: &str) -> StreamEvent {
    StreamEvent::ToolCall {
        id: id.into(),
        name: name.into(),
        input: input.into(),
        provider_executed: false,
    }
}

/// A single text reply that ends the turn.
pub fn text_step(t: &str) -> Vec<StreamEvent> {
    vec![text(t), finish(ProviderFinishReason::Stop, usage(0, 0))]
}

// ── Recording handler ──────────────────────────────────────────────

/// Records a short tag per event and denies the listed tools. With
/// `stall` set, approval requests block the calling thread that long,
/// like a prompt nobody answers.
#[derive(Default)]
pub struct Recorder {
    pub tags: Mutex<Vec<String>>,
    pub deny: Vec<String>,
    pub stall: Option<Duration>,
}

impl Recorder {
    pub fn denying(tool: &str) -> Self {
        Self {
            deny: vec![tool.to_string()],
            ..Default::default()
        }
    }

    pub fn stalling(stall: Duration) -> Self {
        Self {
            stall: Some(stall),
            ..Default::default()
        }
    }

    pub fn tags(&self) -> Vec<String> {
        self.tags.lock().unwrap().clone()
    }

    pub fn saw(&self, tag: &str) -> bool {
        self.tags().iter().any(|t| t == tag)
    }
}

impl EventHandler for Recorder {
    fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
        let tag = match event {
            AgentEvent::Queued { .. } => "queued",
            AgentEvent::PromptSent { .. } => "prompt_sent",
            AgentEvent::StepStart { .. } => "step_start",
            AgentEvent::QueuedInjected { .. } => "queued_injected",
            AgentEvent::TextDelta { .. } => "text_delta",
            AgentEvent::ReasoningDelta { .. } => "reasoning_delta",
            AgentEvent::ApprovalRequired { .. } => "approval_required",
            AgentEvent::ToolExecuting { .. } => "tool_executing",
            AgentEvent::ToolResult { .. } => "tool_result",
            AgentEvent::TokensUsed { .. } => "tokens_used",
            AgentEvent::StopForSummary { .. } => "stop_for_summary",
            AgentEvent::StepLimitReached { .. } => "step_limit",
            AgentEvent::Finished { .. } => "finished",
            AgentEvent::TurnFailed { .. } => "turn_failed",
            AgentEvent::SummaryStarted { .. } => "summary_started",
            AgentEvent::SummaryCompleted { .. } => "summary_completed",
            AgentEvent::SummaryCanceled { .. } => "summary_canceled",
            AgentEvent::TitleGenerated { .. } => "title_generated",
            AgentEvent::CancelRequested { .. } => "cancel_requested",
        };
        self.tags.lock().unwrap().push(tag.to_string());
        if let AgentEvent::ApprovalRequired { name, .. } = event {
            if let Some(stall) = self.stall {
                std::thread::sleep(stall);
            }
            if self.deny.iter().any(|d| d.as_str() == *name) {
                return Some(EventResponse::Deny(format!("{name} is not allowed")));
            }
        }
        None
    }
}

// ── Fixture ────────────────────────────────────────────────────────

pub fn large_info(context_window: u64) -> ModelInfo {
    ModelInfo::new("scripted-large", "scripted", context_window)
        .with_name("Scripted Large")
        .with_default_max_tokens(1_000)
        .with_pricing(ModelPricing::new(1.0, 2.0))
}

pub fn small_info() -> ModelInfo {
    ModelInfo::new("scripted-small", "scripted", 32_000).with_pricing(ModelPricing::new(0.0, 0.0))
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub large: Arc<ScriptedModel>,
    pub small: Arc<ScriptedModel>,
    pub recorder: Arc<Recorder>,
    pub agent: Arc<SessionAgent>,
}

pub struct FixtureBuilder {
    large: Vec<Script>,
    small: Vec<Script>,
    context_window: u64,
    recorder: Recorder,
    config: AgentConfig,
}

impl FixtureBuilder {
    pub fn new() -> Self {
        Self {
            large: Vec::new(),
            small: Vec::new(),
            context_window: 200_000,
            recorder: Recorder::default(),
            config: AgentConfig::default()
                .with_cache(CachePolicy::disabled())
                .with_cancel_all_timeout(Duration::from_secs(2)),
        }
    }

    pub fn large(mut self, script: Vec<Script>) -> Self {
        self.large = script;
        self
    }

    pub fn small(mut self, script: Vec<Script>) -> Self {
        self.small = script;
        self
    }

    pub fn context_window(mut self, window: u64) -> Self {
        self.context_window = window;
        self
    }

    pub fn recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn config(mut self, f: impl FnOnce(AgentConfig) -> AgentConfig) -> Self {
        self.config = f(self.config);
        self
    }

    pub fn build(self) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.insert_session(Session::with_id(SESSION, ""));
        let large = ScriptedModel::new("scripted-large", self.large);
        let small = ScriptedModel::new("scripted-small", self.small);
        let recorder = Arc::new(self.recorder);
        let models = Models {
            large: Model::new(large.clone(), large_info(self.context_window)),
            small: Model::new(small.clone(), small_info()),
        };
        let agent = SessionAgent::new(models, store.clone(), store.clone(), self.config)
            .with_event_handler(recorder.clone());
        Fixture {
            store,
            large,
            small,
            recorder,
            agent: Arc::new(agent),
        }
    }
}

impl Fixture {
    /// Poll until the recorder has seen `tag`.
    pub async fn wait_for_tag(&self, tag: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.recorder.saw(tag) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("event never recorded");
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.store.list(SESSION).await.unwrap()
    }

    pub async fn session(&self) -> Session {
        self.store.get(SESSION).await.unwrap()
    }

    /// Seed the transcript so the next turn is not the first one.
    pub async fn seed(&self, pairs: &[(&str, &str)]) {
        for (user, assistant) in pairs {
            self.store
                .create(SESSION, CreateMessage::new(MessageRole::User, text_parts(user)))
                .await
                .unwrap();
            let mut parts = text_parts(assistant);
            let mut finished = Message::new(SESSION, MessageRole::Assistant, vec![]);
            finished.add_finish(FinishReason::EndTurn, "", "");
            parts.extend(finished.parts);
            self.store
                .create(SESSION, CreateMessage::new(MessageRole::Assistant, parts))
                .await
                .unwrap();
        }
    }

    /// Poll until the session has an assistant message satisfying `pred`.
    pub async fn wait_for_message(&self, pred: impl Fn(&Message) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if self.messages().await.iter().any(&pred) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("message never appeared");
    }
}

pub fn text_parts(t: &str) -> Vec<ContentPart> {
    vec![ContentPart::Text { text: t.into() }]
}

/// User texts of the transcript in order.
pub fn user_texts(msgs: &[Message]) -> Vec<String> {
    msgs.iter()
        .filter(|m| m.role == MessageRole::User)
        .map(|m| m.content())
        .collect()
}
