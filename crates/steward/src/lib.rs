//! Session orchestration core for LLM coding agents.
//!
//! `steward` drives conversations between a user, a large language model and
//! a set of tools. The core abstraction is the
//! [`SessionAgent`](agent::SessionAgent): it serializes requests per session,
//! streams each generation step into a persisted transcript, executes tool
//! calls, tracks token usage and cost, and compacts the conversation into a
//! summary when the context window runs low.
//!
//! The crate is provider-agnostic. Models plug in through the
//! [`LanguageModel`](provider::LanguageModel) trait, persistence through the
//! [`MessageStore`](store::MessageStore) and
//! [`SessionStore`](store::SessionStore) traits, and tools through
//! [`AgentTool`](tools::AgentTool).
//!
//! # Getting started
//!
//! ```ignore
//! use std::sync::Arc;
//! use steward::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AgentError> {
//!     let store = Arc::new(MemoryStore::new());
//!     store.insert_session(Session::with_id("ses-1", ""));
//!
//!     let models = Models {
//!         large: Model::new(provider.clone(), ModelInfo::new("claude-sonnet-4", "anthropic", 200_000)),
//!         small: Model::new(provider, ModelInfo::new("claude-haiku-4", "anthropic", 200_000)),
//!     };
//!
//!     let agent = SessionAgent::new(models, store.clone(), store, AgentConfig::from_env())
//!         .with_tools(tools)
//!         .with_event_handler(Arc::new(LoggingHandler));
//!
//!     if let Some(turn) = agent.run(SessionAgentCall::new("ses-1", "Read src/main.rs and summarize it.")).await? {
//!         println!("{}", turn.text);
//!         println!("Cost: ${:.4}", turn.cost);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! If you're looking for how to...
//!
//! - **Run turns:** see [`SessionAgent::run`](agent::SessionAgent::run) and
//!   [`AgentConfig`](agent::AgentConfig). A call against a busy session is
//!   queued and picked up when the running turn ends.
//!
//! - **Observe or gate the agent:** implement
//!   [`EventHandler`](agent::EventHandler). Answer
//!   [`AgentEvent::ApprovalRequired`](agent::AgentEvent::ApprovalRequired)
//!   with [`EventResponse::Deny`](agent::EventResponse::Deny) to refuse a tool.
//!
//! - **Understand the transcript:** see [`message`] for the content-part
//!   model and [`stream`] for how provider events become persisted messages.
//!
//! - **Manage context and cost:** see [`context::budget`] for the
//!   stop-for-summary rule, [`context::cache`] for prompt-caching hints,
//!   [`context::tiers`] and [`context::summary`] for summarization, and
//!   [`model`] for pricing and provider-reported costs.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | [`SessionAgent`](agent::SessionAgent), config, events, history assembly, failure close-out, titles |
//! | [`stream`] | Provider event processing into assistant messages, usage ledger |
//! | [`context`] | Budget evaluation, cache hints, tiered classification, summary prompt, `<env>` block |
//! | [`provider`] | [`LanguageModel`](provider::LanguageModel) seam, request and event types |
//! | [`message`] / [`session`] | Persisted transcript and session records |
//! | [`store`] | Store traits with in-memory and JSON-file implementations |
//! | [`tools`] | [`AgentTool`](tools::AgentTool) trait and [`FnTool`](tools::FnTool) |
//!
//! # Design principles
//!
//! 1. **One active request per session.** Admission, queueing and handover
//!    happen under one lock, so a session never runs two turns at once and
//!    queued calls are never stranded.
//!
//! 2. **The transcript is always well-formed.** Cancellation, refused
//!    permissions and provider failures all end with a terminal marker on
//!    the assistant message and a result for every tool call.
//!
//! 3. **Context is the scarcest resource.** The budget is checked after
//!    every step, and summarization keeps what matters verbatim while
//!    compressing or dropping the rest.

pub mod agent;
pub mod context;
pub mod error;
pub mod message;
pub mod model;
pub mod prelude;
pub mod provider;
pub mod session;
pub mod store;
pub mod stream;
pub mod sync;
pub mod tools;

pub use agent::{AgentConfig, SessionAgent, SessionAgentCall, TurnResult};
pub use error::{AgentError, ProviderError, StoreError};
