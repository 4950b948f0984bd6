//! Agent runtime: the [`SessionAgent`] orchestrator and its supporting
//! modules.
//!
//! - [`session_agent::SessionAgent`]: per-session turns, queueing,
//!   cancellation, summarization and follow-up suggestions. Start here.
//! - [`config::AgentConfig`]: step limit, output caps, budget, cache and
//!   tier settings.
//! - [`events`]: [`EventHandler`] trait and [`AgentEvent`] enum for
//!   observing turns and answering tool approvals. Includes
//!   [`LoggingHandler`] and [`CompositeEventHandler`].
//! - [`history`]: how the provider-visible history is rebuilt each step.
//! - [`finish`]: how a failed turn's assistant message is closed out.
//! - [`title`]: first-turn title generation.

pub mod config;
pub mod events;
pub mod finish;
pub mod history;
pub mod session_agent;
pub mod title;

pub use config::{AgentConfig, DEFAULT_SESSION_TITLE, TitleConfig};
pub use events::{
    AgentEvent, CompositeEventHandler, EventHandler, EventObserver, EventResponse, FnEventHandler, LoggingHandler,
    NoopHandler,
};
pub use finish::{FailureFinish, classify_failure};
pub use session_agent::{SessionAgent, SessionAgentCall, TurnResult, summarize_key};
pub use title::TitleJob;
