//! Convenience re-exports for common `steward` types.
//!
//! Meant to be glob-imported when embedding the orchestrator:
//!
//! ```ignore
//! use steward::prelude::*;
//! ```
//!
//! This pulls in the agent and its config, the call and result types,
//! event handlers, the store traits with both implementations, the model
//! and tool seams, and the transcript types. Context-management internals
//! (tier classification, summary prompt rendering) are left out; import
//! them from [`crate::context`] when needed.

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    AgentConfig, AgentEvent, CompositeEventHandler, EventHandler, EventObserver, EventResponse,
    FnEventHandler, LoggingHandler, NoopHandler, SessionAgent, SessionAgentCall, TurnResult,
};

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::error::{AgentError, ProviderError, StoreError};

// ── Models and providers ────────────────────────────────────────────
pub use crate::model::{Model, ModelInfo, ModelPricing, Models};
pub use crate::provider::{LanguageModel, StreamEvent, StreamRequest, Usage};

// ── Persistence ─────────────────────────────────────────────────────
pub use crate::message::{Attachment, FinishReason, Message, MessageRole};
pub use crate::session::{Session, Todo, TodoStatus};
pub use crate::store::{JsonFileStore, MemoryStore, MessageStore, SessionStore};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{AgentTool, FnTool, ToolContext, ToolDefinition, ToolFuture, ToolOutput};
