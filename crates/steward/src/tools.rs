//! Tool abstraction as seen by the orchestrator.
//!
//! The core never inspects tool semantics. It needs a tool's definition to
//! advertise it to the model, and an `execute` entry point whose result is
//! one of three shapes (text, error, media). Refusals and cancellations are
//! reported as `Err(AgentError::PermissionDenied | AgentError::Canceled)` and
//! abort the turn; every other failure should be an
//! [`ToolOutput::Error`] the model can read.

use crate::error::AgentError;
use crate::message::{ToolCall, ToolResult};
use crate::provider::CacheHint;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Boxed future returned by [`AgentTool::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<ToolOutput, AgentError>> + Send + 'a>>;

/// Tool definition sent to the provider.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheHint>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            cache: None,
        }
    }
}

/// Per-invocation context handed to a tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    /// Assistant message that issued the call.
    pub message_id: String,
    pub supports_images: bool,
    pub model_name: String,
    /// Cancelled when the turn is cancelled.
    pub cancel: CancellationToken,
}

/// The result shape of a tool execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    Text(String),
    Error(String),
    Media {
        data: Vec<u8>,
        media_type: String,
        /// Optional caption. Empty captions get a placeholder.
        text: String,
    },
}

impl ToolOutput {
    /// Convert into the persisted tool-result record for `call`.
    pub fn into_result(self, call: &ToolCall) -> ToolResult {
        match self {
            ToolOutput::Text(text) => ToolResult::text(&call.id, &call.name, text),
            ToolOutput::Error(text) => ToolResult::error(&call.id, &call.name, text),
            ToolOutput::Media {
                data,
                media_type,
                text,
            } => ToolResult {
                content: media_caption(&text, &media_type),
                data: base64::engine::general_purpose::STANDARD.encode(data),
                mime_type: media_type,
                ..ToolResult::text(&call.id, &call.name, "")
            },
        }
    }
}

/// Caption for a media result; falls back to a "loaded" placeholder.
pub fn media_caption(text: &str, media_type: &str) -> String {
    if text.is_empty() {
        format!("Loaded {media_type} content")
    } else {
        text.to_string()
    }
}

/// A tool the model can call.
pub trait AgentTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    fn execute<'a>(&'a self, call: &'a ToolCall, ctx: ToolContext) -> ToolFuture<'a>;
}

/// Find a tool by name.
pub fn find_tool<'a>(tools: &'a [Arc<dyn AgentTool>], name: &str) -> Option<&'a Arc<dyn AgentTool>> {
    tools.iter().find(|t| t.definition().name == name)
}

/// Type-erased async handler for [`FnTool`].
type ErasedToolHandler = Box<
    dyn Fn(String, ToolContext) -> Pin<Box<dyn Future<Output = Result<ToolOutput, AgentError>> + Send>>
        + Send
        + Sync,
>;

/// A tool backed by a closure over the raw JSON input.
///
/// ```ignore
/// let echo = FnTool::new(
///     ToolDefinition::new("echo", "Echo input", json!({"type": "object"})),
///     |input, _ctx| async move { Ok(ToolOutput::Text(input)) },
/// );
/// ```
pub struct FnTool {
    def: ToolDefinition,
    handler: ErasedToolHandler,
}

impl FnTool {
    pub fn new<F, Fut>(def: ToolDefinition, handler: F) -> Self
    where
        F: Fn(String, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, AgentError>> + Send + 'static,
    {
        Self {
            def,
            handler: Box::new(move |input, ctx| Box::pin(handler(input, ctx))),
        }
    }
}

impl AgentTool for FnTool {
    fn definition(&self) -> ToolDefinition {
        self.def.clone()
    }

    fn execute<'a>(&'a self, call: &'a ToolCall, ctx: ToolContext) -> ToolFuture<'a> {
        (self.handler)(call.input.clone(), ctx)
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool").field("name", &self.def.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, input: &str) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: name.into(),
            input: input.into(),
            finished: true,
            ..Default::default()
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            session_id: "s1".into(),
            message_id: "m1".into(),
            supports_images: false,
            model_name: "test".into(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn fn_tool_receives_raw_input() {
        let tool = FnTool::new(
            ToolDefinition::new("echo", "Echo", json!({"type": "object"})),
            |input, _ctx| async move { Ok(ToolOutput::Text(input)) },
        );
        let c = call("echo", r#"{"x":1}"#);
        let out = tool.execute(&c, ctx()).await.unwrap();
        assert_eq!(out, ToolOutput::Text(r#"{"x":1}"#.into()));
    }

    #[test]
    fn media_output_gets_placeholder_and_base64() {
        let c = call("view", "{}");
        let result = ToolOutput::Media {
            data: b"hi".to_vec(),
            media_type: "image/png".into(),
            text: String::new(),
        }
        .into_result(&c);
        assert_eq!(result.content, "Loaded image/png content");
        assert_eq!(result.data, "aGk=");
        assert!(result.has_media());
        assert!(!result.is_error);
    }

    #[test]
    fn error_output_is_flagged() {
        let result = ToolOutput::Error("nope".into()).into_result(&call("bash", "{}"));
        assert!(result.is_error);
        assert_eq!(result.tool_call_id, "c1");
    }

    #[test]
    fn find_tool_by_name() {
        let tools: Vec<Arc<dyn AgentTool>> = vec![Arc::new(FnTool::new(
            ToolDefinition::new("ls", "List", json!({})),
            |_, _| async { Ok(ToolOutput::Text(String::new())) },
        ))];
        assert!(find_tool(&tools, "ls").is_some());
        assert!(find_tool(&tools, "rm").is_none());
    }
}
