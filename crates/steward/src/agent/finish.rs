//! Closing out a failed turn.
//!
//! When a turn fails, the in-progress assistant message still has to end in
//! a valid state. [`close_out_failed_turn`] stamps a classified finish on it
//! and resolves every tool call: unfinished calls get an empty `{}` input,
//! and calls without a result get a synthetic error result.

use crate::error::{AgentError, DEFAULT_PROVIDER_ERROR_TITLE, ProviderErrorKind};
use crate::message::{FinishReason, MessageRole, ToolResult};
use crate::store::MessageStore;
use crate::stream::AssistantStream;
use std::collections::HashSet;
use tracing::debug;

pub const CANCELED_TOOL_CONTENT: &str = "Tool execution canceled by user";
pub const DENIED_TOOL_CONTENT: &str = "User denied permission";
pub const FAILED_TOOL_CONTENT: &str = "There was an error while executing the tool";

/// The terminal marker a failure maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureFinish {
    pub reason: FinishReason,
    pub title: String,
    pub detail: String,
}

impl FailureFinish {
    fn new(reason: FinishReason, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            reason,
            title: title.into(),
            detail: detail.into(),
        }
    }
}

/// Map an error onto a finish reason with a user-facing title and detail.
/// `model_name` names the model in the "not enabled" remediation text.
pub fn classify_failure(err: &AgentError, model_name: &str) -> FailureFinish {
    match err {
        AgentError::Canceled => FailureFinish::new(FinishReason::Canceled, "User canceled request", ""),
        AgentError::PermissionDenied => {
            FailureFinish::new(FinishReason::PermissionDenied, "User denied permission", "")
        }
        AgentError::Provider(p) => {
            let url = p.remediation_url.as_deref().unwrap_or_default();
            match p.kind {
                ProviderErrorKind::NoCredits => FailureFinish::new(
                    FinishReason::Error,
                    "No credits",
                    format!("You're out of credits. Add more at {url}").trim_end().to_string(),
                ),
                ProviderErrorKind::ModelNotEnabled => FailureFinish::new(
                    FinishReason::Error,
                    "Model not enabled",
                    format!(
                        "{model_name:?} is not enabled for this account. Enable it, then wait a few minutes before trying again. {url}"
                    )
                    .trim_end()
                    .to_string(),
                ),
                ProviderErrorKind::Generic => {
                    let title = capitalize(&p.title);
                    let title = if title.is_empty() {
                        DEFAULT_PROVIDER_ERROR_TITLE.to_string()
                    } else {
                        title
                    };
                    FailureFinish::new(FinishReason::Error, title, p.message.clone())
                }
            }
        }
        other => FailureFinish::new(FinishReason::Error, DEFAULT_PROVIDER_ERROR_TITLE, other.to_string()),
    }
}

/// Content of the synthetic result for a tool call interrupted by `err`.
pub fn interrupted_tool_content(err: &AgentError) -> &'static str {
    match err {
        AgentError::Canceled => CANCELED_TOOL_CONTENT,
        AgentError::PermissionDenied => DENIED_TOOL_CONTENT,
        _ => FAILED_TOOL_CONTENT,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Finalize the assistant message of a failed turn. Returns the finish
/// reason that was recorded.
pub async fn close_out_failed_turn(
    stream: &mut AssistantStream,
    messages: &dyn MessageStore,
    err: &AgentError,
    model_name: &str,
) -> Result<FailureFinish, AgentError> {
    stream.message_mut().finish_thinking();
    let session_id = stream.message().session_id.clone();

    let answered: HashSet<String> = messages
        .list(&session_id)
        .await
        .map_err(AgentError::store("failed to list messages"))?
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .flat_map(|m| m.tool_results().into_iter().map(|r| r.tool_call_id.clone()))
        .collect();

    let calls: Vec<_> = stream.message().tool_calls().into_iter().cloned().collect();
    for mut call in calls {
        if !call.finished {
            call.finished = true;
            call.input = "{}".to_string();
            stream.message_mut().add_tool_call(call.clone());
            stream.sync().await?;
        }
        if answered.contains(&call.id) {
            continue;
        }
        debug!("Resolving interrupted tool call {} ({})", call.id, call.name);
        stream
            .on_tool_result(ToolResult::error(&call.id, &call.name, interrupted_tool_content(err)))
            .await?;
    }

    let finish = classify_failure(err, model_name);
    stream.finish(finish.reason, &finish.title, &finish.detail).await?;
    Ok(finish)
}
