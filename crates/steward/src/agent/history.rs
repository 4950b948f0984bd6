//! Provider-visible history: transcript slicing, filtering and per-step
//! assembly.
//!
//! Every step of a turn rebuilds its request from the store:
//!
//! 1. [`session_messages`] lists the transcript, starting at the summary
//!    message (relabeled as a user turn) once one exists.
//! 2. [`prepare_prompt`] drops empty messages and assistant stubs left by a
//!    cancelled turn, then converts the rest.
//! 3. [`workaround_media`] moves tool-result media into user messages for
//!    providers that reject it in tool results.
//! 4. [`assemble_step`] adds the system prompt, the uncached `<env>`
//!    message, cache hints, and the system prompt prefix.

use crate::context::CachePolicy;
use crate::error::AgentError;
use crate::message::{Message, MessageRole};
use crate::provider::{FilePart, PromptMessage, PromptPart, ToolResultOutput};
use crate::session::Session;
use crate::store::MessageStore;
use base64::Engine;
use tracing::warn;

/// Placeholder left in a tool result whose media moved to a user message.
pub const MEDIA_PLACEHOLDER: &str = "[Image/media content loaded - see attached file]";

/// Text of the user message that carries relocated media.
pub const MEDIA_CARRIER_TEXT: &str = "Here is the media content from the tool result:";

/// The session transcript as the model should see it.
pub async fn session_messages(
    messages: &dyn MessageStore,
    session: &Session,
) -> Result<Vec<Message>, AgentError> {
    let mut msgs = messages
        .list(&session.id)
        .await
        .map_err(AgentError::store("failed to list messages"))?;
    if let Some(summary_id) = &session.summary_message_id
        && let Some(idx) = msgs.iter().position(|m| &m.id == summary_id)
    {
        msgs.drain(..idx);
        msgs[0].role = MessageRole::User;
    }
    Ok(msgs)
}

/// Whether a stored message should be replayed to the provider.
fn replayable(msg: &Message) -> bool {
    if msg.parts.is_empty() {
        return false;
    }
    if msg.role == MessageRole::Assistant {
        let has_reasoning = msg.reasoning().is_some_and(|r| !r.thinking.is_empty());
        return !msg.tool_calls().is_empty() || !msg.content().is_empty() || has_reasoning;
    }
    true
}

/// Convert stored messages into provider messages, skipping empty ones.
pub fn prepare_prompt(msgs: &[Message]) -> Vec<PromptMessage> {
    msgs.iter()
        .filter(|m| replayable(m))
        .flat_map(Message::to_prompt_messages)
        .collect()
}

/// Relocate tool-result media into synthetic user messages.
///
/// With `native_support` the history is returned unchanged.
pub fn workaround_media(messages: Vec<PromptMessage>, native_support: bool) -> Vec<PromptMessage> {
    if native_support {
        return messages;
    }
    let mut out = Vec::with_capacity(messages.len());
    for msg in messages {
        if msg.role != MessageRole::Tool {
            out.push(msg);
            continue;
        }
        let mut parts = Vec::with_capacity(msg.parts.len());
        let mut files = Vec::new();
        for part in msg.parts {
            let PromptPart::ToolResult {
                tool_call_id,
                output: ToolResultOutput::Media { data, media_type, .. },
            } = &part
            else {
                parts.push(part);
                continue;
            };
            let decoded = match base64::engine::general_purpose::STANDARD.decode(data) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Failed to decode media data: {e}");
                    parts.push(part);
                    continue;
                }
            };
            files.push(FilePart {
                filename: format!("tool-result-{tool_call_id}"),
                data: decoded,
                media_type: media_type.clone(),
            });
            parts.push(PromptPart::ToolResult {
                tool_call_id: tool_call_id.clone(),
                output: ToolResultOutput::Text {
                    text: MEDIA_PLACEHOLDER.to_string(),
                },
            });
        }
        out.push(PromptMessage {
            role: MessageRole::Tool,
            parts,
            cache: msg.cache,
        });
        if !files.is_empty() {
            out.push(PromptMessage::user_with_files(MEDIA_CARRIER_TEXT, files));
        }
    }
    out
}

/// Inputs of [`assemble_step`].
#[derive(Debug, Clone, Copy)]
pub struct StepPrompt<'a> {
    pub system_prompt: &'a str,
    pub system_prompt_prefix: &'a str,
    pub dynamic_context: &'a str,
    pub cache: &'a CachePolicy,
    /// Whether the provider accepts media inside tool results.
    pub native_tool_result_media: bool,
}

/// Build the message list for one generation step.
pub fn assemble_step(prompt: StepPrompt<'_>, history: Vec<PromptMessage>) -> Vec<PromptMessage> {
    let mut messages = Vec::with_capacity(history.len() + 3);
    if !prompt.system_prompt.is_empty() {
        messages.push(PromptMessage::system(prompt.system_prompt));
    }
    messages.extend(workaround_media(history, prompt.native_tool_result_media));

    let mut exempt = None;
    if !prompt.dynamic_context.is_empty() {
        let idx = messages
            .iter()
            .position(|m| m.role != MessageRole::System)
            .unwrap_or(messages.len());
        messages.insert(idx, PromptMessage::user(prompt.dynamic_context));
        exempt = Some(idx);
    }

    prompt.cache.apply_to_messages(&mut messages, exempt);

    if !prompt.system_prompt_prefix.is_empty() {
        messages.insert(0, PromptMessage::system(prompt.system_prompt_prefix));
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ContentPart, ToolCall, ToolResult};
    use crate::store::{CreateMessage, MemoryStore};

    fn text(role: MessageRole, t: &str) -> Message {
        Message::new("s1", role, vec![ContentPart::Text { text: t.into() }])
    }

    fn media_tool_message() -> PromptMessage {
        PromptMessage::new(
            MessageRole::Tool,
            vec![
                PromptPart::ToolResult {
                    tool_call_id: "c1".into(),
                    output: ToolResultOutput::Media {
                        data: "aGk=".into(),
                        media_type: "image/png".into(),
                        text: "Loaded image/png content".into(),
                    },
                },
                PromptPart::ToolResult {
                    tool_call_id: "c2".into(),
                    output: ToolResultOutput::Text { text: "ok".into() },
                },
            ],
        )
    }

    #[tokio::test]
    async fn history_starts_at_summary_as_user() {
        let store = MemoryStore::new();
        store.insert_session(Session::with_id("s1", "t"));
        store
            .create("s1", CreateMessage::new(MessageRole::User, vec![ContentPart::Text { text: "old".into() }]))
            .await
            .unwrap();
        let summary = store
            .create(
                "s1",
                CreateMessage::new(MessageRole::Assistant, vec![ContentPart::Text { text: "sum".into() }]).summary(),
            )
            .await
            .unwrap();
        store
            .create("s1", CreateMessage::new(MessageRole::User, vec![ContentPart::Text { text: "new".into() }]))
            .await
            .unwrap();

        let mut session = Session::with_id("s1", "t");
        let all = session_messages(&store, &session).await.unwrap();
        assert_eq!(all.len(), 3);

        session.summary_message_id = Some(summary.id.clone());
        let sliced = session_messages(&store, &session).await.unwrap();
        assert_eq!(sliced.len(), 2);
        assert_eq!(sliced[0].id, summary.id);
        assert_eq!(sliced[0].role, MessageRole::User);

        session.summary_message_id = Some("gone".into());
        assert_eq!(session_messages(&store, &session).await.unwrap().len(), 3);
    }

    #[test]
    fn prepare_prompt_skips_cancelled_stubs() {
        let mut stub = Message::new("s1", MessageRole::Assistant, vec![]);
        stub.add_finish(crate::message::FinishReason::Canceled, "User canceled request", "");
        let mut with_call = Message::new("s1", MessageRole::Assistant, vec![]);
        with_call.add_tool_call(ToolCall {
            id: "c1".into(),
            name: "ls".into(),
            input: "{}".into(),
            finished: true,
            ..Default::default()
        });
        let empty_user = Message::new("s1", MessageRole::User, vec![]);
        let msgs = vec![
            text(MessageRole::User, "hi"),
            stub,
            empty_user,
            with_call,
            Message::new(
                "s1",
                MessageRole::Tool,
                vec![ContentPart::ToolResult(ToolResult::text("c1", "ls", "a\nb"))],
            ),
        ];
        let prompt = prepare_prompt(&msgs);
        let roles: Vec<_> = prompt.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![MessageRole::User, MessageRole::Assistant, MessageRole::Tool]
        );
    }

    #[test]
    fn media_moves_to_user_message() {
        let out = workaround_media(vec![PromptMessage::user("look"), media_tool_message()], false);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].role, MessageRole::Tool);
        assert_eq!(
            out[1].parts[0],
            PromptPart::ToolResult {
                tool_call_id: "c1".into(),
                output: ToolResultOutput::Text {
                    text: MEDIA_PLACEHOLDER.into()
                },
            }
        );
        assert_eq!(out[2].role, MessageRole::User);
        assert_eq!(out[2].text(), MEDIA_CARRIER_TEXT);
        match &out[2].parts[1] {
            PromptPart::File(f) => {
                assert_eq!(f.filename, "tool-result-c1");
                assert_eq!(f.data, b"hi");
                assert_eq!(f.media_type, "image/png");
            }
            other => panic!("unexpected part {other:?}"),
        }
    }

    #[test]
    fn native_media_passes_through() {
        let input = vec![media_tool_message()];
        assert_eq!(workaround_media(input.clone(), true), input);
    }

    #[test]
    fn undecodable_media_is_left_in_place() {
        let msg = PromptMessage::new(
            MessageRole::Tool,
            vec![PromptPart::ToolResult {
                tool_call_id: "c1".into(),
                output: ToolResultOutput::Media {
                    data: "%%%".into(),
                    media_type: "image/png".into(),
                    text: String::new(),
                },
            }],
        );
        let out = workaround_media(vec![msg.clone()], false);
        assert_eq!(out, vec![msg]);
    }

    #[test]
    fn assemble_places_env_prefix_and_hints() {
        let cache = CachePolicy::default();
        let history = vec![
            PromptMessage::user("one"),
            PromptMessage::user("two"),
            PromptMessage::user("three"),
        ];
        let out = assemble_step(
            StepPrompt {
                system_prompt: "sys",
                system_prompt_prefix: "prefix",
                dynamic_context: "<env>x</env>",
                cache: &cache,
                native_tool_result_media: true,
            },
            history,
        );
        let texts: Vec<_> = out.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["prefix", "sys", "<env>x</env>", "one", "two", "three"]);
        let hinted: Vec<_> = out.iter().map(|m| m.cache.is_some()).collect();
        assert_eq!(hinted, vec![false, true, false, false, true, true]);
    }

    #[test]
    fn assemble_without_extras() {
        let out = assemble_step(
            StepPrompt {
                system_prompt: "",
                system_prompt_prefix: "",
                dynamic_context: "",
                cache: &CachePolicy::disabled(),
                native_tool_result_media: true,
            },
            vec![PromptMessage::user("only")],
        );
        assert_eq!(out.len(), 1);
        assert!(out[0].cache.is_none());
    }
}
