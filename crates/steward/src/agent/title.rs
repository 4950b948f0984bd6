//! Session title generation.
//!
//! The first turn of a session spawns a [`TitleJob`] next to the main
//! generation. It asks the small model for a short title, falls back to
//! the large model, and finally to the default title. Whatever happens,
//! the result is written through the isolated title-and-usage update and
//! failures are only logged.

use super::config::TitleConfig;
use super::events::{AgentEvent, EventHandler};
use crate::error::AgentError;
use crate::model::{CostExtractors, Model};
use crate::provider::{PromptMessage, StepOutcome, StreamRequest, collect_step};
use crate::store::{SessionStore, TitleAndUsage};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub const TITLE_SYSTEM_PROMPT: &str = "\
You generate short titles for conversations.
- Reply with the title only, at most 50 characters, on a single line.
- Summarize the user's request; do not answer it.
- No quotes, no colons, no trailing punctuation.";

/// User prompt of the title request.
pub fn title_prompt(user_prompt: &str) -> String {
    format!("Generate a concise title for the following content:\n\n{user_prompt}\n <think>\n\n</think>")
}

static THINK_TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").ok());

/// Flatten newlines, drop `<think>` blocks and trim.
pub fn clean_title(raw: &str) -> String {
    let flat = raw.replace('\n', " ");
    match &*THINK_TAG {
        Some(re) => re.replace_all(&flat, "").trim().to_string(),
        None => flat.trim().to_string(),
    }
}

/// A detached title generation for one session.
pub struct TitleJob {
    pub session_id: String,
    pub user_prompt: String,
    pub small: Model,
    pub large: Model,
    pub system_prompt_prefix: String,
    pub config: TitleConfig,
    pub costs: CostExtractors,
    pub sessions: Arc<dyn SessionStore>,
    pub events: Arc<dyn EventHandler>,
    pub cancel: CancellationToken,
}

impl TitleJob {
    fn request(&self) -> StreamRequest {
        let max_output_tokens = if self.small.info.can_reason {
            self.small.info.default_max_tokens
        } else {
            self.config.max_output_tokens
        };
        let mut messages = Vec::with_capacity(3);
        if !self.system_prompt_prefix.is_empty() {
            messages.push(PromptMessage::system(&self.system_prompt_prefix));
        }
        messages.push(PromptMessage::system(format!("{TITLE_SYSTEM_PROMPT}\n /no_think")));
        messages.push(PromptMessage::user(title_prompt(&self.user_prompt)));
        StreamRequest {
            messages,
            max_output_tokens: Some(max_output_tokens),
            ..Default::default()
        }
    }

    async fn attempt(&self, model: &Model) -> Result<StepOutcome, AgentError> {
        collect_step(model.handle.stream(self.request()), &self.cancel).await
    }

    /// Generate and store the title. Returns the stored title, or `None`
    /// when the prompt was empty.
    pub async fn run(self) -> Option<String> {
        if self.user_prompt.is_empty() {
            return None;
        }

        let (model, outcome) = match self.attempt(&self.small).await {
            Ok(outcome) => {
                debug!("Generated title with small model");
                (&self.small, outcome)
            }
            Err(AgentError::Canceled) => {
                debug!("Title generation canceled");
                return None;
            }
            Err(e) => {
                error!("Error generating title with small model; trying large model: {e}");
                match self.attempt(&self.large).await {
                    Ok(outcome) => {
                        debug!("Generated title with large model");
                        (&self.large, outcome)
                    }
                    Err(e) => {
                        error!("Error generating title with large model: {e}");
                        let title = self.config.default_title.clone();
                        self.save(&title, 0, 0, 0, 0.0).await;
                        return Some(title);
                    }
                }
            }
        };

        let mut title = clean_title(&outcome.text);
        if title.is_empty() {
            debug!("Empty title; using fallback");
            title = self.config.default_title.clone();
        }
        let cost = self
            .costs
            .step_cost(&model.info.pricing, &outcome.usage, &outcome.provider_metadata);
        self.save(
            &title,
            outcome.usage.input_tokens,
            outcome.usage.output_tokens,
            outcome.usage.cache_read_tokens,
            cost,
        )
        .await;
        self.events.on_event(&AgentEvent::TitleGenerated {
            session_id: &self.session_id,
            title: &title,
        });
        Some(title)
    }

    async fn save(&self, title: &str, prompt_tokens: u64, completion_tokens: u64, cache_read_tokens: u64, cost: f64) {
        let update = TitleAndUsage {
            session_id: &self.session_id,
            title,
            prompt_tokens,
            completion_tokens,
            cache_read_tokens,
            cost,
        };
        if let Err(e) = self.sessions.update_title_and_usage(update).await {
            error!("Failed to save session title and usage: {e}");
        }
    }
}
