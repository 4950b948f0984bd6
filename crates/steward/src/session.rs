//! Session records: identity, running usage counters, summary pointer and
//! the outstanding task list.

use crate::message::generate_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl std::fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TodoStatus::Pending => "pending",
            TodoStatus::InProgress => "in_progress",
            TodoStatus::Completed => "completed",
        })
    }
}

/// One entry of a session's task list.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Todo {
    pub content: String,
    #[serde(default)]
    pub status: TodoStatus,
    /// Present-tense phrasing shown while the task is in progress.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub active_form: String,
}

impl Todo {
    pub fn new(content: impl Into<String>, status: TodoStatus) -> Self {
        Self {
            content: content.into(),
            status,
            active_form: String::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Session {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    #[serde(default)]
    pub title: String,
    /// Input tokens of the most recent step.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Output tokens of the most recent step.
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    /// Accumulated cost in USD.
    #[serde(default)]
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_message_id: Option<String>,
    #[serde(default)]
    pub todos: Vec<Todo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_id(generate_id("ses"), title)
    }

    pub fn with_id(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            parent_session_id: None,
            title: title.into(),
            prompt_tokens: 0,
            completion_tokens: 0,
            cache_read_tokens: 0,
            cost: 0.0,
            summary_message_id: None,
            todos: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Tokens currently occupying the context window.
    pub fn context_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Todos that are not yet completed.
    pub fn open_todos(&self) -> impl Iterator<Item = &Todo> {
        self.todos.iter().filter(|t| t.status != TodoStatus::Completed)
    }
}
