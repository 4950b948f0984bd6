//! Persistence contracts for messages and sessions.
//!
//! The orchestrator only talks to [`MessageStore`] and [`SessionStore`]
//! trait objects. Two implementations ship with the crate:
//!
//! - [`MemoryStore`] keeps everything in process. Used by tests and embedders
//!   that persist elsewhere.
//! - [`JsonFileStore`] writes one JSON file per session and per message,
//!   using temp-file + rename so readers never see a torn write.
//!
//! Both implement both traits, so one `Arc` can serve as either store.

pub mod fs;
pub mod memory;

pub use fs::JsonFileStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::message::{ContentPart, Message, MessageRole};
use crate::session::Session;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Parameters for [`MessageStore::create`].
#[derive(Debug, Clone)]
pub struct CreateMessage {
    pub role: MessageRole,
    pub parts: Vec<ContentPart>,
    pub model: String,
    pub provider: String,
    pub is_summary: bool,
}

impl CreateMessage {
    pub fn new(role: MessageRole, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            parts,
            model: String::new(),
            provider: String::new(),
            is_summary: false,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>, provider: impl Into<String>) -> Self {
        self.model = model.into();
        self.provider = provider.into();
        self
    }

    pub fn summary(mut self) -> Self {
        self.is_summary = true;
        self
    }

    /// Materialize a new message for `session_id`.
    pub fn into_message(self, session_id: &str) -> Message {
        let mut msg = Message::new(session_id, self.role, self.parts);
        msg.model = self.model;
        msg.provider = self.provider;
        msg.is_summary = self.is_summary;
        msg
    }
}

/// Transcript storage. Must offer read-your-writes after `update`.
pub trait MessageStore: Send + Sync {
    fn create<'a>(&'a self, session_id: &'a str, params: CreateMessage) -> StoreFuture<'a, Message>;

    fn update<'a>(&'a self, message: &'a Message) -> StoreFuture<'a, ()>;

    /// Messages of a session in creation order.
    fn list<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Vec<Message>>;

    fn delete<'a>(&'a self, message_id: &'a str) -> StoreFuture<'a, ()>;
}

/// Session storage.
pub trait SessionStore: Send + Sync {
    fn get<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Session>;

    fn save<'a>(&'a self, session: &'a Session) -> StoreFuture<'a, Session>;

    /// Isolated update of the title and usage fields. Other fields written
    /// concurrently are left untouched.
    fn update_title_and_usage<'a>(&'a self, update: TitleAndUsage<'a>) -> StoreFuture<'a, ()>;

    fn list_sessions(&self) -> StoreFuture<'_, Vec<Session>>;
}

/// Arguments of [`SessionStore::update_title_and_usage`].
#[derive(Debug, Clone, Copy)]
pub struct TitleAndUsage<'a> {
    pub session_id: &'a str,
    pub title: &'a str,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cache_read_tokens: u64,
    /// Cost to add to the session's running total.
    pub cost: f64,
}

impl TitleAndUsage<'_> {
    fn apply(&self, session: &mut Session) {
        session.title = self.title.to_string();
        session.prompt_tokens = self.prompt_tokens;
        session.completion_tokens = self.completion_tokens;
        session.cache_read_tokens = self.cache_read_tokens;
        session.cost += self.cost;
        session.updated_at = chrono::Utc::now();
    }
}
