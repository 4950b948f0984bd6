//! In-process store backed by [`SyncMap`]s.

use super::{CreateMessage, MessageStore, SessionStore, StoreFuture, TitleAndUsage};
use crate::error::StoreError;
use crate::message::Message;
use crate::session::Session;
use crate::sync::SyncMap;

#[derive(Default)]
pub struct MemoryStore {
    sessions: SyncMap<String, Session>,
    /// Per-session transcripts in insertion order.
    messages: SyncMap<String, Vec<Message>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a session directly (test and embedding helper).
    pub fn insert_session(&self, session: Session) {
        self.sessions.set(session.id.clone(), session);
    }
}

impl MessageStore for MemoryStore {
    fn create<'a>(&'a self, session_id: &'a str, params: CreateMessage) -> StoreFuture<'a, Message> {
        Box::pin(async move {
            let msg = params.into_message(session_id);
            self.messages.with(|m| {
                m.entry(session_id.to_string())
                    .or_default()
                    .push(msg.clone())
            });
            Ok(msg)
        })
    }

    fn update<'a>(&'a self, message: &'a Message) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.messages.with(|m| -> Result<(), StoreError> {
                let slot = m
                    .get_mut(&message.session_id)
                    .and_then(|list| list.iter_mut().find(|x| x.id == message.id))
                    .ok_or_else(|| StoreError::not_found("message", &message.id))?;
                *slot = message.clone();
                Ok(())
            })
        })
    }

    fn list<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Vec<Message>> {
        Box::pin(async move {
            Ok(self
                .messages
                .get(&session_id.to_string())
                .unwrap_or_default())
        })
    }

    fn delete<'a>(&'a self, message_id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.messages.with(|m| -> Result<(), StoreError> {
                for list in m.values_mut() {
                    if let Some(pos) = list.iter().position(|x| x.id == message_id) {
                        list.remove(pos);
                        return Ok(());
                    }
                }
                Err(StoreError::not_found("message", message_id))
            })
        })
    }
}

impl SessionStore for MemoryStore {
    fn get<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Session> {
        Box::pin(async move {
            self.sessions
                .get(&session_id.to_string())
                .ok_or_else(|| StoreError::not_found("session", session_id))
        })
    }

    fn save<'a>(&'a self, session: &'a Session) -> StoreFuture<'a, Session> {
        Box::pin(async move {
            let mut saved = session.clone();
            saved.updated_at = chrono::Utc::now();
            self.sessions.set(saved.id.clone(), saved.clone());
            Ok(saved)
        })
    }

    fn update_title_and_usage<'a>(&'a self, update: TitleAndUsage<'a>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.sessions.with(|m| -> Result<(), StoreError> {
                let session = m
                    .get_mut(update.session_id)
                    .ok_or_else(|| StoreError::not_found("session", update.session_id))?;
                update.apply(session);
                Ok(())
            })
        })
    }

    fn list_sessions(&self) -> StoreFuture<'_, Vec<Session>> {
        Box::pin(async move {
            let mut sessions: Vec<Session> = self.sessions.copy().into_values().collect();
            sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(sessions)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ContentPart, MessageRole};

    fn text(t: &str) -> Vec<ContentPart> {
        vec![ContentPart::Text { text: t.into() }]
    }

    #[tokio::test]
    async fn create_update_list_delete() {
        let store = MemoryStore::new();
        let mut msg = store
            .create("s1", CreateMessage::new(MessageRole::User, text("hi")))
            .await
            .unwrap();
        msg.append_content(" there");
        store.update(&msg).await.unwrap();

        let listed = store.list("s1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].content(), "hi there");

        store.delete(&msg.id).await.unwrap();
        assert!(store.list("s1").await.unwrap().is_empty());
        assert!(matches!(
            store.delete(&msg.id).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_preserves_creation_order() {
        let store = MemoryStore::new();
        for t in ["a", "b", "c"] {
            store
                .create("s1", CreateMessage::new(MessageRole::User, text(t)))
                .await
                .unwrap();
        }
        let contents: Vec<String> = store
            .list("s1")
            .await
            .unwrap()
            .iter()
            .map(|m| m.content())
            .collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn title_and_usage_update_is_isolated() {
        let store = MemoryStore::new();
        let mut session = Session::with_id("s1", "");
        session.summary_message_id = Some("m9".into());
        session.cost = 1.0;
        store.insert_session(session);

        store
            .update_title_and_usage(TitleAndUsage {
                session_id: "s1",
                title: "Fix the parser",
                prompt_tokens: 10,
                completion_tokens: 5,
                cache_read_tokens: 0,
                cost: 0.5,
            })
            .await
            .unwrap();

        let s = store.get("s1").await.unwrap();
        assert_eq!(s.title, "Fix the parser");
        assert_eq!(s.summary_message_id.as_deref(), Some("m9"));
        assert!((s.cost - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_session_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get("nope").await,
            Err(StoreError::NotFound { entity: "session", .. })
        ));
    }
}
