//! JSON-file store.
//!
//! Directory layout:
//! ```text
//! root/
//!   sessions/
//!     ses-18c3f2a9b1c-0001.json
//!   messages/
//!     ses-18c3f2a9b1c-0001/
//!       msg-18c3f2a9b20-0002.json
//!       msg-18c3f2a9b31-0003.json
//! ```
//!
//! Every write goes to a temp file first and is then renamed into place.
//! Session read-modify-write cycles are serialized by an async mutex so
//! isolated field updates never lose a concurrent write.

use super::{CreateMessage, MessageStore, SessionStore, StoreFuture, TitleAndUsage};
use crate::error::StoreError;
use crate::message::{Message, generate_id};
use crate::session::Session;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{trace, warn};

pub struct JsonFileStore {
    root: PathBuf,
    session_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("sessions"))?;
        std::fs::create_dir_all(root.join("messages"))?;
        Ok(Self {
            root,
            session_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.root
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.root.join("sessions").join(format!("{session_id}.json"))
    }

    fn messages_dir(&self, session_id: &str) -> PathBuf {
        self.root.join("messages").join(session_id)
    }

    fn message_path(&self, session_id: &str, message_id: &str) -> PathBuf {
        self.messages_dir(session_id).join(format!("{message_id}.json"))
    }

    async fn read_session(&self, session_id: &str) -> Result<Session, StoreError> {
        let path = self.session_path(session_id);
        if !tokio::fs::try_exists(&path).await? {
            return Err(StoreError::not_found("session", session_id));
        }
        read_json(&path).await
    }
}

/// Atomic write: serialize to a temp file, then rename into place.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let tmp = path.with_extension(format!("{}.tmp", generate_id("w")));
    let json = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    trace!("Wrote {}", path.display());
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Read every `*.json` file in `dir`, skipping unreadable entries.
async fn read_dir_json<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    if !tokio::fs::try_exists(dir).await? {
        return Ok(out);
    }
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        match read_json(&path).await {
            Ok(value) => out.push(value),
            Err(e) => warn!("Skipping unreadable {}: {e}", path.display()),
        }
    }
    Ok(out)
}

impl MessageStore for JsonFileStore {
    fn create<'a>(&'a self, session_id: &'a str, params: CreateMessage) -> StoreFuture<'a, Message> {
        Box::pin(async move {
            let msg = params.into_message(session_id);
            write_json(&self.message_path(session_id, &msg.id), &msg).await?;
            Ok(msg)
        })
    }

    fn update<'a>(&'a self, message: &'a Message) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.message_path(&message.session_id, &message.id);
            if !tokio::fs::try_exists(&path).await? {
                return Err(StoreError::not_found("message", &message.id));
            }
            write_json(&path, message).await
        })
    }

    fn list<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Vec<Message>> {
        Box::pin(async move {
            let mut messages: Vec<Message> = read_dir_json(&self.messages_dir(session_id)).await?;
            messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            Ok(messages)
        })
    }

    fn delete<'a>(&'a self, message_id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut sessions = tokio::fs::read_dir(self.root.join("messages")).await?;
            while let Some(entry) = sessions.next_entry().await? {
                let path = entry.path().join(format!("{message_id}.json"));
                if tokio::fs::try_exists(&path).await? {
                    tokio::fs::remove_file(&path).await?;
                    return Ok(());
                }
            }
            Err(StoreError::not_found("message", message_id))
        })
    }
}

impl SessionStore for JsonFileStore {
    fn get<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Session> {
        Box::pin(async move { self.read_session(session_id).await })
    }

    fn save<'a>(&'a self, session: &'a Session) -> StoreFuture<'a, Session> {
        Box::pin(async move {
            let _guard = self.session_lock.lock().await;
            let mut saved = session.clone();
            saved.updated_at = chrono::Utc::now();
            write_json(&self.session_path(&saved.id), &saved).await?;
            Ok(saved)
        })
    }

    fn update_title_and_usage<'a>(&'a self, update: TitleAndUsage<'a>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.session_lock.lock().await;
            let mut session = self.read_session(update.session_id).await?;
            update.apply(&mut session);
            write_json(&self.session_path(update.session_id), &session).await
        })
    }

    fn list_sessions(&self) -> StoreFuture<'_, Vec<Session>> {
        Box::pin(async move {
            let mut sessions: Vec<Session> = read_dir_json(&self.root.join("sessions")).await?;
            sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(sessions)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ContentPart, MessageRole};

    fn user(t: &str) -> CreateMessage {
        CreateMessage::new(MessageRole::User, vec![ContentPart::Text { text: t.into() }])
    }

    #[tokio::test]
    async fn messages_round_trip_through_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(tmp.path()).unwrap();

        let first = store.create("s1", user("one")).await.unwrap();
        let mut second = store.create("s1", user("two")).await.unwrap();
        second.append_content("!");
        store.update(&second).await.unwrap();

        let listed = store.list("s1").await.unwrap();
        let contents: Vec<String> = listed.iter().map(|m| m.content()).collect();
        assert_eq!(contents, vec!["one", "two!"]);

        store.delete(&first.id).await.unwrap();
        assert_eq!(store.list("s1").await.unwrap().len(), 1);
        assert!(store.list("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(tmp.path()).unwrap();
        let msg = store.create("s1", user("x")).await.unwrap();
        store.update(&msg).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(tmp.path().join("messages").join("s1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{}.json", msg.id)]);
    }

    #[tokio::test]
    async fn sessions_save_get_and_update() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(tmp.path()).unwrap();
        let mut session = Session::with_id("s1", "");
        session.summary_message_id = Some("m1".into());
        store.save(&session).await.unwrap();

        store
            .update_title_and_usage(TitleAndUsage {
                session_id: "s1",
                title: "Refactor store",
                prompt_tokens: 100,
                completion_tokens: 20,
                cache_read_tokens: 5,
                cost: 0.25,
            })
            .await
            .unwrap();

        let loaded = store.get("s1").await.unwrap();
        assert_eq!(loaded.title, "Refactor store");
        assert_eq!(loaded.prompt_tokens, 100);
        assert_eq!(loaded.summary_message_id.as_deref(), Some("m1"));
        assert_eq!(store.list_sessions().await.unwrap().len(), 1);

        assert!(matches!(
            store.get("missing").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn updating_unknown_message_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(tmp.path()).unwrap();
        let ghost = user("ghost").into_message("s1");
        assert!(matches!(
            store.update(&ghost).await,
            Err(StoreError::NotFound { .. })
        ));
    }
}
