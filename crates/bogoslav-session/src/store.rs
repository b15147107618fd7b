//! In-memory session store.

use crate::persist;
use crate::types::{Role, Session, SessionKey, SessionTurn};
use crate::SessionError;
use bogoslav_common_core::DirectiveId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Shared store of all sessions.
///
/// Each session has its own lock, so appends to one session are serialized
/// while different sessions proceed independently.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionKey, Arc<Mutex<Session>>>>,
    persist_dir: Option<PathBuf>,
}

impl SessionStore {
    /// Store without persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that saves transcripts under `dir`.
    pub fn with_persistence(dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions: RwLock::default(),
            persist_dir: Some(dir.into()),
        }
    }

    pub fn persist_dir(&self) -> Option<&Path> {
        self.persist_dir.as_deref()
    }

    async fn session(&self, key: &SessionKey) -> Arc<Mutex<Session>> {
        if let Some(session) = self.sessions.read().await.get(key) {
            return Arc::clone(session);
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(key.clone()).or_insert_with(|| {
            debug!(session = %key, "creating session on first append");
            Arc::new(Mutex::new(Session::new(key.clone())))
        });
        Arc::clone(session)
    }

    /// Append a turn, creating the session if it does not exist yet.
    pub async fn append(
        &self,
        key: &SessionKey,
        role: Role,
        content: impl Into<String>,
        directive: Option<DirectiveId>,
    ) -> SessionTurn {
        let session = self.session(key).await;
        let mut session = session.lock().await;
        let turn = session.push(role, content.into(), directive);
        debug!(session = %key, ordinal = turn.ordinal, role = ?role, "turn recorded");
        turn
    }

    /// Ordered turns of a session. Empty when the session does not exist.
    pub async fn history(&self, key: &SessionKey) -> Vec<SessionTurn> {
        let session = self.sessions.read().await.get(key).cloned();
        match session {
            Some(session) => session.lock().await.turns.clone(),
            None => Vec::new(),
        }
    }

    /// Drop a session. Returns whether it existed.
    pub async fn reset(&self, key: &SessionKey) -> bool {
        let removed = self.sessions.write().await.remove(key).is_some();
        if removed {
            info!(session = %key, "session reset");
        }
        removed
    }

    pub async fn keys(&self) -> Vec<SessionKey> {
        let mut keys: Vec<_> = self.sessions.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Write every session to the persistence directory.
    ///
    /// Returns the number of sessions written; zero without persistence.
    pub async fn save(&self) -> Result<usize, SessionError> {
        let Some(dir) = self.persist_dir.as_deref() else {
            return Ok(0);
        };

        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        let mut written = 0;
        for session in sessions {
            let session = session.lock().await;
            if session.turns.is_empty() {
                continue;
            }
            persist::save_session(dir, &session)?;
            written += 1;
        }

        info!(dir = %dir.display(), sessions = written, "sessions saved");
        Ok(written)
    }

    /// Load transcripts from the persistence directory.
    ///
    /// Sessions already in memory are left untouched.
    pub async fn load(&self) -> Result<usize, SessionError> {
        let Some(dir) = self.persist_dir.as_deref() else {
            return Ok(0);
        };

        let loaded = persist::load_sessions(dir)?;
        let mut sessions = self.sessions.write().await;
        let mut count = 0;
        for session in loaded {
            if sessions.contains_key(&session.key) {
                continue;
            }
            sessions.insert(session.key.clone(), Arc::new(Mutex::new(session)));
            count += 1;
        }

        info!(dir = %dir.display(), sessions = count, "sessions loaded");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_auto_creates_session() {
        let store = SessionStore::new();
        let key = SessionKey::named("fresh");
        assert!(store.history(&key).await.is_empty());

        let turn = store.append(&key, Role::User, "hello", None).await;
        assert_eq!(turn.ordinal, 1);
        assert_eq!(store.history(&key).await, vec![turn]);
    }

    #[tokio::test]
    async fn test_history_is_ordered() {
        let store = SessionStore::new();
        let key = SessionKey::named("ordered");
        let directive = DirectiveId::new();

        store.append(&key, Role::User, "q1", Some(directive)).await;
        store.append(&key, Role::Model, "a1", Some(directive)).await;
        store.append(&key, Role::User, "q2", None).await;

        let history = store.history(&key).await;
        let contents: Vec<_> = history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["q1", "a1", "q2"]);
        let ordinals: Vec<_> = history.iter().map(|t| t.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
        assert_eq!(history[0].directive, Some(directive));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_get_unique_increasing_ordinals() {
        let store = Arc::new(SessionStore::new());
        let key = SessionKey::named("busy");

        let mut handles = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store.append(&key, Role::User, format!("turn {i}"), None).await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let ordinals: Vec<_> = store.history(&key).await.iter().map(|t| t.ordinal).collect();
        assert_eq!(ordinals, (1..=50).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_reset_clears_history_and_restarts_ordinals() {
        let store = SessionStore::new();
        let key = SessionKey::named("reset-me");
        store.append(&key, Role::User, "old", None).await;

        assert!(store.reset(&key).await);
        assert!(!store.reset(&key).await);
        assert!(store.history(&key).await.is_empty());

        let turn = store.append(&key, Role::User, "new", None).await;
        assert_eq!(turn.ordinal, 1);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let store = SessionStore::new();
        let a = SessionKey::named("a");
        let b = SessionKey::named("b");
        store.append(&a, Role::User, "for a", None).await;
        let turn = store.append(&b, Role::User, "for b", None).await;

        assert_eq!(turn.ordinal, 1);
        assert_eq!(store.keys().await, vec![a, b]);
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let key = SessionKey::for_file(Path::new("/work/notes.md"));

        let store = SessionStore::with_persistence(dir.path());
        store.append(&key, Role::User, "question", None).await;
        store.append(&key, Role::Model, "answer", None).await;
        store.append(&SessionKey::named("empty-after-reset"), Role::User, "x", None).await;
        store.reset(&SessionKey::named("empty-after-reset")).await;
        assert_eq!(store.save().await.unwrap(), 1);

        let restored = SessionStore::with_persistence(dir.path());
        assert_eq!(restored.load().await.unwrap(), 1);
        let history = restored.history(&key).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "answer");

        let next = restored.append(&key, Role::User, "follow-up", None).await;
        assert_eq!(next.ordinal, 3);
    }

    #[tokio::test]
    async fn test_without_persistence_save_is_noop() {
        let store = SessionStore::new();
        store.append(&SessionKey::named("s"), Role::User, "x", None).await;
        assert_eq!(store.save().await.unwrap(), 0);
        assert_eq!(store.load().await.unwrap(), 0);
    }
}
