//! Local adapter on top of the tiered key/value store.

use super::SessionStore;
use crate::models::{ChatMessage, Session, SessionId};
use crate::storage::{KvBackend, TieredKv};
use crate::{Error, Result};
use async_trait::async_trait;
use tracing::instrument;

/// Key holding the serialized session list.
const SESSIONS_KEY: &str = "chat-sessions";
/// Key holding the associated user identity.
const USER_ID_KEY: &str = "user-id";

/// Maximum number of sessions retained locally; older sessions are evicted
/// least-recently-updated first.
pub const SESSION_CAP: usize = 100;

/// Session store backed entirely by the local tiered key/value facade.
///
/// Sessions are kept as one serialized list under a single key, so every
/// operation is a read-modify-write against whichever tier is live. Sync
/// operations are no-ops here; the local store is its own source of truth.
pub struct LocalSessionStore {
    kv: TieredKv,
}

impl LocalSessionStore {
    /// Creates a local store over an already-opened tiered facade.
    #[must_use]
    pub const fn new(kv: TieredKv) -> Self {
        Self { kv }
    }

    /// Returns whether the primary storage tier is still live.
    #[must_use]
    pub fn primary_available(&self) -> bool {
        self.kv.primary_available()
    }

    pub(crate) fn read_sessions(&self) -> Result<Vec<Session>> {
        let Some(raw) = self.kv.get(SESSIONS_KEY)? else {
            return Ok(Vec::new());
        };

        serde_json::from_str(&raw).map_err(|e| Error::OperationFailed {
            operation: "deserialize_sessions".to_string(),
            cause: e.to_string(),
        })
    }

    pub(crate) fn write_sessions(&self, sessions: &[Session]) -> Result<()> {
        let raw = serde_json::to_string(sessions).map_err(|e| Error::OperationFailed {
            operation: "serialize_sessions".to_string(),
            cause: e.to_string(),
        })?;
        self.kv.set(SESSIONS_KEY, &raw)
    }

    /// Upserts into the list, newest-updated first, evicting past the cap.
    fn upsert_and_cap(sessions: &mut Vec<Session>, session: Session) {
        if let Some(existing) = sessions.iter_mut().find(|s| s.id == session.id) {
            *existing = session;
        } else {
            sessions.push(session);
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        if sessions.len() > SESSION_CAP {
            let evicted = sessions.len() - SESSION_CAP;
            sessions.truncate(SESSION_CAP);
            metrics::counter!("sessions_evicted_total").increment(evicted as u64);
            tracing::debug!(evicted, "Evicted least-recently-updated sessions");
        }
    }
}

#[async_trait]
impl SessionStore for LocalSessionStore {
    #[instrument(skip(self, session), fields(operation = "save_session", backend = "local", session.id = %session.id))]
    async fn save_session(&self, session: &Session) -> Result<()> {
        if session.id.is_empty() {
            return Err(Error::InvalidInput("session is missing an id".to_string()));
        }

        let mut sessions = self.read_sessions()?;
        Self::upsert_and_cap(&mut sessions, session.clone());
        self.write_sessions(&sessions)
    }

    #[instrument(skip(self), fields(operation = "load_sessions", backend = "local"))]
    async fn load_sessions(&self) -> Result<Vec<Session>> {
        self.read_sessions()
    }

    #[instrument(skip(self), fields(operation = "delete_session", backend = "local", session.id = %id))]
    async fn delete_session(&self, id: &SessionId) -> Result<bool> {
        let mut sessions = self.read_sessions()?;
        let before = sessions.len();
        sessions.retain(|s| s.id != *id);

        if sessions.len() == before {
            return Ok(false);
        }

        self.write_sessions(&sessions)?;
        Ok(true)
    }

    #[instrument(skip(self, message), fields(operation = "save_message", backend = "local", session.id = %session_id))]
    async fn save_message(&self, session_id: &SessionId, message: &ChatMessage) -> Result<()> {
        if session_id.is_empty() {
            return Err(Error::InvalidInput("session id is empty".to_string()));
        }

        let mut sessions = self.read_sessions()?;
        let mut session = sessions
            .iter()
            .find(|s| s.id == *session_id)
            .cloned()
            .unwrap_or_else(|| Session::with_id(session_id.clone()));
        session.upsert_message(message.clone());

        // The bumped updated_at must re-sort the list, same as save_session
        Self::upsert_and_cap(&mut sessions, session);
        self.write_sessions(&sessions)
    }

    #[instrument(skip(self), fields(operation = "load_messages", backend = "local", session.id = %session_id))]
    async fn load_messages(&self, session_id: &SessionId) -> Result<Vec<ChatMessage>> {
        let sessions = self.read_sessions()?;
        Ok(sessions
            .into_iter()
            .find(|s| s.id == *session_id)
            .map(|s| s.messages)
            .unwrap_or_default())
    }

    /// The local store has nowhere to push to.
    async fn sync_to_cloud(&self) -> Result<usize> {
        Ok(0)
    }

    /// Pulling from the cloud in local mode just returns local state.
    async fn sync_from_cloud(&self) -> Result<Vec<Session>> {
        self.read_sessions()
    }

    async fn set_user_id(&self, user_id: &str) -> Result<()> {
        self.kv.set(USER_ID_KEY, user_id)
    }

    async fn user_id(&self) -> Result<Option<String>> {
        self.kv.get(USER_ID_KEY)
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageRole;
    use chrono::{Duration, Utc};

    fn store() -> LocalSessionStore {
        let dir = tempfile::tempdir().unwrap();
        let kv = TieredKv::open(dir.path()).unwrap();
        // Databases live in memory of the leaked tempdir for the test's life
        std::mem::forget(dir);
        LocalSessionStore::new(kv)
    }

    fn message(content: &str) -> ChatMessage {
        ChatMessage::new(MessageRole::User, content)
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let store = store();
        let mut session = Session::new();
        session.upsert_message(message("hello"));

        store.save_session(&session).await.unwrap();

        let loaded = store.load_sessions().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, session.id);
        assert_eq!(loaded[0].messages.len(), 1);
        assert_eq!(loaded[0].messages[0].content, "hello");
    }

    #[tokio::test]
    async fn test_save_session_rejects_empty_id() {
        let store = store();
        let session = Session::with_id(SessionId::new(""));
        assert!(matches!(
            store.save_session(&session).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_session() {
        let store = store();
        let session = Session::new();
        store.save_session(&session).await.unwrap();

        assert!(store.delete_session(&session.id).await.unwrap());
        assert!(!store.delete_session(&session.id).await.unwrap());
        assert!(store.load_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_message_creates_session() {
        let store = store();
        let id = SessionId::new("s1");

        store.save_message(&id, &message("first")).await.unwrap();

        let messages = store.load_messages(&id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "first");
    }

    #[tokio::test]
    async fn test_save_message_upserts_by_id() {
        let store = store();
        let id = SessionId::new("s1");
        let mut msg = message("draft");
        store.save_message(&id, &msg).await.unwrap();

        msg.content = "final".to_string();
        store.save_message(&id, &msg).await.unwrap();

        let messages = store.load_messages(&id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "final");
    }

    #[tokio::test]
    async fn test_save_message_moves_session_to_front() {
        let store = store();
        let now = Utc::now();

        let mut older = Session::with_id(SessionId::new("older"));
        older.updated_at = now - Duration::hours(2);
        store.save_session(&older).await.unwrap();

        let mut newer = Session::with_id(SessionId::new("newer"));
        newer.updated_at = now - Duration::hours(1);
        store.save_session(&newer).await.unwrap();

        // Appending bumps updated_at, so the list must re-sort
        store.save_message(&older.id, &message("ping")).await.unwrap();

        let sessions = store.load_sessions().await.unwrap();
        assert_eq!(sessions[0].id.as_str(), "older");
        assert_eq!(sessions[1].id.as_str(), "newer");
    }

    #[tokio::test]
    async fn test_cap_evicts_least_recently_updated() {
        let store = store();
        let now = Utc::now();

        for i in 0..=SESSION_CAP {
            let mut session = Session::with_id(SessionId::new(format!("s{i:03}")));
            session.updated_at = now + Duration::seconds(i as i64);
            store.save_session(&session).await.unwrap();
        }

        let sessions = store.load_sessions().await.unwrap();
        assert_eq!(sessions.len(), SESSION_CAP);
        // s000 had the oldest updated_at and is gone
        assert!(!sessions.iter().any(|s| s.id.as_str() == "s000"));
        // Newest first
        assert_eq!(sessions[0].id.as_str(), &format!("s{SESSION_CAP:03}"));
    }

    #[tokio::test]
    async fn test_user_id_round_trip() {
        let store = store();
        assert!(store.user_id().await.unwrap().is_none());

        store.set_user_id("user-42").await.unwrap();
        assert_eq!(store.user_id().await.unwrap().as_deref(), Some("user-42"));
    }

    #[tokio::test]
    async fn test_sync_is_noop() {
        let store = store();
        store.save_session(&Session::new()).await.unwrap();

        assert_eq!(store.sync_to_cloud().await.unwrap(), 0);
        assert_eq!(store.sync_from_cloud().await.unwrap().len(), 1);
    }
}
