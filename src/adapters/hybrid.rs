//! Hybrid adapter: local-first writes with best-effort remote mirroring.

use super::local::LocalSessionStore;
use super::remote::{ApiClient, RemoteSessionStore};
use super::SessionStore;
use crate::models::{ChatMessage, Session, SessionId};
use crate::Result;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::instrument;

type MirrorFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Session store that writes locally first and mirrors to the replica in
/// the background.
///
/// The replica is probed exactly once, at construction. If the probe fails
/// the store runs in local-only mode for its whole lifetime; a later
/// reconnect means building a new store (the sync orchestrator does this on
/// every settings change). Mirror failures are logged and counted, never
/// surfaced to the caller.
pub struct HybridSessionStore {
    local: LocalSessionStore,
    remote: Arc<dyn SessionStore>,
    remote_healthy: bool,
}

impl HybridSessionStore {
    /// Probes the replica once and builds the store.
    ///
    /// A failed probe is not an error; the store simply starts degraded.
    pub async fn connect(local: LocalSessionStore, api: ApiClient) -> Self {
        let remote_healthy = match api.health().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Replica probe failed, running local-only");
                metrics::counter!("hybrid_probe_failures_total").increment(1);
                false
            },
        };

        Self::from_parts(local, Arc::new(RemoteSessionStore::new(api)), remote_healthy)
    }

    /// Assembles a store from explicit parts. The remote side is a trait
    /// object so tests can substitute their own replica.
    #[must_use]
    pub fn from_parts(
        local: LocalSessionStore,
        remote: Arc<dyn SessionStore>,
        remote_healthy: bool,
    ) -> Self {
        Self {
            local,
            remote,
            remote_healthy,
        }
    }

    /// Returns whether the construction-time probe succeeded.
    #[must_use]
    pub const fn remote_healthy(&self) -> bool {
        self.remote_healthy
    }

    /// Fire-and-forget mirror of one remote call, outcome logged only.
    fn mirror<F>(&self, operation: &'static str, call: F)
    where
        F: FnOnce(Arc<dyn SessionStore>) -> MirrorFuture + Send + 'static,
    {
        if !self.remote_healthy {
            return;
        }

        let remote = Arc::clone(&self.remote);
        tokio::spawn(async move {
            if let Err(e) = call(remote).await {
                tracing::warn!(operation, error = %e, "Remote mirror failed");
                metrics::counter!("hybrid_mirror_failures_total", "operation" => operation)
                    .increment(1);
            }
        });
    }
}

#[async_trait]
impl SessionStore for HybridSessionStore {
    #[instrument(skip(self, session), fields(operation = "save_session", backend = "hybrid", session.id = %session.id))]
    async fn save_session(&self, session: &Session) -> Result<()> {
        self.local.save_session(session).await?;

        let mirrored = session.clone();
        self.mirror("save_session", move |remote| {
            Box::pin(async move { remote.save_session(&mirrored).await })
        });
        Ok(())
    }

    #[instrument(skip(self), fields(operation = "load_sessions", backend = "hybrid"))]
    async fn load_sessions(&self) -> Result<Vec<Session>> {
        let local = self.local.load_sessions().await?;
        if !local.is_empty() || !self.remote_healthy {
            return Ok(local);
        }

        // Empty local store: backfill from the replica if it answers
        match self.remote.load_sessions().await {
            Ok(remote_sessions) => {
                for session in &remote_sessions {
                    self.local.save_session(session).await?;
                }
                Ok(remote_sessions)
            },
            Err(e) => {
                tracing::warn!(error = %e, "Replica backfill failed, serving local state");
                Ok(local)
            },
        }
    }

    #[instrument(skip(self), fields(operation = "delete_session", backend = "hybrid", session.id = %id))]
    async fn delete_session(&self, id: &SessionId) -> Result<bool> {
        let deleted = self.local.delete_session(id).await?;

        let mirrored = id.clone();
        self.mirror("delete_session", move |remote| {
            Box::pin(async move { remote.delete_session(&mirrored).await.map(|_| ()) })
        });
        Ok(deleted)
    }

    #[instrument(skip(self, message), fields(operation = "save_message", backend = "hybrid", session.id = %session_id))]
    async fn save_message(&self, session_id: &SessionId, message: &ChatMessage) -> Result<()> {
        self.local.save_message(session_id, message).await?;

        let (sid, msg) = (session_id.clone(), message.clone());
        self.mirror("save_message", move |remote| {
            Box::pin(async move { remote.save_message(&sid, &msg).await })
        });
        Ok(())
    }

    #[instrument(skip(self), fields(operation = "load_messages", backend = "hybrid", session.id = %session_id))]
    async fn load_messages(&self, session_id: &SessionId) -> Result<Vec<ChatMessage>> {
        let local = self.local.load_messages(session_id).await?;
        if !local.is_empty() || !self.remote_healthy {
            return Ok(local);
        }

        match self.remote.load_messages(session_id).await {
            Ok(remote_messages) => {
                for message in &remote_messages {
                    self.local.save_message(session_id, message).await?;
                }
                Ok(remote_messages)
            },
            Err(e) => {
                tracing::warn!(error = %e, "Replica message backfill failed");
                Ok(local)
            },
        }
    }

    /// Pushes the whole local session list to the replica in one batch.
    #[instrument(skip(self), fields(operation = "sync_to_cloud", backend = "hybrid"))]
    async fn sync_to_cloud(&self) -> Result<usize> {
        if !self.remote_healthy {
            return Ok(0);
        }

        let sessions = self.local.load_sessions().await?;
        self.remote.push_sessions(&sessions).await
    }

    /// Merges replica state into the local store, newest `updated_at` wins.
    #[instrument(skip(self), fields(operation = "sync_from_cloud", backend = "hybrid"))]
    async fn sync_from_cloud(&self) -> Result<Vec<Session>> {
        if !self.remote_healthy {
            return self.local.load_sessions().await;
        }

        let remote_sessions = self.remote.load_sessions().await?;
        let local_sessions = self.local.load_sessions().await?;

        for remote_session in remote_sessions {
            let keep_local = local_sessions
                .iter()
                .any(|l| l.id == remote_session.id && l.updated_at >= remote_session.updated_at);
            if !keep_local {
                self.local.save_session(&remote_session).await?;
            }
        }

        self.local.load_sessions().await
    }

    async fn set_user_id(&self, user_id: &str) -> Result<()> {
        self.local.set_user_id(user_id).await?;

        let mirrored = user_id.to_string();
        self.mirror("set_user_id", move |remote| {
            Box::pin(async move { remote.set_user_id(&mirrored).await })
        });
        Ok(())
    }

    async fn user_id(&self) -> Result<Option<String>> {
        self.local.user_id().await
    }

    fn backend_name(&self) -> &'static str {
        "hybrid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageRole;
    use crate::storage::TieredKv;
    use crate::Error;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn local_store() -> LocalSessionStore {
        let dir = tempfile::tempdir().unwrap();
        let kv = TieredKv::open(dir.path()).unwrap();
        std::mem::forget(dir);
        LocalSessionStore::new(kv)
    }

    /// In-memory stand-in for the replica.
    #[derive(Default)]
    struct FakeRemote {
        sessions: Mutex<Vec<Session>>,
        failing: AtomicBool,
        batch_pushes: AtomicUsize,
    }

    impl FakeRemote {
        fn check(&self) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::RemoteUnavailable("injected".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SessionStore for FakeRemote {
        async fn save_session(&self, session: &Session) -> Result<()> {
            self.check()?;
            let mut sessions = self.sessions.lock().unwrap();
            sessions.retain(|s| s.id != session.id);
            sessions.push(session.clone());
            Ok(())
        }

        async fn load_sessions(&self) -> Result<Vec<Session>> {
            self.check()?;
            Ok(self.sessions.lock().unwrap().clone())
        }

        async fn delete_session(&self, id: &SessionId) -> Result<bool> {
            self.check()?;
            let mut sessions = self.sessions.lock().unwrap();
            let before = sessions.len();
            sessions.retain(|s| s.id != *id);
            Ok(sessions.len() != before)
        }

        async fn save_message(&self, session_id: &SessionId, message: &ChatMessage) -> Result<()> {
            self.check()?;
            let mut sessions = self.sessions.lock().unwrap();
            if let Some(session) = sessions.iter_mut().find(|s| s.id == *session_id) {
                session.upsert_message(message.clone());
            } else {
                let mut session = Session::with_id(session_id.clone());
                session.upsert_message(message.clone());
                sessions.push(session);
            }
            Ok(())
        }

        async fn load_messages(&self, session_id: &SessionId) -> Result<Vec<ChatMessage>> {
            self.check()?;
            Ok(self
                .sessions
                .lock()
                .unwrap()
                .iter()
                .find(|s| s.id == *session_id)
                .map(|s| s.messages.clone())
                .unwrap_or_default())
        }

        async fn push_sessions(&self, sessions: &[Session]) -> Result<usize> {
            self.check()?;
            self.batch_pushes.fetch_add(1, Ordering::SeqCst);
            let mut stored = self.sessions.lock().unwrap();
            for session in sessions {
                stored.retain(|s| s.id != session.id);
                stored.push(session.clone());
            }
            Ok(sessions.len())
        }

        async fn sync_to_cloud(&self) -> Result<usize> {
            Ok(0)
        }

        async fn sync_from_cloud(&self) -> Result<Vec<Session>> {
            self.load_sessions().await
        }

        async fn set_user_id(&self, _user_id: &str) -> Result<()> {
            self.check()
        }

        async fn user_id(&self) -> Result<Option<String>> {
            Ok(None)
        }

        fn backend_name(&self) -> &'static str {
            "fake"
        }
    }

    async fn settle() {
        // Give spawned mirror tasks a chance to run
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_write_lands_locally_and_mirrors() {
        let remote = Arc::new(FakeRemote::default());
        let store = HybridSessionStore::from_parts(local_store(), remote.clone(), true);

        let session = Session::new();
        store.save_session(&session).await.unwrap();
        settle().await;

        assert_eq!(store.local.load_sessions().await.unwrap().len(), 1);
        assert_eq!(remote.sessions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_probe_stays_local_only() {
        let remote = Arc::new(FakeRemote::default());
        let store = HybridSessionStore::from_parts(local_store(), remote.clone(), false);

        let session = Session::new();
        store.save_session(&session).await.unwrap();
        settle().await;

        assert_eq!(store.local.load_sessions().await.unwrap().len(), 1);
        assert!(remote.sessions.lock().unwrap().is_empty());
        assert!(!store.remote_healthy());
    }

    #[tokio::test]
    async fn test_mirror_failure_never_surfaces() {
        let remote = Arc::new(FakeRemote::default());
        remote.failing.store(true, Ordering::SeqCst);
        let store = HybridSessionStore::from_parts(local_store(), remote.clone(), true);

        store.save_session(&Session::new()).await.unwrap();
        settle().await;

        assert_eq!(store.local.load_sessions().await.unwrap().len(), 1);
        assert!(remote.sessions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_local_backfills_from_remote() {
        let remote = Arc::new(FakeRemote::default());
        let replica_session = Session::new();
        remote.sessions.lock().unwrap().push(replica_session.clone());

        let store = HybridSessionStore::from_parts(local_store(), remote.clone(), true);

        let loaded = store.load_sessions().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, replica_session.id);

        // Backfilled sessions survive a replica outage
        remote.failing.store(true, Ordering::SeqCst);
        assert_eq!(store.load_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_message_read_falls_back_to_remote() {
        let remote = Arc::new(FakeRemote::default());
        let id = SessionId::new("s1");
        remote
            .save_message(&id, &ChatMessage::new(MessageRole::Assistant, "from replica"))
            .await
            .unwrap();

        let store = HybridSessionStore::from_parts(local_store(), remote, true);

        let messages = store.load_messages(&id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "from replica");
    }

    #[tokio::test]
    async fn test_sync_to_cloud_pushes_one_batch() {
        let remote = Arc::new(FakeRemote::default());
        let store = HybridSessionStore::from_parts(local_store(), remote.clone(), true);

        // Seed local directly to avoid the write-path mirroring
        store.local.save_session(&Session::new()).await.unwrap();
        store.local.save_session(&Session::new()).await.unwrap();

        assert_eq!(store.sync_to_cloud().await.unwrap(), 2);
        assert_eq!(remote.sessions.lock().unwrap().len(), 2);
        // Both sessions travel in a single bulk request
        assert_eq!(remote.batch_pushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sync_from_cloud_newest_wins() {
        let remote = Arc::new(FakeRemote::default());
        let store = HybridSessionStore::from_parts(local_store(), remote.clone(), true);

        let mut shared = Session::new();
        shared.updated_at = Utc::now();
        store.local.save_session(&shared).await.unwrap();

        // The replica has an older copy and one session we lack
        let mut stale = shared.clone();
        stale.upsert_message(ChatMessage::new(MessageRole::User, "stale"));
        stale.updated_at = shared.updated_at - ChronoDuration::hours(1);
        remote.sessions.lock().unwrap().push(stale);
        remote.sessions.lock().unwrap().push(Session::new());

        let merged = store.sync_from_cloud().await.unwrap();
        assert_eq!(merged.len(), 2);
        let ours = merged.iter().find(|s| s.id == shared.id).unwrap();
        assert!(ours.messages.is_empty(), "local newer copy must win");
    }

    #[tokio::test]
    async fn test_sync_noops_when_probe_failed() {
        let remote = Arc::new(FakeRemote::default());
        let store = HybridSessionStore::from_parts(local_store(), remote, false);

        store.save_session(&Session::new()).await.unwrap();
        assert_eq!(store.sync_to_cloud().await.unwrap(), 0);
        assert_eq!(store.sync_from_cloud().await.unwrap().len(), 1);
    }
}
