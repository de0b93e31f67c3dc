//! Interchangeable session record stores.
//!
//! One capability trait, [`SessionStore`], with three implementations:
//!
//! - [`LocalSessionStore`] — tiered key/value persistence on this machine
//! - [`RemoteSessionStore`] — every operation is a call to the replica API
//! - [`HybridSessionStore`] — local-first writes with best-effort mirroring
//!
//! The sync orchestrator selects among them at runtime; callers only ever
//! see the trait.

mod hybrid;
mod local;
mod remote;

pub use hybrid::HybridSessionStore;
pub use local::{LocalSessionStore, SESSION_CAP};
pub use remote::{ApiClient, RemoteSessionStore};

use crate::Result;
use crate::models::{ChatMessage, Session, SessionId};
use async_trait::async_trait;

/// Capability set shared by every record-store adapter.
///
/// Implementations must be safe to share behind an `Arc` across tasks.
/// Write operations are idempotent upserts keyed on the record id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Upserts a whole session, messages included.
    async fn save_session(&self, session: &Session) -> Result<()>;

    /// Loads every stored session, most recently updated first.
    async fn load_sessions(&self) -> Result<Vec<Session>>;

    /// Removes a session. Returns `true` if one existed.
    async fn delete_session(&self, id: &SessionId) -> Result<bool>;

    /// Upserts a single message into a session, creating the session if it
    /// does not exist yet.
    async fn save_message(&self, session_id: &SessionId, message: &ChatMessage) -> Result<()>;

    /// Loads the messages of one session in insertion order.
    async fn load_messages(&self, session_id: &SessionId) -> Result<Vec<ChatMessage>>;

    /// Pushes a batch of sessions into this store. Defaults to one upsert
    /// per session; stores with a bulk endpoint override this with a single
    /// request.
    async fn push_sessions(&self, sessions: &[Session]) -> Result<usize> {
        for session in sessions {
            self.save_session(session).await?;
        }
        Ok(sessions.len())
    }

    /// Pushes local state to the replica. Returns the number of sessions
    /// pushed; a no-op (and `Ok(0)`) for purely local stores.
    async fn sync_to_cloud(&self) -> Result<usize>;

    /// Pulls replica state into this store, returning the merged sessions.
    async fn sync_from_cloud(&self) -> Result<Vec<Session>>;

    /// Associates the store with a user identity.
    async fn set_user_id(&self, user_id: &str) -> Result<()>;

    /// Returns the associated user identity, if any.
    async fn user_id(&self) -> Result<Option<String>>;

    /// Short adapter name for logs and metrics.
    fn backend_name(&self) -> &'static str;
}
