//! Chat session types and identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a chat session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a new session ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random session ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the ID is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// A message typed by the user.
    User,
    /// A model-generated reply.
    Assistant,
    /// System-injected context.
    System,
}

impl MessageRole {
    /// Returns the role as its wire string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    /// Parses a role string, defaulting unknown values to `User`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "assistant" => Self::Assistant,
            "system" => Self::System,
            _ => Self::User,
        }
    }
}

/// A single message inside a chat session.
///
/// Messages are owned by their parent [`Session`] in local storage; the
/// remote replica additionally addresses them individually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique identifier within the owning session.
    pub id: String,
    /// Who authored the message.
    pub role: MessageRole,
    /// The message text.
    pub content: String,
    /// When the message was produced.
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Creates a new message with a generated id and the current time.
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A conversation record.
///
/// # Invariants
///
/// - `id` is unique across all persisted sessions.
/// - `updated_at` is monotonically non-decreasing per `id` across every
///   adapter that touches the session; use [`Session::touch`] rather than
///   assigning `updated_at` directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier.
    pub id: SessionId,
    /// Ordered message history.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Creates an empty session with a generated id.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::generate(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates an empty session with an explicit id.
    #[must_use]
    pub fn with_id(id: impl Into<SessionId>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Bumps `updated_at`, never moving it backwards.
    ///
    /// Clamping to the previous value keeps the monotonicity invariant even
    /// when the wall clock steps backwards between writes.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Inserts or replaces a message by id, bumping `updated_at`.
    pub fn upsert_message(&mut self, message: ChatMessage) {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => self.messages.push(message),
        }
        self.touch();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("user", MessageRole::User)]
    #[test_case("ASSISTANT", MessageRole::Assistant)]
    #[test_case("system", MessageRole::System)]
    #[test_case("something-else", MessageRole::User)]
    fn test_role_parse(input: &str, expected: MessageRole) {
        assert_eq!(MessageRole::parse(input), expected);
    }

    #[test]
    fn test_role_round_trip() {
        for role in [MessageRole::User, MessageRole::Assistant, MessageRole::System] {
            assert_eq!(MessageRole::parse(role.as_str()), role);
        }
    }

    #[test]
    fn test_session_serde_rfc3339() {
        let session = Session::with_id("s1");
        let json = serde_json::to_string(&session).unwrap();
        // Timestamps serialize as ISO-8601 strings, not integers
        assert!(json.contains("created_at\":\""));

        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn test_touch_is_monotonic() {
        let mut session = Session::with_id("s1");
        let before = session.updated_at;
        session.touch();
        assert!(session.updated_at >= before);
    }

    #[test]
    fn test_upsert_message_replaces_by_id() {
        let mut session = Session::with_id("s1");
        let mut msg = ChatMessage::new(MessageRole::User, "hello");
        let id = msg.id.clone();
        session.upsert_message(msg.clone());
        assert_eq!(session.messages.len(), 1);

        msg.content = "hello again".to_string();
        session.upsert_message(msg);
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].id, id);
        assert_eq!(session.messages[0].content, "hello again");
    }

    #[test]
    fn test_upsert_message_appends_new() {
        let mut session = Session::with_id("s1");
        session.upsert_message(ChatMessage::new(MessageRole::User, "one"));
        session.upsert_message(ChatMessage::new(MessageRole::Assistant, "two"));
        assert_eq!(session.messages.len(), 2);
    }
}
