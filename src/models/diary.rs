//! Diary entry types and identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a precomputed excerpt, in characters.
pub const EXCERPT_MAX_CHARS: usize = 120;

/// Unique identifier for a diary entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiaryId(String);

impl DiaryId {
    /// Creates a new diary ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random diary ID.
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

impl fmt::Display for DiaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DiaryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DiaryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How a diary entry came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiaryKind {
    /// Generated from session history.
    #[default]
    Auto,
    /// Written or edited by hand.
    Manual,
}

impl DiaryKind {
    /// Returns the kind as its storage string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }

    /// Parses a kind string, defaulting unknown values to `Auto`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "manual" => Self::Manual,
            _ => Self::Auto,
        }
    }
}

/// A generated or hand-edited diary entry.
///
/// # Invariants
///
/// - `id` is globally unique and immutable once assigned.
/// - `excerpt` is derived from `payload` at write time by the store; it is
///   never recomputed at read time so list queries stay index-only.
/// - Soft-deleted entries (`is_deleted`) stay physically present until an
///   explicit hard delete but are excluded from every listing and search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiaryEntry {
    /// Unique identifier (primary key).
    pub id: DiaryId,
    /// ISO calendar day the entry covers, e.g. `2026-08-29`.
    pub date: String,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Opaque structured document (rich-text blocks, metadata, ...).
    pub payload: serde_json::Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp.
    pub updated_at: DateTime<Utc>,
    /// Optional mood label.
    #[serde(default)]
    pub mood: Option<String>,
    /// Word count of the payload text, computed at write time.
    #[serde(default)]
    pub word_count: u32,
    /// How the entry came to exist.
    #[serde(default)]
    pub kind: DiaryKind,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Short list-rendering excerpt, computed at write time.
    #[serde(default)]
    pub excerpt: String,
    /// Soft-delete flag.
    #[serde(default)]
    pub is_deleted: bool,
    /// Pinned entries sort before everything else in listings.
    #[serde(default)]
    pub is_pinned: bool,
}

impl DiaryEntry {
    /// Creates a new entry for the given calendar day with a generated id.
    #[must_use]
    pub fn new(date: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: DiaryId::generate(),
            date: date.into(),
            title: String::new(),
            payload,
            created_at: now,
            updated_at: now,
            mood: None,
            word_count: 0,
            kind: DiaryKind::Auto,
            tags: Vec::new(),
            excerpt: String::new(),
            is_deleted: false,
            is_pinned: false,
        }
    }
}

/// Extracts the plain text carried by a diary payload.
///
/// Walks every string value in the document in order. This is the single
/// source both the excerpt and the word count are derived from.
#[must_use]
pub(crate) fn payload_text(payload: &serde_json::Value) -> String {
    fn walk(value: &serde_json::Value, out: &mut Vec<String>) {
        match value {
            serde_json::Value::String(s) => out.push(s.clone()),
            serde_json::Value::Array(items) => {
                for item in items {
                    walk(item, out);
                }
            },
            serde_json::Value::Object(map) => {
                for item in map.values() {
                    walk(item, out);
                }
            },
            _ => {},
        }
    }

    let mut parts = Vec::new();
    walk(payload, &mut parts);
    parts.join(" ")
}

/// Derives the list-rendering excerpt from a payload.
#[must_use]
pub(crate) fn excerpt_from_payload(payload: &serde_json::Value) -> String {
    let text = payload_text(payload);
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(EXCERPT_MAX_CHARS).collect()
}

/// Counts the words carried by a payload.
#[must_use]
pub(crate) fn word_count_of(payload: &serde_json::Value) -> u32 {
    u32::try_from(payload_text(payload).split_whitespace().count()).unwrap_or(u32::MAX)
}
