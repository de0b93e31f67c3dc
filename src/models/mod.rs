//! Data model types.

mod diary;
mod session;

pub use diary::{DiaryEntry, DiaryId, DiaryKind, EXCERPT_MAX_CHARS};
pub(crate) use diary::{excerpt_from_payload, word_count_of};
pub use session::{ChatMessage, MessageRole, Session, SessionId};
