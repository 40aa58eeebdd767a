//! Note and library data model.
//!
//! All types serialize as camelCase JSON to match the REST and real-time
//! channel payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A live, shareable note.
///
/// `content` is serialized rich-text markup. The core treats it as an opaque
/// string and only ever compares it for equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A content update broadcast over the real-time channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteUpdate {
    pub note_id: String,
    pub content: String,
}

impl NoteUpdate {
    pub fn new(note_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            note_id: note_id.into(),
            content: content.into(),
        }
    }
}

/// A named copy of a note stored in the library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedNote {
    pub id: String,
    pub title: String,
    pub note_id: String,
    pub content: String,
    #[serde(default)]
    pub is_password_protected: bool,
    #[serde(default)]
    pub is_compressed: bool,
    /// Content size in bytes as reported by the server
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set on save responses: `true` when a new entry was created,
    /// `false` when an existing entry for the same note was updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_new: Option<bool>,
}

/// Body of `POST /api/saved-notes`.
///
/// The password is not part of the body; it travels in a request header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveNoteRequest {
    pub title: String,
    pub note_id: String,
    pub content: String,
    pub url: String,
    #[serde(skip)]
    pub password: Option<String>,
}

/// Extract a note id from a pasted share link or a bare id.
///
/// Returns `None` for empty input.
pub fn parse_note_link(link: &str) -> Option<String> {
    let trimmed = link.trim().trim_end_matches('/');
    let id = trimmed.rsplit('/').next()?;
    // Drop any query string or fragment the link may carry
    let id = id.split(['?', '#']).next().unwrap_or_default();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}
