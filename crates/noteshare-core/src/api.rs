//! `NoteApi` trait: the REST collaborator that stores notes and the library.
//!
//! Implementations:
//! - `InMemoryNoteApi` - For testing
//! - `HttpNoteApi` (in noteshare-client) - Uses reqwest against `/api/...`

use crate::note::{Note, SaveNoteRequest, SavedNote};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Non-2xx response with a message taken from the body (or a fallback).
    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    /// Rejected locally before any request was made.
    #[error("{0}")]
    Validation(String),
}

impl ApiError {
    /// Build an error from a failed response's status and raw body.
    pub fn from_response(status: u16, body: &str) -> Self {
        if status == 404 {
            return ApiError::NotFound(error_message(status, body));
        }
        ApiError::Http {
            status,
            message: error_message(status, body),
        }
    }

    /// HTTP status associated with the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::NotFound(_) => Some(404),
            _ => None,
        }
    }

    /// Whether a caller may retry the request with backoff.
    ///
    /// 429, 5xx, timeouts and network failures are transient. 401/403/404,
    /// 413 and validation errors are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Http { status, .. } => *status == 429 || *status >= 500,
            ApiError::Timeout | ApiError::Network(_) => true,
            ApiError::NotFound(_) | ApiError::Decode(_) | ApiError::Validation(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// User-facing message for a failed response.
///
/// Prefers a JSON `message` or `error` field, then a short plain-text body,
/// and finally falls back to a status-derived message.
pub fn error_message(status: u16, body: &str) -> String {
    let body = body.trim();
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(msg) = parsed.message.or(parsed.error).filter(|m| !m.is_empty()) {
            return msg;
        }
    } else if !body.is_empty() && !body.starts_with('{') && !body.starts_with('<') && body.len() <= 200 {
        return body.to_string();
    }
    format!("HTTP error! status: {}", status)
}

/// REST collaborator for notes and the saved-note library.
#[async_trait]
pub trait NoteApi: Send + Sync {
    /// `POST /api/notes`
    async fn create_note(&self, content: &str) -> Result<Note>;

    /// `GET /api/notes/{id}`; `Ok(None)` on 404.
    async fn get_note(&self, id: &str) -> Result<Option<Note>>;

    /// `PUT /api/notes/{id}`
    async fn update_note(&self, id: &str, content: &str) -> Result<()>;

    /// `GET /api/saved-notes/check/{noteId}`; `Ok(None)` on 404.
    async fn check_saved_note(&self, note_id: &str) -> Result<Option<SavedNote>>;

    /// `POST /api/saved-notes`, password in a header.
    async fn save_note(&self, request: &SaveNoteRequest) -> Result<SavedNote>;

    /// `GET /api/saved-notes`
    async fn list_saved_notes(&self) -> Result<Vec<SavedNote>>;

    /// `DELETE /api/saved-notes/{id}`, password in a header for protected entries.
    async fn delete_saved_note(&self, id: &str, password: Option<&str>) -> Result<()>;
}

struct StoredEntry {
    saved: SavedNote,
    password: Option<String>,
}

/// In-memory REST collaborator for testing.
///
/// Saving with a `note_id` that already has an entry updates that entry
/// (`is_new == Some(false)`) instead of creating a duplicate.
#[derive(Default)]
pub struct InMemoryNoteApi {
    notes: RwLock<HashMap<String, Note>>,
    library: RwLock<Vec<StoredEntry>>,
    /// Errors returned (in order) by the next calls to `update_note`
    update_failures: Mutex<VecDeque<ApiError>>,
    /// Artificial latency applied to `get_note`
    get_latency: Mutex<Option<Duration>>,
    get_calls: AtomicUsize,
    update_calls: AtomicUsize,
    next_saved_id: AtomicUsize,
}

impl InMemoryNoteApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a note directly, bypassing `create_note`.
    pub fn insert_note(&self, id: &str, content: &str) -> Note {
        let now = Utc::now();
        let note = Note {
            id: id.to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.notes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), note.clone());
        note
    }

    /// Content currently stored for `id`.
    pub fn stored_content(&self, id: &str) -> Option<String> {
        self.notes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|n| n.content.clone())
    }

    /// Make the next `update_note` call fail with `error`.
    pub fn fail_next_update(&self, error: ApiError) {
        self.update_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(error);
    }

    pub fn set_get_latency(&self, latency: Option<Duration>) {
        *self.get_latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn library_len(&self) -> usize {
        self.library.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl NoteApi for InMemoryNoteApi {
    async fn create_note(&self, content: &str) -> Result<Note> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Ok(self.insert_note(&id, content))
    }

    async fn get_note(&self, id: &str) -> Result<Option<Note>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.get_latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self
            .notes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    async fn update_note(&self, id: &str, content: &str) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self
            .update_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return Err(err);
        }

        let mut notes = self.notes.write().unwrap_or_else(|e| e.into_inner());
        let note = notes
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("Note {} not found", id)))?;
        note.content = content.to_string();
        note.updated_at = Utc::now();
        Ok(())
    }

    async fn check_saved_note(&self, note_id: &str) -> Result<Option<SavedNote>> {
        Ok(self
            .library
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|e| e.saved.note_id == note_id)
            .map(|e| e.saved.clone()))
    }

    async fn save_note(&self, request: &SaveNoteRequest) -> Result<SavedNote> {
        let now = Utc::now();
        let mut library = self.library.write().unwrap_or_else(|e| e.into_inner());

        if let Some(entry) = library
            .iter_mut()
            .find(|e| e.saved.note_id == request.note_id)
        {
            entry.saved.title = request.title.clone();
            entry.saved.content = request.content.clone();
            entry.saved.size = request.content.len() as u64;
            entry.saved.updated_at = now;
            if let Some(password) = request.password.as_ref().filter(|p| !p.is_empty()) {
                entry.password = Some(password.clone());
                entry.saved.is_password_protected = true;
            }
            let mut saved = entry.saved.clone();
            saved.is_new = Some(false);
            return Ok(saved);
        }

        let id = self.next_saved_id.fetch_add(1, Ordering::SeqCst) + 1;
        let password = request.password.clone().filter(|p| !p.is_empty());
        let saved = SavedNote {
            id: format!("saved-{}", id),
            title: request.title.clone(),
            note_id: request.note_id.clone(),
            content: request.content.clone(),
            is_password_protected: password.is_some(),
            is_compressed: false,
            size: request.content.len() as u64,
            url: Some(request.url.clone()),
            created_at: now,
            updated_at: now,
            is_new: None,
        };
        library.push(StoredEntry {
            saved: saved.clone(),
            password,
        });
        Ok(SavedNote {
            is_new: Some(true),
            ..saved
        })
    }

    async fn list_saved_notes(&self) -> Result<Vec<SavedNote>> {
        Ok(self
            .library
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.saved.clone())
            .collect())
    }

    async fn delete_saved_note(&self, id: &str, password: Option<&str>) -> Result<()> {
        let mut library = self.library.write().unwrap_or_else(|e| e.into_inner());
        let index = library
            .iter()
            .position(|e| e.saved.id == id)
            .ok_or_else(|| ApiError::NotFound(format!("Saved note {} not found", id)))?;

        if let Some(expected) = &library[index].password {
            if password != Some(expected.as_str()) {
                return Err(ApiError::Http {
                    status: 403,
                    message: "Invalid password".into(),
                });
            }
        }
        library.remove(index);
        Ok(())
    }
}
