//! Saving notes to the library.
//!
//! A note has at most one library entry. Saving a note that already has one
//! updates it in place, keeping its title.

use crate::api::{ApiError, NoteApi};
use crate::note::{SaveNoteRequest, SavedNote};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_CONTENT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LibraryError {
    /// Rejected before any request was made
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

pub type Result<T> = std::result::Result<T, LibraryError>;

/// What saving a note will do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavePlan {
    /// Update this existing entry; no title prompt needed
    Update(SavedNote),
    /// Create a new entry; a title is required
    New,
}

pub struct Library {
    api: Arc<dyn NoteApi>,
    base_url: String,
}

impl Library {
    /// `base_url` is the public origin share links are built from.
    pub fn new(api: Arc<dyn NoteApi>, base_url: impl Into<String>) -> Self {
        Self {
            api,
            base_url: base_url.into(),
        }
    }

    pub fn share_url(&self, note_id: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), note_id)
    }

    /// Look up whether `note_id` already has a library entry.
    pub async fn prepare(&self, note_id: &str) -> Result<SavePlan> {
        match self.api.check_saved_note(note_id).await? {
            Some(existing) => {
                debug!("Note {} already saved as {:?}", note_id, existing.title);
                Ok(SavePlan::Update(existing))
            }
            None => Ok(SavePlan::New),
        }
    }

    /// Save `content` of `note_id` to the library.
    ///
    /// An existing entry keeps its title and `title` is ignored; otherwise
    /// `title` is required. An empty `password` counts as none.
    pub async fn save(
        &self,
        note_id: &str,
        content: &str,
        title: Option<&str>,
        password: Option<&str>,
    ) -> Result<SavedNote> {
        let title = match self.prepare(note_id).await? {
            SavePlan::Update(existing) => existing.title,
            SavePlan::New => title
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| LibraryError::Validation("Title is required".into()))?
                .to_string(),
        };
        validate(&title, content)?;

        let request = SaveNoteRequest {
            title,
            note_id: note_id.to_string(),
            content: content.to_string(),
            url: self.share_url(note_id),
            password: password.filter(|p| !p.is_empty()).map(str::to_string),
        };
        let saved = self.api.save_note(&request).await?;
        if saved.is_new == Some(false) {
            info!("Updated library entry {} for note {}", saved.id, note_id);
        } else {
            info!("Saved note {} to library as {}", note_id, saved.id);
        }
        Ok(saved)
    }

    pub async fn list(&self) -> Result<Vec<SavedNote>> {
        Ok(self.api.list_saved_notes().await?)
    }

    pub async fn delete(&self, id: &str, password: Option<&str>) -> Result<()> {
        self.api.delete_saved_note(id, password).await?;
        info!("Deleted library entry {}", id);
        Ok(())
    }
}

fn validate(title: &str, content: &str) -> Result<()> {
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(LibraryError::Validation(format!(
            "Title must be at most {} characters",
            MAX_TITLE_CHARS
        )));
    }
    if content.trim().is_empty() {
        return Err(LibraryError::Validation("Cannot save an empty note".into()));
    }
    if content.len() > MAX_CONTENT_BYTES {
        return Err(LibraryError::Validation(format!(
            "Note content exceeds {} bytes",
            MAX_CONTENT_BYTES
        )));
    }
    Ok(())
}
