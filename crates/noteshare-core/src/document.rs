//! Shared state of the note currently open in a view.
//!
//! The edit pipeline (local path) and the reconciler (remote path) are the
//! only writers. Instead of an out-of-band "local update" flag they both go
//! through `EditPhase`: a remote update is only applied while the document is
//! `Idle`, i.e. no local edit is waiting for, or in the middle of, a save.

use crate::surface::EditorSurface;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};

/// Where the local edit state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditPhase {
    /// No local changes outstanding
    Idle,
    /// Local changes waiting for the save debounce
    Editing,
    /// A save (and broadcast) is in flight
    Saving,
}

/// Who produced the current content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Fetched from the REST collaborator when the note was opened
    Loaded,
    Local,
    Remote,
}

/// Outcome of the last persistence attempt, for the "saved / not saved" indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    Saved,
    Saving,
    Unsaved(String),
}

/// A note's live editing state.
pub struct DocumentState<S> {
    note_id: String,
    surface: S,
    content: String,
    origin: Origin,
    phase: EditPhase,
    /// Incremented on every accepted local edit
    edit_seq: u64,
    last_saved: Option<DateTime<Utc>>,
    save_status: SaveStatus,
}

impl<S: EditorSurface> DocumentState<S> {
    /// Seed the state with loaded `content`, replacing whatever the surface shows.
    pub fn new(
        note_id: impl Into<String>,
        mut surface: S,
        content: impl Into<String>,
        last_saved: Option<DateTime<Utc>>,
    ) -> Self {
        let content = content.into();
        if surface.content() != content {
            surface.replace_content(&content);
        }
        Self {
            note_id: note_id.into(),
            surface,
            content,
            origin: Origin::Loaded,
            phase: EditPhase::Idle,
            edit_seq: 0,
            last_saved,
            save_status: SaveStatus::Saved,
        }
    }

    pub fn note_id(&self) -> &str {
        &self.note_id
    }

    /// Last content known to the synchronization core.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn phase(&self) -> EditPhase {
        self.phase
    }

    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.last_saved
    }

    pub fn save_status(&self) -> &SaveStatus {
        &self.save_status
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Record a local edit. Returns its sequence number, or `None` if the
    /// content did not change.
    pub(crate) fn record_local_edit(&mut self, content: String) -> Option<u64> {
        if content == self.content {
            return None;
        }
        self.content = content;
        self.origin = Origin::Local;
        self.phase = EditPhase::Editing;
        self.edit_seq += 1;
        Some(self.edit_seq)
    }

    /// The debounce for edit `seq` fired and its save is starting.
    pub(crate) fn begin_save(&mut self, seq: u64) {
        if seq == self.edit_seq {
            self.phase = EditPhase::Saving;
        }
        self.save_status = SaveStatus::Saving;
    }

    /// The save for edit `seq` finished.
    ///
    /// Only the save of the latest edit returns the document to `Idle`; an
    /// older save finishing while newer edits are pending leaves them pending.
    pub(crate) fn finish_save(&mut self, seq: u64, result: Result<DateTime<Utc>, String>) {
        match result {
            Ok(at) => {
                self.last_saved = Some(at);
                if seq == self.edit_seq {
                    self.save_status = SaveStatus::Saved;
                }
            }
            Err(message) => {
                self.save_status = SaveStatus::Unsaved(message);
            }
        }
        if seq == self.edit_seq {
            self.phase = EditPhase::Idle;
        }
    }

    /// Abandon outstanding local edits (e.g. the view is closing).
    pub(crate) fn abandon_edits(&mut self) {
        self.edit_seq += 1;
        self.phase = EditPhase::Idle;
    }

    /// Overwrite content with a remote update. The caller has checked the guards.
    pub(crate) fn apply_remote(&mut self, content: &str, at: DateTime<Utc>) {
        self.content = content.to_string();
        self.origin = Origin::Remote;
        self.last_saved = Some(at);
    }
}

/// Document state shared between the edit pipeline and the reconciler.
pub struct SharedDocument<S> {
    inner: Arc<Mutex<DocumentState<S>>>,
}

impl<S> Clone for SharedDocument<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: EditorSurface> SharedDocument<S> {
    pub fn new(state: DocumentState<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, DocumentState<S>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn content(&self) -> String {
        self.lock().content().to_string()
    }

    pub fn phase(&self) -> EditPhase {
        self.lock().phase()
    }

    pub fn save_status(&self) -> SaveStatus {
        self.lock().save_status().clone()
    }

    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.lock().last_saved()
    }
}
