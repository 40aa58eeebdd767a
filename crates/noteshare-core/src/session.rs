//! An open note: load, join, edit, reconcile, leave.

use crate::api::{ApiError, NoteApi};
use crate::cache::NoteCache;
use crate::connection::ConnectionManager;
use crate::document::{DocumentState, EditPhase, SaveStatus, SharedDocument};
use crate::events::Subscription;
use crate::pipeline::{EditPipeline, PipelineConfig};
use crate::reconciler::Reconciler;
use crate::surface::EditorSurface;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Note not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Process-wide collaborators handed to every view that opens a note.
#[derive(Clone)]
pub struct SyncContext {
    pub api: Arc<dyn NoteApi>,
    pub cache: Arc<NoteCache>,
    pub connection: Arc<ConnectionManager>,
    pub pipeline: PipelineConfig,
}

/// A note opened in one view.
///
/// Dropping the session closes it.
pub struct NoteSession<S: EditorSurface + 'static> {
    note_id: String,
    doc: SharedDocument<S>,
    pipeline: EditPipeline<S>,
    connection: Arc<ConnectionManager>,
    cache: Arc<NoteCache>,
    subscription: Option<Subscription>,
}

impl<S: EditorSurface + 'static> NoteSession<S> {
    /// Load `note_id`, seed `surface` with its content, join its group and
    /// start applying remote updates.
    pub async fn open(
        ctx: &SyncContext,
        note_id: &str,
        surface: S,
    ) -> Result<Self, SessionError> {
        let note = ctx
            .cache
            .get_note(note_id)
            .await
            .map_err(|e| match e {
                ApiError::NotFound(_) => SessionError::NotFound(note_id.to_string()),
                e => SessionError::Api(e),
            })?
            .ok_or_else(|| SessionError::NotFound(note_id.to_string()))?;

        let doc = SharedDocument::new(DocumentState::new(
            note_id,
            surface,
            note.content,
            Some(note.updated_at),
        ));
        let pipeline = EditPipeline::new(
            &ctx.pipeline,
            doc.clone(),
            Arc::clone(&ctx.api),
            Arc::clone(&ctx.connection),
        );

        ctx.connection.join_note(note_id);
        let subscription = Reconciler::new(doc.clone()).attach(&ctx.connection);
        info!("Opened note {}", note_id);

        Ok(Self {
            note_id: note_id.to_string(),
            doc,
            pipeline,
            connection: Arc::clone(&ctx.connection),
            cache: Arc::clone(&ctx.cache),
            subscription: Some(subscription),
        })
    }

    pub fn note_id(&self) -> &str {
        &self.note_id
    }

    /// Report the surface's full content after a user edit.
    pub fn on_local_edit(&self, content: impl Into<String>) -> bool {
        self.pipeline.on_local_edit(content.into())
    }

    /// Edit the surface and report the result.
    pub fn edit(&self, edit: impl FnOnce(&mut S)) -> bool {
        self.pipeline.edit_surface(edit)
    }

    pub fn document(&self) -> &SharedDocument<S> {
        &self.doc
    }

    pub fn content(&self) -> String {
        self.doc.content()
    }

    pub fn phase(&self) -> EditPhase {
        self.doc.phase()
    }

    pub fn save_status(&self) -> SaveStatus {
        self.doc.save_status()
    }

    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.doc.last_saved()
    }

    pub fn is_open(&self) -> bool {
        self.subscription.is_some()
    }

    /// Leave the note's group and stop receiving updates. Edits not yet
    /// saved are discarded.
    pub fn close(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        self.pipeline.cancel();
        self.connection.leave_note(&self.note_id);
        self.connection.off(subscription);
        self.cache.invalidate(&self.note_id);
        info!("Closed note {}", self.note_id);
    }
}

impl<S: EditorSurface + 'static> Drop for NoteSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}
