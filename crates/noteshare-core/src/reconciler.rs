//! Applies inbound updates from other clients to the open note.

use crate::connection::ConnectionManager;
use crate::document::{EditPhase, SharedDocument};
use crate::events::Subscription;
use crate::note::NoteUpdate;
use crate::surface::EditorSurface;
use chrono::Utc;
use tracing::debug;

/// What happened to an inbound update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The surface now shows the update's content
    Applied,
    /// The update is for a different note
    WrongNote,
    /// The update carries the content already shown
    Unchanged,
    /// A local edit is pending or being saved; the update is dropped
    LocalEditInFlight,
}

/// Remote-path writer of an open note.
pub struct Reconciler<S> {
    doc: SharedDocument<S>,
}

impl<S> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            doc: self.doc.clone(),
        }
    }
}

impl<S: EditorSurface + 'static> Reconciler<S> {
    pub fn new(doc: SharedDocument<S>) -> Self {
        Self { doc }
    }

    /// Apply `update` if it targets this note, changes the content and no
    /// local edit is outstanding.
    ///
    /// Content is replaced wholesale, so the last update applied wins. The
    /// selection is restored at the same offsets, clamped to the new length.
    pub fn on_remote_update(&self, update: &NoteUpdate) -> ReconcileOutcome {
        let mut doc = self.doc.lock();
        if update.note_id != doc.note_id() {
            return ReconcileOutcome::WrongNote;
        }
        if update.content == doc.content() {
            return ReconcileOutcome::Unchanged;
        }
        if doc.phase() != EditPhase::Idle {
            debug!(
                "Dropping remote update for {} during local edit",
                update.note_id
            );
            return ReconcileOutcome::LocalEditInFlight;
        }

        let surface = doc.surface_mut();
        let selection = surface.selection();
        surface.replace_content(&update.content);
        if let Some(selection) = selection {
            let len = surface.len();
            surface.set_selection(Some(selection.clamped(len)));
        }
        doc.apply_remote(&update.content, Utc::now());
        debug!("Applied remote update to {}", update.note_id);
        ReconcileOutcome::Applied
    }

    /// Route `connection`'s inbound updates here until the subscription is dropped.
    pub fn attach(&self, connection: &ConnectionManager) -> Subscription {
        let reconciler = self.clone();
        connection.on_update(move |update| {
            reconciler.on_remote_update(update);
        })
    }
}
