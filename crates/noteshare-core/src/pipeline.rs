//! Local edit pipeline: every change the user makes flows through here on its
//! way to the REST collaborator and the real-time channel.

use crate::api::NoteApi;
use crate::connection::ConnectionManager;
use crate::debounce::{Debouncer, DEFAULT_DEBOUNCE};
use crate::document::SharedDocument;
use crate::note::NoteUpdate;
use crate::surface::EditorSurface;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the local edit pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Quiet period after the last keystroke before saving and broadcasting
    pub save_debounce: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            save_debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// Debounced save + broadcast of local edits for one open note.
pub struct EditPipeline<S> {
    doc: SharedDocument<S>,
    api: Arc<dyn NoteApi>,
    connection: Arc<ConnectionManager>,
    save_debounce: Debouncer,
}

impl<S: EditorSurface + 'static> EditPipeline<S> {
    pub fn new(
        config: &PipelineConfig,
        doc: SharedDocument<S>,
        api: Arc<dyn NoteApi>,
        connection: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            doc,
            api,
            connection,
            save_debounce: Debouncer::new(config.save_debounce),
        }
    }

    /// Feed the full serialized content of the surface after a user edit.
    ///
    /// Returns `false` when the content is unchanged and nothing was scheduled.
    pub fn on_local_edit(&self, content: String) -> bool {
        let (note_id, seq) = {
            let mut doc = self.doc.lock();
            let Some(seq) = doc.record_local_edit(content.clone()) else {
                return false;
            };
            (doc.note_id().to_string(), seq)
        };

        let doc = self.doc.clone();
        let api = Arc::clone(&self.api);
        let connection = Arc::clone(&self.connection);
        self.save_debounce.schedule(async move {
            save(doc, api, connection, note_id, content, seq).await;
        });
        true
    }

    /// Apply `edit` to the surface, then run the result through `on_local_edit`.
    pub fn edit_surface(&self, edit: impl FnOnce(&mut S)) -> bool {
        let content = {
            let mut doc = self.doc.lock();
            edit(doc.surface_mut());
            doc.surface().content()
        };
        self.on_local_edit(content)
    }

    /// Whether a save is still waiting for the debounce.
    pub fn has_pending_save(&self) -> bool {
        self.save_debounce.is_pending()
    }

    /// Drop any scheduled save. A save that already started runs to completion.
    pub fn cancel(&self) {
        if self.save_debounce.cancel() {
            debug!("Discarded pending save for {}", self.doc.lock().note_id());
        }
        self.doc.lock().abandon_edits();
    }
}

async fn save<S: EditorSurface>(
    doc: SharedDocument<S>,
    api: Arc<dyn NoteApi>,
    connection: Arc<ConnectionManager>,
    note_id: String,
    content: String,
    seq: u64,
) {
    doc.lock().begin_save(seq);

    // The broadcast is queued before persistence is awaited; neither waits on the other.
    connection.send_update(NoteUpdate::new(note_id.clone(), content.clone()));

    let outcome = match api.update_note(&note_id, &content).await {
        Ok(()) => {
            debug!("Saved note {} ({} bytes)", note_id, content.len());
            Ok(Utc::now())
        }
        Err(e) => {
            warn!("Failed to save note {}: {}", note_id, e);
            Err(e.to_string())
        }
    };
    doc.lock().finish_save(seq, outcome);
}
