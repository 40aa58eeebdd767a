//! noteshare-core: real-time synchronization core for shared notes.
//!
//! This crate provides:
//! - A debounce primitive shared by outbound saves and broadcasts
//! - The local edit pipeline and remote update reconciler for an open note
//! - A connection manager owning the single real-time connection
//! - A short-lived note cache that coalesces concurrent fetches
//! - `NoteApi`, `Transport` and `EditorSurface` seams with in-memory doubles

pub mod api;
pub mod cache;
pub mod connection;
pub mod debounce;
pub mod document;
pub mod events;
pub mod expiry;
pub mod library;
pub mod note;
pub mod pipeline;
pub mod reconciler;
pub mod session;
pub mod surface;
pub mod transport;

pub use api::{ApiError, InMemoryNoteApi, NoteApi};
pub use cache::{CacheConfig, NoteCache};
pub use connection::{
    ConnectionConfig, ConnectionManager, ConnectionState, ConnectionStatus, ReconnectConfig,
};
pub use debounce::Debouncer;
pub use document::{DocumentState, EditPhase, Origin, SaveStatus, SharedDocument};
pub use events::{EventBus, Subscription};
pub use library::{Library, LibraryError, SavePlan};
pub use note::{Note, NoteUpdate, SaveNoteRequest, SavedNote, parse_note_link};
pub use pipeline::{EditPipeline, PipelineConfig};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use session::{NoteSession, SessionError, SyncContext};
pub use surface::{EditorSurface, Selection, TextSurface};
pub use transport::{
    ClientMessage, DisconnectReason, MemoryHub, MemoryTransport, ServerMessage, Transport,
    TransportError, TransportEvent,
};
