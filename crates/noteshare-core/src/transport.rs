//! Real-time channel abstraction.
//!
//! A `Transport` owns one persistent connection to the collaboration relay.
//! It never decides *when* to connect; the `ConnectionManager` drives it and
//! consumes the `TransportEvent`s it reports on an unbounded channel handed
//! out at construction time.
//!
//! Implementations:
//! - `MemoryTransport` (with `MemoryHub`) - For testing
//! - `WsTransport` (in noteshare-client) - WebSocket via tokio-tungstenite

use crate::note::NoteUpdate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Maximum frame size accepted from the relay (50MB).
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Frames sent from a client to the relay.
///
/// Encoded as `{"event": "...", "data": ...}` JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "note:join")]
    Join(String),
    #[serde(rename = "note:leave")]
    Leave(String),
    #[serde(rename = "note:update")]
    Update(NoteUpdate),
    #[serde(rename = "pong")]
    Pong,
}

/// Frames sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "note:update")]
    Update(NoteUpdate),
    #[serde(rename = "ping")]
    Ping,
}

impl ClientMessage {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("ClientMessage serialization should not fail")
    }

    pub fn from_text(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TransportError::InvalidFrame(e.to_string()))
    }
}

impl ServerMessage {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("ServerMessage serialization should not fail")
    }

    pub fn from_text(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TransportError::InvalidFrame(e.to_string()))
    }
}

/// Why a connected transport went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The relay deliberately closed this connection.
    ServerInitiated,
    /// We called `disconnect()`.
    ClientInitiated,
    /// The stream ended without a close handshake (network drop).
    TransportClosed,
    /// The socket failed.
    TransportError(String),
}

/// Lifecycle and message events reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    ConnectError(String),
    Disconnected(DisconnectReason),
    /// Non-fatal error on an established connection
    Error(String),
    Message(ServerMessage),
}

/// A single persistent connection to the collaboration relay.
pub trait Transport: Send + Sync {
    /// Begin connecting. The outcome is reported as `Connected` or
    /// `ConnectError`. No-op when already connected.
    fn connect(&self);

    /// Close the connection; reports `Disconnected(ClientInitiated)`.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Queue a frame for sending.
    fn send(&self, message: ClientMessage) -> Result<()>;
}

// ============================================================================
// In-memory relay for tests
// ============================================================================

struct HubClient {
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: bool,
    rooms: HashSet<String>,
    /// Every frame this client sent while connected
    sent: Vec<ClientMessage>,
}

#[derive(Default)]
struct HubState {
    clients: HashMap<usize, HubClient>,
    next_id: usize,
    /// Number of upcoming connect attempts (any client) to refuse
    refuse_connects: usize,
    /// Also deliver updates back to their sender
    echo_to_sender: bool,
}

/// In-memory stand-in for the relay server.
///
/// Updates sent by one client are forwarded to every other connected client
/// that joined the same note.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a transport attached to this hub.
    pub fn transport(&self) -> (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.clients.insert(
            id,
            HubClient {
                events: tx,
                connected: false,
                rooms: HashSet::new(),
                sent: Vec::new(),
            },
        );
        (
            MemoryTransport {
                hub: self.clone(),
                id,
            },
            rx,
        )
    }

    /// Refuse the next `count` connection attempts with a `ConnectError`.
    pub fn refuse_connects(&self, count: usize) {
        self.lock().refuse_connects = count;
    }

    pub fn set_echo_to_sender(&self, echo: bool) {
        self.lock().echo_to_sender = echo;
    }

    /// Simulate a network drop for `client`.
    pub fn drop_client(&self, client: usize) {
        self.close_client(client, DisconnectReason::TransportClosed);
    }

    /// Simulate the relay kicking `client`.
    pub fn kick_client(&self, client: usize) {
        self.close_client(client, DisconnectReason::ServerInitiated);
    }

    fn close_client(&self, client: usize, reason: DisconnectReason) {
        let mut state = self.lock();
        if let Some(c) = state.clients.get_mut(&client) {
            if c.connected {
                c.connected = false;
                c.rooms.clear();
                let _ = c.events.send(TransportEvent::Disconnected(reason));
            }
        }
    }

    /// Send a keep-alive ping to `client`.
    pub fn ping(&self, client: usize) {
        let state = self.lock();
        if let Some(c) = state.clients.get(&client) {
            let _ = c.events.send(TransportEvent::Message(ServerMessage::Ping));
        }
    }

    /// Deliver an update to every member of `update.note_id`, as if sent by
    /// an outside client.
    pub fn broadcast(&self, update: NoteUpdate) {
        let state = self.lock();
        for c in state.clients.values() {
            if c.connected && c.rooms.contains(&update.note_id) {
                let _ = c
                    .events
                    .send(TransportEvent::Message(ServerMessage::Update(update.clone())));
            }
        }
    }

    /// Frames `client` has sent so far.
    pub fn sent_by(&self, client: usize) -> Vec<ClientMessage> {
        self.lock()
            .clients
            .get(&client)
            .map(|c| c.sent.clone())
            .unwrap_or_default()
    }

    /// Updates `client` has sent so far.
    pub fn updates_sent_by(&self, client: usize) -> Vec<NoteUpdate> {
        self.sent_by(client)
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::Update(u) => Some(u),
                _ => None,
            })
            .collect()
    }

    /// Number of connected clients currently in `note_id`.
    pub fn members(&self, note_id: &str) -> usize {
        self.lock()
            .clients
            .values()
            .filter(|c| c.connected && c.rooms.contains(note_id))
            .count()
    }

    fn connect(&self, client: usize) {
        let mut state = self.lock();
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            if let Some(c) = state.clients.get(&client) {
                let _ = c
                    .events
                    .send(TransportEvent::ConnectError("connection refused".into()));
            }
            return;
        }
        if let Some(c) = state.clients.get_mut(&client) {
            if !c.connected {
                c.connected = true;
                let _ = c.events.send(TransportEvent::Connected);
            }
        }
    }

    fn route(&self, client: usize, message: ClientMessage) -> Result<()> {
        let mut state = self.lock();
        let echo = state.echo_to_sender;
        let sender = state
            .clients
            .get_mut(&client)
            .filter(|c| c.connected)
            .ok_or(TransportError::NotConnected)?;
        sender.sent.push(message.clone());

        match message {
            ClientMessage::Join(note_id) => {
                sender.rooms.insert(note_id);
            }
            ClientMessage::Leave(note_id) => {
                sender.rooms.remove(&note_id);
            }
            ClientMessage::Update(update) => {
                for (id, c) in state.clients.iter() {
                    if (*id == client && !echo) || !c.connected {
                        continue;
                    }
                    if c.rooms.contains(&update.note_id) {
                        debug!("Hub relaying update for {} to client {}", update.note_id, id);
                        let _ = c
                            .events
                            .send(TransportEvent::Message(ServerMessage::Update(update.clone())));
                    }
                }
            }
            ClientMessage::Pong => {}
        }
        Ok(())
    }
}

/// Client end of a `MemoryHub`.
pub struct MemoryTransport {
    hub: MemoryHub,
    id: usize,
}

impl MemoryTransport {
    /// Hub-side id of this client.
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) {
        self.hub.connect(self.id);
    }

    fn disconnect(&self) {
        self.hub.close_client(self.id, DisconnectReason::ClientInitiated);
    }

    fn is_connected(&self) -> bool {
        self.hub
            .lock()
            .clients
            .get(&self.id)
            .map(|c| c.connected)
            .unwrap_or(false)
    }

    fn send(&self, message: ClientMessage) -> Result<()> {
        self.hub.route(self.id, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Wire format ====================

    #[test]
    fn test_client_message_wire_format() {
        let join = ClientMessage::Join("abc".into());
        assert_eq!(join.to_text(), r#"{"event":"note:join","data":"abc"}"#);

        let update = ClientMessage::Update(NoteUpdate::new("abc", "hi"));
        assert_eq!(
            update.to_text(),
            r#"{"event":"note:update","data":{"noteId":"abc","content":"hi"}}"#
        );

        assert_eq!(ClientMessage::Pong.to_text(), r#"{"event":"pong"}"#);
    }

    #[test]
    fn test_server_message_parse() {
        let msg = ServerMessage::from_text(
            r#"{"event":"note:update","data":{"noteId":"n","content":"c"}}"#,
        )
        .unwrap();
        assert_eq!(msg, ServerMessage::Update(NoteUpdate::new("n", "c")));

        assert_eq!(
            ServerMessage::from_text(r#"{"event":"ping"}"#).unwrap(),
            ServerMessage::Ping
        );
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let err = ServerMessage::from_text(r#"{"event":"presence","data":{}}"#).unwrap_err();
        assert!(matches!(err, TransportError::InvalidFrame(_)));
        assert!(ServerMessage::from_text("not json").is_err());
    }

    // ==================== MemoryHub ====================

    #[test]
    fn test_hub_relays_to_other_members_only() {
        let hub = MemoryHub::new();
        let (a, mut a_rx) = hub.transport();
        let (b, mut b_rx) = hub.transport();
        let (c, mut c_rx) = hub.transport();

        for t in [&a, &b, &c] {
            t.connect();
        }
        assert_eq!(a_rx.try_recv().unwrap(), TransportEvent::Connected);
        assert_eq!(b_rx.try_recv().unwrap(), TransportEvent::Connected);
        assert_eq!(c_rx.try_recv().unwrap(), TransportEvent::Connected);

        a.send(ClientMessage::Join("n1".into())).unwrap();
        b.send(ClientMessage::Join("n1".into())).unwrap();
        c.send(ClientMessage::Join("other".into())).unwrap();

        a.send(ClientMessage::Update(NoteUpdate::new("n1", "x"))).unwrap();

        assert_eq!(
            b_rx.try_recv().unwrap(),
            TransportEvent::Message(ServerMessage::Update(NoteUpdate::new("n1", "x")))
        );
        assert!(a_rx.try_recv().is_err(), "sender gets no echo by default");
        assert!(c_rx.try_recv().is_err(), "other rooms are untouched");
    }

    #[test]
    fn test_send_while_disconnected_fails() {
        let hub = MemoryHub::new();
        let (a, _rx) = hub.transport();
        assert_eq!(
            a.send(ClientMessage::Join("n".into())),
            Err(TransportError::NotConnected)
        );
    }

    #[test]
    fn test_refused_connects() {
        let hub = MemoryHub::new();
        let (a, mut rx) = hub.transport();
        hub.refuse_connects(1);

        a.connect();
        assert!(matches!(rx.try_recv().unwrap(), TransportEvent::ConnectError(_)));
        assert!(!a.is_connected());

        a.connect();
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Connected);
    }

    #[test]
    fn test_drop_clears_membership() {
        let hub = MemoryHub::new();
        let (a, mut rx) = hub.transport();
        a.connect();
        a.send(ClientMessage::Join("n".into())).unwrap();
        assert_eq!(hub.members("n"), 1);

        hub.drop_client(a.id());
        let _ = rx.try_recv();
        assert_eq!(
            rx.try_recv().unwrap(),
            TransportEvent::Disconnected(DisconnectReason::TransportClosed)
        );
        assert_eq!(hub.members("n"), 0);
    }
}
