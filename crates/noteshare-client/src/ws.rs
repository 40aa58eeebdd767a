//! WebSocket transport to the collaboration relay.
//!
//! Frames are JSON text (`{"event": ..., "data": ...}`). A writer task owns the
//! sink and drains an mpsc queue; a read task maps incoming frames to
//! `TransportEvent`s.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use noteshare_core::transport::{
    ClientMessage, DisconnectReason, MAX_MESSAGE_SIZE, Result, ServerMessage, Transport,
    TransportError, TransportEvent,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Relay endpoint, e.g. `ws://localhost:10000/ws`
    pub url: String,
    pub connect_timeout: Duration,
}

impl WsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// An established connection.
struct Link {
    outgoing: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
}

struct Shared {
    config: WsConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: AtomicBool,
    connecting: AtomicBool,
    /// Bumped by every `disconnect()`; tasks from an older connection stand down
    epoch: AtomicU64,
    link: Mutex<Option<Link>>,
}

impl Shared {
    fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Report a failed connect attempt. Attempts from before the last
    /// `disconnect()` leave `connecting` to the current one.
    fn fail_attempt(&self, epoch: u64, message: String) {
        if !self.is_current(epoch) {
            return;
        }
        self.connecting.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::ConnectError(message));
    }
}

/// `Transport` over a tokio-tungstenite client connection.
pub struct WsTransport {
    shared: Arc<Shared>,
}

impl WsTransport {
    /// Create a transport and the channel its events are reported on.
    pub fn new(config: WsConfig) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            events,
            connected: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            link: Mutex::new(None),
        });
        (Self { shared }, rx)
    }

    pub fn url(&self) -> &str {
        &self.shared.config.url
    }
}

impl Transport for WsTransport {
    fn connect(&self) {
        if self.shared.connected.load(Ordering::SeqCst)
            || self.shared.connecting.swap(true, Ordering::SeqCst)
        {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let epoch = shared.epoch.load(Ordering::SeqCst);
        tokio::spawn(async move {
            establish(shared, epoch).await;
        });
    }

    fn disconnect(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.shared.connecting.store(false, Ordering::SeqCst);
        if let Some(link) = self.shared.link().take() {
            let _ = link.outgoing.send(Message::Close(None));
            link.reader.abort();
        }
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            info!("Disconnected from {}", self.shared.config.url);
            self.shared
                .emit(TransportEvent::Disconnected(DisconnectReason::ClientInitiated));
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn send(&self, message: ClientMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let link = self.shared.link();
        let link = link.as_ref().ok_or(TransportError::NotConnected)?;
        link.outgoing
            .send(Message::Text(message.to_text()))
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(link) = self.shared.link().take() {
            let _ = link.outgoing.send(Message::Close(None));
            link.reader.abort();
        }
    }
}

async fn establish(shared: Arc<Shared>, epoch: u64) {
    let url = shared.config.url.clone();
    debug!("Connecting to {}", url);

    let result = tokio::time::timeout(shared.config.connect_timeout, connect_async(&url)).await;
    let ws = match result {
        Ok(Ok((ws, _))) => ws,
        Ok(Err(e)) => {
            warn!("Failed to connect to {}: {}", url, e);
            shared.fail_attempt(epoch, e.to_string());
            return;
        }
        Err(_) => {
            warn!("Connecting to {} timed out", url);
            shared.fail_attempt(epoch, "connection timed out".into());
            return;
        }
    };

    if !shared.is_current(epoch) {
        debug!("Discarding connection to {} opened after disconnect", url);
        return;
    }

    let (write, read) = ws.split();
    let (outgoing, queue) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(write, queue));
    let reader = tokio::spawn(read_loop(read, Arc::clone(&shared), epoch));

    *shared.link() = Some(Link { outgoing, reader });
    shared.connected.store(true, Ordering::SeqCst);
    shared.connecting.store(false, Ordering::SeqCst);
    info!("Connected to {}", url);
    shared.emit(TransportEvent::Connected);
}

async fn write_loop(mut write: SplitSink<WsStream, Message>, mut queue: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = queue.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = write.send(message).await {
            debug!("WebSocket write failed: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
}

async fn read_loop(mut read: SplitStream<WsStream>, shared: Arc<Shared>, epoch: u64) {
    let reason = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                if text.len() > MAX_MESSAGE_SIZE {
                    warn!(
                        "Frame exceeds max size ({} > {}), dropping",
                        text.len(),
                        MAX_MESSAGE_SIZE
                    );
                    continue;
                }
                match ServerMessage::from_text(&text) {
                    Ok(message) => shared.emit(TransportEvent::Message(message)),
                    Err(e) => debug!("Ignoring unrecognized frame: {}", e),
                }
            }
            Some(Ok(Message::Close(_))) => {
                debug!("Relay closed the connection");
                break DisconnectReason::ServerInitiated;
            }
            Some(Ok(Message::Binary(data))) => {
                debug!("Ignoring {} byte binary frame", data.len());
            }
            Some(Ok(_)) => continue,
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                debug!("Relay stream ended");
                break DisconnectReason::TransportClosed;
            }
            Some(Err(e)) => {
                error!("WebSocket error: {}", e);
                break DisconnectReason::TransportError(e.to_string());
            }
        }
    };

    if !shared.is_current(epoch) {
        return;
    }
    shared.link().take();
    if shared.connected.swap(false, Ordering::SeqCst) {
        shared.emit(TransportEvent::Disconnected(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stale_failure_keeps_current_attempt_connecting() {
        let (transport, mut events) = WsTransport::new(WsConfig::new("ws://127.0.0.1:1"));
        let shared = &transport.shared;
        let stale = shared.epoch.load(Ordering::SeqCst);

        // disconnect() then a fresh attempt
        shared.epoch.fetch_add(1, Ordering::SeqCst);
        shared.connecting.store(true, Ordering::SeqCst);

        shared.fail_attempt(stale, "refused".into());
        assert!(shared.connecting.load(Ordering::SeqCst));
        assert!(events.try_recv().is_err());

        // the guard still makes connect() a no-op
        transport.connect();
        assert!(shared.connecting.load(Ordering::SeqCst));

        let current = shared.epoch.load(Ordering::SeqCst);
        shared.fail_attempt(current, "refused".into());
        assert!(!shared.connecting.load(Ordering::SeqCst));
        assert_eq!(
            events.try_recv().unwrap(),
            TransportEvent::ConnectError("refused".into())
        );
    }
}
