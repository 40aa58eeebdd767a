//! Real-time connection manager.
//!
//! One `ConnectionManager` owns the process's single transport connection and
//! is shared (as `Arc`) by every view that opens a note. It handles:
//! - Connect / reconnect with exponential backoff and a bounded attempt count
//! - Membership in note groups, re-joined after every reconnect
//! - A single debounced pending-update slot for outbound updates
//! - Dispatch of inbound updates to subscribers

use crate::debounce::Debouncer;
use crate::events::{EventBus, Subscription};
use crate::note::NoteUpdate;
use crate::transport::{
    ClientMessage, DisconnectReason, ServerMessage, Transport, TransportEvent,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum number of attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            max_attempts: Some(5),
        }
    }
}

/// Calculates the reconnection delay for `attempt` (1-based):
/// `min(initial * factor^(attempt-1), max)`.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let delay_secs = config.initial_delay.as_secs_f64()
        * config.backoff_factor.powi(attempt.saturating_sub(1) as i32);

    Duration::from_secs_f64(delay_secs.min(config.max_delay.as_secs_f64()))
}

/// Reconnection attempt bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ReconnectState {
    /// Number of reconnection attempts scheduled since the last successful connect
    pub attempts: u32,
    /// Delay used for the most recent attempt
    pub current_delay: Duration,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more attempt and return its delay, or `None` once the
    /// configured maximum has been used up.
    pub fn next_delay(&mut self, config: &ReconnectConfig) -> Option<Duration> {
        self.attempts += 1;
        if self.exceeded_max_attempts(config) {
            return None;
        }
        self.current_delay = calculate_backoff(self.attempts, config);
        Some(self.current_delay)
    }

    /// Reset state after successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = Duration::ZERO;
    }

    /// Check if max attempts exceeded.
    pub fn exceeded_max_attempts(&self, config: &ReconnectConfig) -> bool {
        config
            .max_attempts
            .map(|max| self.attempts > max)
            .unwrap_or(false)
    }
}

/// Connection manager settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Quiet period before a pending update is emitted
    pub update_debounce: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            update_debounce: crate::debounce::DEFAULT_DEBOUNCE,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Transport connectivity as tracked by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Status notifications for a UI indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    /// A reconnect attempt is scheduled
    Reconnecting { attempt: u32, delay: Duration },
    /// Automatic reconnection gave up; only `reconnect()` will try again
    MaxAttemptsReached,
}

struct ManagerState {
    state: ConnectionState,
    reconnect: ReconnectState,
    /// Reentrancy guard: a backoff timer is armed
    reconnecting: bool,
    reconnect_timer: Option<JoinHandle<()>>,
    exhausted: bool,
    /// Notes whose group we are (or will be, once connected) a member of
    joined: BTreeSet<String>,
    /// Most recent update not yet emitted
    pending_update: Option<NoteUpdate>,
}

/// Owner of the single real-time connection.
pub struct ConnectionManager {
    me: Weak<ConnectionManager>,
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<ManagerState>,
    update_debounce: Debouncer,
    updates: Arc<EventBus<NoteUpdate>>,
    status: Arc<EventBus<ConnectionStatus>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create a manager over `transport`, whose events arrive on `events`.
    ///
    /// Nothing happens until `start()` is called.
    pub fn new(
        config: ConnectionConfig,
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            update_debounce: Debouncer::new(config.update_debounce),
            config,
            transport,
            state: Mutex::new(ManagerState {
                state: ConnectionState::Disconnected,
                reconnect: ReconnectState::new(),
                reconnecting: false,
                reconnect_timer: None,
                exhausted: false,
                joined: BTreeSet::new(),
                pending_update: None,
            }),
            updates: Arc::new(EventBus::new()),
            status: Arc::new(EventBus::new()),
            events: Mutex::new(Some(events)),
            driver: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn the event loop and open the connection. Calling it again is a no-op.
    pub fn start(&self) {
        let Some(mut events) = self
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return;
        };

        let me = self.me.clone();
        let driver = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = me.upgrade() else { break };
                manager.handle_event(event);
            }
            debug!("Transport event stream ended");
        });
        *self.driver.lock().unwrap_or_else(|e| e.into_inner()) = Some(driver);

        self.connect();
    }

    /// Tear everything down: drop the pending update, stop reconnecting and
    /// close the transport.
    pub fn shutdown(&self) {
        self.update_debounce.cancel();
        {
            let mut state = self.lock();
            state.pending_update = None;
            state.reconnecting = false;
            if let Some(timer) = state.reconnect_timer.take() {
                timer.abort();
            }
        }
        self.transport.disconnect();
        if let Some(driver) = self.driver.lock().unwrap_or_else(|e| e.into_inner()).take() {
            driver.abort();
        }
        info!("Connection manager shut down");
    }

    fn connect(&self) {
        if self.transport.is_connected() {
            return;
        }
        {
            let mut state = self.lock();
            if state.state == ConnectionState::Connecting {
                return;
            }
            state.state = ConnectionState::Connecting;
        }
        debug!("Connecting to relay");
        self.transport.connect();
    }

    /// Manually reconnect after automatic attempts gave up (or at any time).
    pub fn reconnect(&self) {
        {
            let mut state = self.lock();
            state.reconnect.reset();
            state.exhausted = false;
            state.reconnecting = false;
            if let Some(timer) = state.reconnect_timer.take() {
                timer.abort();
            }
            if state.state == ConnectionState::Connecting {
                // A stale attempt may never resolve; allow a fresh one
                state.state = ConnectionState::Disconnected;
            }
        }
        info!("Manual reconnect requested");
        self.connect();
    }

    /// Join the update group for `note_id`.
    ///
    /// When disconnected the join is deferred until the next successful
    /// connect, and sent once no matter how often this is called meanwhile.
    pub fn join_note(&self, note_id: &str) {
        let (newly_joined, connected) = {
            let mut state = self.lock();
            (
                state.joined.insert(note_id.to_string()),
                state.state == ConnectionState::Connected,
            )
        };

        // Until the connect event is handled, on_connected sends the join
        if connected {
            if newly_joined {
                self.emit(ClientMessage::Join(note_id.to_string()));
                info!("Joined note {}", note_id);
            }
        } else {
            debug!("Not connected, deferring join of {}", note_id);
            self.connect();
        }
    }

    /// Leave the group for `note_id` and discard any unsent update for it.
    pub fn leave_note(&self, note_id: &str) {
        let (dropped, connected) = {
            let mut state = self.lock();
            state.joined.remove(note_id);
            let pending_here = state
                .pending_update
                .as_ref()
                .is_some_and(|u| u.note_id == note_id);
            if pending_here {
                state.pending_update = None;
            }
            (pending_here, state.state == ConnectionState::Connected)
        };
        if dropped {
            self.update_debounce.cancel();
            debug!("Discarded pending update for {}", note_id);
        }

        if connected {
            self.emit(ClientMessage::Leave(note_id.to_string()));
        }
        info!("Left note {}", note_id);
    }

    /// Queue `update` for broadcast.
    ///
    /// Overwrites any unsent update and re-arms the debounce. When the timer
    /// fires while disconnected the update stays pending and is flushed by
    /// the next successful connect.
    pub fn send_update(&self, update: NoteUpdate) {
        self.lock().pending_update = Some(update);

        let me = self.me.clone();
        self.update_debounce.schedule(async move {
            if let Some(manager) = me.upgrade() {
                manager.flush_pending();
            }
        });
    }

    /// Emit the pending update if connected.
    fn flush_pending(&self) {
        if !self.transport.is_connected() {
            debug!("Offline, keeping update pending until reconnect");
            return;
        }
        let Some(update) = self.lock().pending_update.take() else {
            return;
        };
        let note_id = update.note_id.clone();
        match self.transport.send(ClientMessage::Update(update.clone())) {
            Ok(()) => debug!("Emitted update for {}", note_id),
            Err(e) => {
                warn!("Failed to emit update for {}: {}", note_id, e);
                // Keep it unless a newer one replaced it meanwhile
                let mut state = self.lock();
                if state.pending_update.is_none() {
                    state.pending_update = Some(update);
                }
            }
        }
    }

    /// Subscribe to inbound updates. Drop the subscription (or pass it to
    /// `off`) to stop receiving them.
    pub fn on_update(
        &self,
        callback: impl Fn(&NoteUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        self.updates.subscribe(callback)
    }

    /// Remove a callback registered with `on_update` or `on_status`.
    pub fn off(&self, subscription: Subscription) {
        subscription.unsubscribe();
    }

    /// Subscribe to connection status changes.
    pub fn on_status(
        &self,
        callback: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.status.subscribe(callback)
    }

    /// Whether the transport is currently connected. For display only.
    pub fn connection_status(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Reconnect attempts made since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect.attempts
    }

    pub fn has_pending_update(&self) -> bool {
        self.lock().pending_update.is_some()
    }

    pub fn joined_notes(&self) -> Vec<String> {
        self.lock().joined.iter().cloned().collect()
    }

    fn emit(&self, message: ClientMessage) {
        if let Err(e) = self.transport.send(message) {
            warn!("Failed to send frame: {}", e);
        }
    }

    // ========================================================================
    // Transport events
    // ========================================================================

    fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::ConnectError(e) => {
                error!("Connection error: {}", e);
                self.lock().state = ConnectionState::Disconnected;
                self.handle_reconnection();
            }
            TransportEvent::Disconnected(reason) => self.on_disconnected(reason),
            TransportEvent::Error(e) => {
                error!("Transport error: {}", e);
                if !self.transport.is_connected() {
                    self.handle_reconnection();
                }
            }
            TransportEvent::Message(ServerMessage::Update(update)) => {
                debug!("Received update for {}", update.note_id);
                self.updates.emit(&update);
            }
            TransportEvent::Message(ServerMessage::Ping) => {
                self.emit(ClientMessage::Pong);
            }
        }
    }

    fn on_connected(&self) {
        let (joined, pending) = {
            let mut state = self.lock();
            state.state = ConnectionState::Connected;
            state.reconnect.reset();
            state.reconnecting = false;
            state.exhausted = false;
            if let Some(timer) = state.reconnect_timer.take() {
                timer.abort();
            }
            (
                state.joined.iter().cloned().collect::<Vec<_>>(),
                state.pending_update.is_some(),
            )
        };
        info!("Connected to relay");

        for note_id in joined {
            self.emit(ClientMessage::Join(note_id));
        }

        if pending {
            info!("Flushing update queued while offline");
            self.update_debounce.cancel();
            self.flush_pending();
        }

        self.status.emit(&ConnectionStatus::Connected);
    }

    fn on_disconnected(&self, reason: DisconnectReason) {
        self.lock().state = ConnectionState::Disconnected;
        info!("Disconnected from relay: {:?}", reason);
        self.status.emit(&ConnectionStatus::Disconnected);

        match reason {
            DisconnectReason::ServerInitiated => {
                // The relay dropped this connection on purpose: retry right away
                self.connect();
            }
            DisconnectReason::ClientInitiated => {}
            DisconnectReason::TransportClosed | DisconnectReason::TransportError(_) => {
                self.handle_reconnection();
            }
        }
    }

    /// Schedule the next reconnect attempt with backoff, unless one is
    /// already scheduled or the attempt budget is spent.
    fn handle_reconnection(&self) {
        let scheduled = {
            let mut state = self.lock();
            if state.reconnecting || state.exhausted {
                return;
            }
            match state.reconnect.next_delay(&self.config.reconnect) {
                Some(delay) => {
                    state.reconnecting = true;
                    let attempt = state.reconnect.attempts;
                    let me = self.me.clone();
                    state.reconnect_timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Some(manager) = me.upgrade() {
                            {
                                let mut state = manager.lock();
                                state.reconnecting = false;
                                state.reconnect_timer = None;
                            }
                            manager.connect();
                        }
                    }));
                    Some((attempt, delay))
                }
                None => {
                    state.exhausted = true;
                    None
                }
            }
        };

        match scheduled {
            Some((attempt, delay)) => {
                let max = self
                    .config
                    .reconnect
                    .max_attempts
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "unlimited".into());
                info!(
                    "Attempting to reconnect... Attempt {}/{} (delay: {:?})",
                    attempt, max, delay
                );
                self.status
                    .emit(&ConnectionStatus::Reconnecting { attempt, delay });
            }
            None => {
                error!("Max reconnection attempts reached");
                self.status.emit(&ConnectionStatus::MaxAttemptsReached);
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.lock().unwrap_or_else(|e| e.into_inner()).take() {
            driver.abort();
        }
        if let Some(timer) = self.lock().reconnect_timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryHub;

    fn manager_on(hub: &MemoryHub) -> (Arc<ConnectionManager>, usize) {
        let (transport, events) = hub.transport();
        let id = transport.id();
        let manager = ConnectionManager::new(ConnectionConfig::default(), Arc::new(transport), events);
        (manager, id)
    }

    fn record_status(manager: &ConnectionManager) -> (Arc<Mutex<Vec<ConnectionStatus>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = manager.on_status(move |s| sink.lock().unwrap().push(s.clone()));
        (seen, sub)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // ==================== Backoff calculation ====================

    #[test]
    fn test_calculate_backoff_default_sequence() {
        let config = ReconnectConfig::default();

        // 1s, 2s, 4s, 5s (capped)
        assert_eq!(calculate_backoff(1, &config), Duration::from_secs(1));
        assert_eq!(calculate_backoff(2, &config), Duration::from_secs(2));
        assert_eq!(calculate_backoff(3, &config), Duration::from_secs(4));
        assert_eq!(calculate_backoff(4, &config), Duration::from_secs(5));
        assert_eq!(calculate_backoff(5, &config), Duration::from_secs(5));
    }

    #[test]
    fn test_calculate_backoff_custom_config() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_factor: 3.0,
            max_attempts: None,
        };

        assert_eq!(calculate_backoff(1, &config), Duration::from_millis(100));
        assert_eq!(calculate_backoff(2, &config), Duration::from_millis(300));
        assert_eq!(calculate_backoff(3, &config), Duration::from_millis(900));
        assert_eq!(calculate_backoff(4, &config), Duration::from_secs(1));
    }

    // ==================== ReconnectState ====================

    #[test]
    fn test_next_delay_stops_after_max_attempts() {
        let config = ReconnectConfig::default();
        let mut state = ReconnectState::new();

        let delays: Vec<_> = std::iter::from_fn(|| state.next_delay(&config)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(5),
                Duration::from_secs(5),
            ]
        );
        assert!(state.exceeded_max_attempts(&config));
    }

    #[test]
    fn test_unlimited_attempts_never_exceed() {
        let config = ReconnectConfig {
            max_attempts: None,
            ..Default::default()
        };
        let mut state = ReconnectState::new();
        for _ in 0..100 {
            assert!(state.next_delay(&config).is_some());
        }
    }

    #[test]
    fn test_reconnect_state_reset() {
        let config = ReconnectConfig::default();
        let mut state = ReconnectState::new();
        state.next_delay(&config);
        state.next_delay(&config);
        assert_eq!(state.attempts, 2);

        state.reset();
        assert_eq!(state.attempts, 0);
        assert_eq!(state.next_delay(&config), Some(Duration::from_secs(1)));
    }

    // ==================== Joining ====================

    #[tokio::test(start_paused = true)]
    async fn test_join_deferred_until_connect_sent_once() {
        let hub = MemoryHub::new();
        let (manager, id) = manager_on(&hub);

        manager.join_note("n1");
        manager.join_note("n1");
        assert!(hub.sent_by(id).is_empty());

        manager.start();
        settle().await;

        assert_eq!(hub.sent_by(id), vec![ClientMessage::Join("n1".into())]);
        assert_eq!(hub.members("n1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_when_connected_is_immediate() {
        let hub = MemoryHub::new();
        let (manager, id) = manager_on(&hub);
        manager.start();
        settle().await;
        assert!(manager.connection_status());

        manager.join_note("n1");
        assert_eq!(hub.sent_by(id), vec![ClientMessage::Join("n1".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoins_after_reconnect() {
        let hub = MemoryHub::new();
        let (manager, id) = manager_on(&hub);
        manager.start();
        manager.join_note("n1");
        settle().await;

        hub.drop_client(id);
        settle().await;
        assert_eq!(hub.members("n1"), 0);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(manager.connection_status());
        assert_eq!(hub.members("n1"), 1);
    }

    // ==================== Outbound updates ====================

    #[tokio::test(start_paused = true)]
    async fn test_send_update_is_debounced_last_wins() {
        let hub = MemoryHub::new();
        let (manager, id) = manager_on(&hub);
        manager.start();
        manager.join_note("n1");
        settle().await;

        manager.send_update(NoteUpdate::new("n1", "H"));
        manager.send_update(NoteUpdate::new("n1", "He"));
        manager.send_update(NoteUpdate::new("n1", "Hello"));
        assert!(hub.updates_sent_by(id).is_empty());

        tokio::time::sleep(Duration::from_millis(310)).await;
        assert_eq!(hub.updates_sent_by(id), vec![NoteUpdate::new("n1", "Hello")]);
        assert!(!manager.has_pending_update());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_cancels_pending_update() {
        let hub = MemoryHub::new();
        let (manager, id) = manager_on(&hub);
        manager.start();
        manager.join_note("n1");
        settle().await;

        manager.send_update(NoteUpdate::new("n1", "draft"));
        manager.leave_note("n1");

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(hub.updates_sent_by(id).is_empty());
        assert!(!manager.has_pending_update());
        assert_eq!(hub.sent_by(id).last(), Some(&ClientMessage::Leave("n1".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_other_note_keeps_pending_update() {
        let hub = MemoryHub::new();
        let (manager, id) = manager_on(&hub);
        manager.start();
        manager.join_note("n1");
        manager.join_note("n2");
        settle().await;

        manager.send_update(NoteUpdate::new("n1", "draft"));
        manager.leave_note("n2");

        tokio::time::sleep(Duration::from_millis(310)).await;
        assert_eq!(hub.updates_sent_by(id), vec![NoteUpdate::new("n1", "draft")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_update_flushed_once_on_reconnect() {
        let hub = MemoryHub::new();
        let (manager, id) = manager_on(&hub);
        manager.start();
        manager.join_note("n1");
        settle().await;

        hub.drop_client(id);
        settle().await;
        manager.send_update(NoteUpdate::new("n1", "offline edit"));

        // Debounce fires while offline: stays pending
        tokio::time::sleep(Duration::from_millis(310)).await;
        assert!(manager.has_pending_update());

        // Reconnect timer (1s) fires, connect flushes the slot
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(manager.connection_status());
        assert_eq!(
            hub.updates_sent_by(id),
            vec![NoteUpdate::new("n1", "offline edit")]
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hub.updates_sent_by(id).len(), 1, "flushed exactly once");
    }

    // ==================== Inbound ====================

    #[tokio::test(start_paused = true)]
    async fn test_on_update_and_off() {
        let hub = MemoryHub::new();
        let (manager, _) = manager_on(&hub);
        manager.start();
        manager.join_note("n1");
        settle().await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = manager.on_update(move |u| sink.lock().unwrap().push(u.content.clone()));

        hub.broadcast(NoteUpdate::new("n1", "one"));
        settle().await;
        manager.off(sub);
        hub.broadcast(NoteUpdate::new("n1", "two"));
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec!["one".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_answered_with_pong() {
        let hub = MemoryHub::new();
        let (manager, id) = manager_on(&hub);
        manager.start();
        settle().await;

        hub.ping(id);
        settle().await;
        assert_eq!(hub.sent_by(id), vec![ClientMessage::Pong]);
    }

    // ==================== Reconnection ====================

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sequence_then_max_attempts() {
        let hub = MemoryHub::new();
        let (manager, _) = manager_on(&hub);
        let (seen, _sub) = record_status(&manager);
        hub.refuse_connects(100);

        manager.start();
        tokio::time::sleep(Duration::from_secs(60)).await;

        let statuses = seen.lock().unwrap().clone();
        let delays: Vec<_> = statuses
            .iter()
            .filter_map(|s| match s {
                ConnectionStatus::Reconnecting { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(5),
                Duration::from_secs(5),
            ]
        );
        assert_eq!(statuses.last(), Some(&ConnectionStatus::MaxAttemptsReached));
        assert!(!manager.connection_status());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reconnect_after_exhaustion() {
        let hub = MemoryHub::new();
        let (manager, _) = manager_on(&hub);
        hub.refuse_connects(6);

        manager.start();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!manager.connection_status());

        manager.reconnect();
        settle().await;
        assert!(manager.connection_status());
        assert_eq!(manager.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_disconnect_reconnects_immediately() {
        let hub = MemoryHub::new();
        let (manager, id) = manager_on(&hub);
        let (seen, _sub) = record_status(&manager);
        manager.start();
        settle().await;

        hub.kick_client(id);
        settle().await;

        assert!(manager.connection_status());
        assert!(
            !seen
                .lock()
                .unwrap()
                .iter()
                .any(|s| matches!(s, ConnectionStatus::Reconnecting { .. })),
            "no backoff for a server-initiated disconnect"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_reconnect_sequence_at_a_time() {
        let hub = MemoryHub::new();
        let (manager, _) = manager_on(&hub);
        let (seen, _sub) = record_status(&manager);
        hub.refuse_connects(1);
        manager.start();
        settle().await;

        // A second failure signal while the timer is armed must not schedule another
        manager.handle_event(TransportEvent::Error("boom".into()));
        settle().await;

        let reconnecting = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|s| matches!(s, ConnectionStatus::Reconnecting { .. }))
            .count();
        assert_eq!(reconnecting, 1);
        assert_eq!(manager.reconnect_attempts(), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(manager.connection_status());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_pending_and_disconnects() {
        let hub = MemoryHub::new();
        let (manager, id) = manager_on(&hub);
        manager.start();
        manager.join_note("n1");
        settle().await;

        manager.send_update(NoteUpdate::new("n1", "late"));
        manager.shutdown();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(hub.updates_sent_by(id).is_empty());
        assert!(!manager.connection_status());
    }
}
