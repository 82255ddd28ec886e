//! Single-connection realtime manager.
//!
//! At most one socket is live at a time. Every connect bumps a generation
//! counter and tags the connection task with it; events from an older
//! generation are ignored, so a superseded socket can never touch state.

use crate::transport::{SocketConnection, SocketEvent, SocketTransport};
use crate::{RealtimeError, RealtimeResult, ReconnectPolicy};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Torn down for backgrounding; reconnects on foreground.
    Paused,
}

/// Events emitted by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    StateChanged(ConnectionState),
    Opened,
    Message(String),
    Failure(String),
    Closed { code: u16, reason: String },
}

/// Ask the owner to obtain a fresh token and connect again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectRequest {
    /// Generation of the connection that failed.
    pub generation: u64,
    /// Consecutive failures so far, starting at 1.
    pub attempt: u32,
    /// Wait this long before reconnecting.
    pub delay: Duration,
}

struct ActiveConnection {
    generation: u64,
    access_token: String,
    outgoing: Option<mpsc::Sender<String>>,
    task: JoinHandle<()>,
}

struct Slot {
    state: ConnectionState,
    generation: u64,
    failed_attempts: u32,
    active: Option<ActiveConnection>,
}

struct Inner {
    transport: Arc<dyn SocketTransport>,
    policy: ReconnectPolicy,
    slot: Mutex<Slot>,
    event_tx: broadcast::Sender<RealtimeEvent>,
    reconnect_tx: mpsc::UnboundedSender<ReconnectRequest>,
    reconnect_rx: Mutex<Option<mpsc::UnboundedReceiver<ReconnectRequest>>>,
}

/// Realtime connection manager. Clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn SocketTransport>, policy: ReconnectPolicy) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                transport,
                policy,
                slot: Mutex::new(Slot {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    failed_attempts: 0,
                    active: None,
                }),
                event_tx,
                reconnect_tx,
                reconnect_rx: Mutex::new(Some(reconnect_rx)),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.slot.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_paused(&self) -> bool {
        self.state() == ConnectionState::Paused
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.inner.policy
    }

    /// Subscribe to realtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Take the reconnect request stream. Only the first call gets it.
    pub fn take_reconnect_requests(&self) -> Option<mpsc::UnboundedReceiver<ReconnectRequest>> {
        self.inner.reconnect_rx.lock().take()
    }

    /// True if no connect or disconnect happened since `generation`.
    pub fn is_current(&self, generation: u64) -> bool {
        self.inner.slot.lock().generation == generation
    }

    /// Open a connection authenticated with `access_token`, replacing any
    /// existing one. Skipped while paused. Must be called within a tokio
    /// runtime.
    pub fn connect(&self, access_token: &str) {
        let mut slot = self.inner.slot.lock();
        if slot.state == ConnectionState::Paused {
            debug!("Realtime connection paused, skipping connect");
            return;
        }
        if slot
            .active
            .as_ref()
            .is_some_and(|active| active.access_token == access_token)
        {
            debug!("Realtime connection already uses this token");
            return;
        }

        self.inner.close_active(&mut slot);
        slot.generation += 1;
        let generation = slot.generation;
        self.inner.set_state(&mut slot, ConnectionState::Connecting);

        let task = tokio::spawn(run_connection(
            self.inner.clone(),
            generation,
            access_token.to_string(),
        ));
        slot.active = Some(ActiveConnection {
            generation,
            access_token: access_token.to_string(),
            outgoing: None,
            task,
        });
    }

    /// Close the active connection. A paused manager skips connects until
    /// [`resume`](Self::resume).
    pub fn disconnect(&self, paused: bool) {
        let mut slot = self.inner.slot.lock();
        self.inner.close_active(&mut slot);
        slot.generation += 1;
        slot.failed_attempts = 0;
        let state = if paused {
            ConnectionState::Paused
        } else {
            ConnectionState::Disconnected
        };
        if slot.state != state {
            info!(paused, "Realtime connection closed");
        }
        self.inner.set_state(&mut slot, state);
    }

    /// Leave the paused state. Returns whether the manager was paused.
    pub fn resume(&self) -> bool {
        let mut slot = self.inner.slot.lock();
        if slot.state != ConnectionState::Paused {
            return false;
        }
        self.inner.set_state(&mut slot, ConnectionState::Disconnected);
        true
    }

    /// Send a text frame on the live connection.
    pub async fn send(&self, text: impl Into<String>) -> RealtimeResult<()> {
        let sender = {
            let slot = self.inner.slot.lock();
            if slot.state != ConnectionState::Connected {
                return Err(RealtimeError::NotConnected);
            }
            slot.active
                .as_ref()
                .and_then(|active| active.outgoing.clone())
                .ok_or(RealtimeError::NotConnected)?
        };
        sender
            .send(text.into())
            .await
            .map_err(|e| RealtimeError::Send(e.to_string()))
    }
}

impl Inner {
    fn set_state(&self, slot: &mut Slot, state: ConnectionState) {
        if slot.state != state {
            debug!(old_state = ?slot.state, new_state = ?state, "Realtime state transition");
            slot.state = state;
            let _ = self.event_tx.send(RealtimeEvent::StateChanged(state));
        }
    }

    fn close_active(&self, slot: &mut Slot) {
        if let Some(active) = slot.active.take() {
            // Dropping the sender closes the socket.
            active.task.abort();
            drop(active.outgoing);
        }
    }

    fn is_live(&self, slot: &Slot, generation: u64) -> bool {
        slot.generation == generation
            && slot
                .active
                .as_ref()
                .is_some_and(|active| active.generation == generation)
    }

    fn attach(&self, generation: u64, outgoing: mpsc::Sender<String>) -> bool {
        let mut slot = self.slot.lock();
        if !self.is_live(&slot, generation) {
            return false;
        }
        if let Some(active) = slot.active.as_mut() {
            active.outgoing = Some(outgoing);
        }
        true
    }

    fn on_opened(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if !self.is_live(&slot, generation) {
            return;
        }
        slot.failed_attempts = 0;
        self.set_state(&mut slot, ConnectionState::Connected);
        info!(generation, "Realtime connection opened");
        let _ = self.event_tx.send(RealtimeEvent::Opened);
    }

    fn on_message(&self, generation: u64, text: String) {
        let slot = self.slot.lock();
        if !self.is_live(&slot, generation) {
            return;
        }
        let _ = self.event_tx.send(RealtimeEvent::Message(text));
    }

    fn on_failure(&self, generation: u64, reason: String) {
        let mut slot = self.slot.lock();
        if !self.is_live(&slot, generation) {
            return;
        }
        warn!(generation, reason = %reason, "Realtime connection failed");
        // The failing task is the caller, so detach rather than abort.
        slot.active = None;
        self.set_state(&mut slot, ConnectionState::Disconnected);
        let _ = self.event_tx.send(RealtimeEvent::Failure(reason));

        slot.failed_attempts = slot.failed_attempts.saturating_add(1);
        let attempt = slot.failed_attempts;
        if !self.policy.allows(attempt) {
            warn!(attempt, "Realtime reconnect attempts exhausted");
            return;
        }
        let request = ReconnectRequest {
            generation,
            attempt,
            delay: self.policy.delay_for_attempt(attempt),
        };
        debug!(attempt, delay_ms = request.delay.as_millis() as u64, "Requesting reconnect");
        let _ = self.reconnect_tx.send(request);
    }

    fn on_closed(&self, generation: u64, code: u16, reason: String) {
        let mut slot = self.slot.lock();
        if !self.is_live(&slot, generation) {
            return;
        }
        slot.active = None;
        self.set_state(&mut slot, ConnectionState::Disconnected);
        let _ = self.event_tx.send(RealtimeEvent::Closed { code, reason });
    }
}

async fn run_connection(inner: Arc<Inner>, generation: u64, access_token: String) {
    let SocketConnection {
        mut events,
        outgoing,
    } = match inner.transport.open(&access_token).await {
        Ok(connection) => connection,
        Err(e) => {
            inner.on_failure(generation, e.to_string());
            return;
        }
    };
    if !inner.attach(generation, outgoing) {
        debug!(generation, "Connection superseded while opening");
        return;
    }

    while let Some(event) = events.recv().await {
        match event {
            SocketEvent::Opened => inner.on_opened(generation),
            SocketEvent::Message(text) => inner.on_message(generation, text),
            SocketEvent::Failure(reason) => {
                inner.on_failure(generation, reason);
                return;
            }
            SocketEvent::Closed { code, reason } => {
                inner.on_closed(generation, code, reason);
                return;
            }
        }
    }
    inner.on_failure(generation, "socket event stream ended".to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;

    struct Peer {
        token: String,
        events: mpsc::Sender<SocketEvent>,
        outgoing: mpsc::Receiver<String>,
    }

    struct MockSocketTransport {
        opens: AtomicUsize,
        failing_opens: AtomicUsize,
        peers: mpsc::UnboundedSender<Peer>,
    }

    #[async_trait]
    impl SocketTransport for MockSocketTransport {
        async fn open(&self, access_token: &str) -> RealtimeResult<SocketConnection> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self
                .failing_opens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(RealtimeError::TransportFailure("refused".to_string()));
            }
            let (event_tx, event_rx) = mpsc::channel(16);
            let (outgoing_tx, outgoing_rx) = mpsc::channel(16);
            event_tx.try_send(SocketEvent::Opened).unwrap();
            let _ = self.peers.send(Peer {
                token: access_token.to_string(),
                events: event_tx,
                outgoing: outgoing_rx,
            });
            Ok(SocketConnection {
                events: event_rx,
                outgoing: outgoing_tx,
            })
        }
    }

    struct Harness {
        manager: ConnectionManager,
        transport: Arc<MockSocketTransport>,
        peers: mpsc::UnboundedReceiver<Peer>,
        events: broadcast::Receiver<RealtimeEvent>,
    }

    fn harness_with(policy: ReconnectPolicy) -> Harness {
        let (peer_tx, peers) = mpsc::unbounded_channel();
        let transport = Arc::new(MockSocketTransport {
            opens: AtomicUsize::new(0),
            failing_opens: AtomicUsize::new(0),
            peers: peer_tx,
        });
        let manager = ConnectionManager::new(transport.clone(), policy);
        let events = manager.subscribe();
        Harness {
            manager,
            transport,
            peers,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(ReconnectPolicy::default())
    }

    async fn next_peer(h: &mut Harness) -> Peer {
        timeout(Duration::from_secs(1), h.peers.recv())
            .await
            .expect("transport was not opened")
            .unwrap()
    }

    async fn wait_for(
        rx: &mut broadcast::Receiver<RealtimeEvent>,
        mut matches: impl FnMut(&RealtimeEvent) -> bool,
    ) -> RealtimeEvent {
        timeout(Duration::from_secs(1), async {
            loop {
                let event = rx.recv().await.unwrap();
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event not observed")
    }

    async fn connect_and_open(h: &mut Harness, token: &str) -> Peer {
        h.manager.connect(token);
        let peer = next_peer(h).await;
        wait_for(&mut h.events, |e| *e == RealtimeEvent::Opened).await;
        peer
    }

    #[tokio::test]
    async fn test_initial_state() {
        let h = harness();
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert!(!h.manager.is_connected());
        assert!(h.manager.take_reconnect_requests().is_some());
        assert!(h.manager.take_reconnect_requests().is_none());
    }

    #[tokio::test]
    async fn test_connect_reaches_connected() {
        let mut h = harness();
        h.manager.connect("token-1");
        assert_eq!(h.manager.state(), ConnectionState::Connecting);

        let peer = next_peer(&mut h).await;
        assert_eq!(peer.token, "token-1");
        wait_for(&mut h.events, |e| {
            *e == RealtimeEvent::StateChanged(ConnectionState::Connected)
        })
        .await;
        assert!(h.manager.is_connected());
    }

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let mut h = harness();
        let mut peer = connect_and_open(&mut h, "token-1").await;

        peer.events
            .send(SocketEvent::Message("hello".to_string()))
            .await
            .unwrap();
        let event = wait_for(&mut h.events, |e| matches!(e, RealtimeEvent::Message(_))).await;
        assert_eq!(event, RealtimeEvent::Message("hello".to_string()));

        h.manager.send("ping").await.unwrap();
        assert_eq!(peer.outgoing.recv().await.as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let h = harness();
        assert!(matches!(
            h.manager.send("x").await,
            Err(RealtimeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_new_token_replaces_connection() {
        let mut h = harness();
        let mut first = connect_and_open(&mut h, "token-1").await;

        let second = connect_and_open(&mut h, "token-2").await;

        assert_eq!(second.token, "token-2");
        // The first socket's sender was dropped.
        assert_eq!(first.outgoing.recv().await, None);
        assert_eq!(h.transport.opens.load(Ordering::SeqCst), 2);
        assert!(h.manager.is_connected());
    }

    #[tokio::test]
    async fn test_same_token_is_noop() {
        let mut h = harness();
        let _peer = connect_and_open(&mut h, "token-1").await;

        h.manager.connect("token-1");

        assert_eq!(h.transport.opens.load(Ordering::SeqCst), 1);
        assert!(h.manager.is_connected());
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let mut h = harness();
        let mut peer = connect_and_open(&mut h, "token-1").await;

        h.manager.disconnect(true);
        assert_eq!(h.manager.state(), ConnectionState::Paused);
        assert_eq!(peer.outgoing.recv().await, None);

        // Token replacement while backgrounded does not reconnect.
        h.manager.connect("token-2");
        assert_eq!(h.manager.state(), ConnectionState::Paused);
        assert_eq!(h.transport.opens.load(Ordering::SeqCst), 1);

        assert!(h.manager.resume());
        assert!(!h.manager.resume());
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);

        let peer = connect_and_open(&mut h, "token-2").await;
        assert_eq!(peer.token, "token-2");
        assert!(h.manager.is_connected());
    }

    #[tokio::test]
    async fn test_plain_disconnect_is_not_resumable() {
        let mut h = harness();
        let _peer = connect_and_open(&mut h, "token-1").await;

        h.manager.disconnect(false);

        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert!(!h.manager.resume());
    }

    #[tokio::test]
    async fn test_failure_requests_reconnect_with_backoff() {
        let mut h = harness();
        let mut requests = h.manager.take_reconnect_requests().unwrap();

        let peer = connect_and_open(&mut h, "token-1").await;
        peer.events
            .send(SocketEvent::Failure("reset".to_string()))
            .await
            .unwrap();
        let request = timeout(Duration::from_secs(1), requests.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.attempt, 1);
        assert_eq!(request.delay, Duration::from_millis(500));
        assert!(h.manager.is_current(request.generation));
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);

        // Second consecutive failure, this time while opening.
        h.transport.failing_opens.store(1, Ordering::SeqCst);
        h.manager.connect("token-2");
        let request = timeout(Duration::from_secs(1), requests.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.attempt, 2);
        assert_eq!(request.delay, Duration::from_millis(1000));

        // A successful open resets the counter.
        let peer = connect_and_open(&mut h, "token-3").await;
        peer.events
            .send(SocketEvent::Failure("reset".to_string()))
            .await
            .unwrap();
        let request = timeout(Duration::from_secs(1), requests.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.attempt, 1);
    }

    #[tokio::test]
    async fn test_reconnect_attempts_are_bounded() {
        let mut h = harness_with(ReconnectPolicy {
            max_attempts: Some(1),
            ..ReconnectPolicy::default()
        });
        let mut requests = h.manager.take_reconnect_requests().unwrap();
        h.transport.failing_opens.store(2, Ordering::SeqCst);

        h.manager.connect("token-1");
        wait_for(&mut h.events, |e| matches!(e, RealtimeEvent::Failure(_))).await;
        assert_eq!(requests.recv().await.unwrap().attempt, 1);

        h.manager.connect("token-2");
        wait_for(&mut h.events, |e| matches!(e, RealtimeEvent::Failure(_))).await;
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_peer_close_does_not_reconnect() {
        let mut h = harness();
        let mut requests = h.manager.take_reconnect_requests().unwrap();
        let peer = connect_and_open(&mut h, "token-1").await;

        peer.events
            .send(SocketEvent::Closed {
                code: 1000,
                reason: "bye".to_string(),
            })
            .await
            .unwrap();

        let event = wait_for(&mut h.events, |e| matches!(e, RealtimeEvent::Closed { .. })).await;
        assert_eq!(
            event,
            RealtimeEvent::Closed {
                code: 1000,
                reason: "bye".to_string()
            }
        );
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_invalidates_pending_reconnect() {
        let mut h = harness();
        let mut requests = h.manager.take_reconnect_requests().unwrap();
        let peer = connect_and_open(&mut h, "token-1").await;
        peer.events
            .send(SocketEvent::Failure("reset".to_string()))
            .await
            .unwrap();
        let request = requests.recv().await.unwrap();

        h.manager.disconnect(false);

        assert!(!h.manager.is_current(request.generation));
    }

    #[tokio::test]
    async fn test_events_from_replaced_socket_are_ignored() {
        let mut h = harness();
        let first = connect_and_open(&mut h, "token-1").await;
        let _second = connect_and_open(&mut h, "token-2").await;

        // The first task was aborted, so its event channel is gone.
        let _ = first
            .events
            .send(SocketEvent::Failure("late".to_string()))
            .await;
        tokio::task::yield_now().await;

        assert!(h.manager.is_connected());
    }
}
