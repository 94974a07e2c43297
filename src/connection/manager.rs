//! Connection manager
//!
//! Keeps a single shared socket to the notification endpoint, no matter how
//! many consumers ask for one.
//!
//! # State machine
//!
//! ```text
//! Idle ──acquire──▶ Connecting ──opened──▶ Open ──closed──▶ Connecting (reconnect scheduled)
//!                                                  └──────▶ Closed     (nobody left / signed out)
//! ```
//!
//! * `acquire` while signed out tears down whatever exists and returns a
//!   dormant handle; no I/O happens until the session is restored.
//! * A close while consumers remain schedules a reconnect after
//!   [`Backoff::delay`]; the attempt counter resets on every successful open.
//! * Releasing the last handle closes the socket and cancels any pending
//!   reconnect, unless the manager was built with `linger_when_idle` and the
//!   session is still authenticated.
//!
//! Socket events are consumed by a single task, one at a time, so the frame
//! callback never runs concurrently with itself.

use super::backoff::Backoff;
use crate::core::auth::AuthSession;
use crate::transport::{
    ConnectionState, Connector, OpenRequest, Payload, SocketEvent, SocketEventKind,
    SocketEventSender, SocketHandle, WsConnector,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Callback invoked once per inbound frame
pub type FrameCallback = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Mutable bookkeeping, guarded by one lock
struct ManagerState {
    socket: Option<Arc<dyn SocketHandle>>,
    state: ConnectionState,
    reconnect_attempt: u32,
    should_reconnect: bool,
    consumers: BTreeMap<u64, Option<FrameCallback>>,
    next_consumer_id: u64,
    next_socket_id: u64,
    reconnect_timer: Option<JoinHandle<()>>,
    timer_generation: u64,
    last_delay: Option<Duration>,
}

impl ManagerState {
    fn new() -> Self {
        Self {
            socket: None,
            state: ConnectionState::Idle,
            reconnect_attempt: 0,
            should_reconnect: false,
            consumers: BTreeMap::new(),
            next_consumer_id: 0,
            next_socket_id: 0,
            reconnect_timer: None,
            timer_generation: 0,
            last_delay: None,
        }
    }

    fn is_current(&self, socket_id: u64) -> bool {
        self.socket.as_ref().is_some_and(|s| s.id() == socket_id)
    }
}

struct Inner {
    state: Mutex<ManagerState>,
    connector: Arc<dyn Connector>,
    session: AuthSession,
    backoff: Backoff,
    url: String,
    linger_when_idle: bool,
    on_frame: Option<FrameCallback>,
    events: SocketEventSender,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a fresh socket and make it the shared one
    fn connect(&self, st: &mut ManagerState) {
        st.next_socket_id += 1;
        let socket_id = st.next_socket_id;
        st.should_reconnect = true;
        st.state = ConnectionState::Connecting;

        tracing::debug!(
            socket_id,
            attempt = st.reconnect_attempt,
            url = %self.url,
            "Opening notification socket"
        );

        let socket = self.connector.open(
            OpenRequest {
                socket_id,
                url: self.url.clone(),
                bearer_token: self.session.token(),
            },
            self.events.clone(),
        );
        st.socket = Some(socket);
    }

    /// Close the shared socket and cancel any pending reconnect
    fn teardown(&self, st: &mut ManagerState, reason: &'static str) {
        st.should_reconnect = false;
        st.timer_generation += 1;
        if let Some(timer) = st.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(socket) = st.socket.take() {
            tracing::info!(socket_id = socket.id(), reason, "Closing shared connection");
            socket.close();
        }
        st.state = ConnectionState::Closed;
    }

    fn handle_socket_event(self: &Arc<Self>, event: SocketEvent) {
        let SocketEvent { socket_id, kind } = event;

        match kind {
            SocketEventKind::Opened => {
                let mut st = self.lock();
                if !st.is_current(socket_id) {
                    return;
                }
                st.state = ConnectionState::Open;
                st.reconnect_attempt = 0;
                tracing::info!(socket_id, "Notification socket open");
            }
            SocketEventKind::Message(payload) => {
                let callbacks: Vec<FrameCallback> = {
                    let st = self.lock();
                    if !st.is_current(socket_id) {
                        tracing::trace!(socket_id, "Dropping frame from stale socket");
                        return;
                    }
                    st.consumers.values().flatten().cloned().collect()
                };

                tracing::trace!(socket_id, "Frame received");
                if let Some(on_frame) = &self.on_frame {
                    on_frame(&payload);
                }
                for callback in callbacks {
                    callback(&payload);
                }
            }
            SocketEventKind::Error(message) => {
                if self.lock().is_current(socket_id) {
                    tracing::warn!(socket_id, error = %message, "Notification socket error");
                }
            }
            SocketEventKind::Closed { code, reason } => {
                let mut st = self.lock();
                if !st.is_current(socket_id) {
                    return;
                }
                st.socket = None;
                tracing::info!(socket_id, code = ?code, reason = %reason, "Notification socket closed");
                self.schedule_reconnect(&mut st);
            }
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, st: &mut ManagerState) {
        let wanted =
            st.should_reconnect && !st.consumers.is_empty() && self.session.is_authenticated();
        if !wanted {
            st.should_reconnect = false;
            st.state = ConnectionState::Closed;
            return;
        }

        st.reconnect_attempt = st.reconnect_attempt.saturating_add(1);
        let attempt = st.reconnect_attempt;
        let delay = self.backoff.delay(attempt);
        st.state = ConnectionState::Connecting;
        st.last_delay = Some(delay);
        st.timer_generation += 1;
        let generation = st.timer_generation;

        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        if let Some(previous) = st.reconnect_timer.take() {
            previous.abort();
        }
        let weak = Arc::downgrade(self);
        st.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.reconnect_due(generation);
            }
        }));
    }

    fn reconnect_due(&self, generation: u64) {
        let mut st = self.lock();
        if st.timer_generation != generation {
            return;
        }
        st.reconnect_timer = None;

        if !st.should_reconnect || st.consumers.is_empty() || !self.session.is_authenticated() {
            st.should_reconnect = false;
            st.state = ConnectionState::Closed;
            return;
        }
        self.connect(&mut st);
    }

    fn on_session_change(&self, authenticated: bool) {
        let mut st = self.lock();
        if !authenticated {
            if st.socket.is_some() || st.reconnect_timer.is_some() {
                self.teardown(&mut st, "session revoked");
            }
            return;
        }
        if !st.consumers.is_empty() && st.socket.is_none() && st.reconnect_timer.is_none() {
            st.reconnect_attempt = 0;
            self.connect(&mut st);
        }
    }

    fn release(&self, consumer_id: u64) {
        let mut st = self.lock();
        if st.consumers.remove(&consumer_id).is_none() {
            return;
        }
        tracing::debug!(
            consumer_id,
            remaining = st.consumers.len(),
            "Consumer released"
        );

        let keep_alive = self.linger_when_idle && self.session.is_authenticated();
        if st.consumers.is_empty() && !keep_alive {
            self.teardown(&mut st, "last consumer released");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let st = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = st.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(socket) = st.socket.take() {
            socket.close();
        }
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

/// Owner of the shared notification socket
///
/// Cheap to clone; clones manage the same connection. Dropping every clone
/// and every [`ConnectionHandle`] closes the socket.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Start building a manager for the given endpoint
    pub fn builder(url: impl Into<String>) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::new(url)
    }

    /// Register a consumer without a frame callback
    pub fn acquire(&self) -> ConnectionHandle {
        self.register(None)
    }

    /// Register a consumer that is called with every inbound frame
    pub fn acquire_with<F>(&self, on_message: F) -> ConnectionHandle
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.register(Some(Arc::new(on_message)))
    }

    fn register(&self, callback: Option<FrameCallback>) -> ConnectionHandle {
        let mut st = self.inner.lock();
        st.next_consumer_id += 1;
        let consumer_id = st.next_consumer_id;
        st.consumers.insert(consumer_id, callback);

        if !self.inner.session.is_authenticated() {
            tracing::debug!(consumer_id, "Signed out; handing out dormant connection handle");
            self.inner.teardown(&mut st, "unauthenticated");
        } else if st.socket.is_none() && st.reconnect_timer.is_none() {
            st.reconnect_attempt = 0;
            self.inner.connect(&mut st);
        } else {
            tracing::debug!(consumer_id, state = %st.state, "Reusing shared connection");
        }

        ConnectionHandle {
            inner: self.inner.clone(),
            consumer_id,
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Reconnect attempts since the last successful open
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.lock().reconnect_attempt
    }

    /// Number of registered consumers
    pub fn consumer_count(&self) -> usize {
        self.inner.lock().consumers.len()
    }

    /// Wait chosen for the most recently scheduled reconnect
    pub fn last_reconnect_delay(&self) -> Option<Duration> {
        self.inner.lock().last_delay
    }

    /// Whether a reconnect timer is pending
    pub fn reconnect_pending(&self) -> bool {
        self.inner.lock().reconnect_timer.is_some()
    }

    /// Endpoint URL
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Force the shared socket closed and stop reconnecting
    ///
    /// Registered consumers stay registered; the next `acquire` (or a fresh
    /// login) opens a new socket.
    pub fn shutdown(&self) {
        let mut st = self.inner.lock();
        self.inner.teardown(&mut st, "shutdown");
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.lock();
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.url)
            .field("state", &st.state)
            .field("reconnect_attempt", &st.reconnect_attempt)
            .field("consumers", &st.consumers.len())
            .finish()
    }
}

/// One consumer's interest in the shared connection
///
/// Dropping the handle (or calling [`release`](Self::release)) unregisters
/// the consumer.
pub struct ConnectionHandle {
    inner: Arc<Inner>,
    consumer_id: u64,
}

impl ConnectionHandle {
    /// Identifier of this consumer
    pub fn consumer_id(&self) -> u64 {
        self.consumer_id
    }

    /// Send a text frame over the shared socket; true iff it was open
    pub fn send(&self, text: &str) -> bool {
        let socket = self.inner.lock().socket.clone();
        socket.is_some_and(|s| s.send(text))
    }

    /// Force the shared socket closed and suppress reconnects
    pub fn close(&self) {
        let mut st = self.inner.lock();
        self.inner.teardown(&mut st, "closed by consumer");
    }

    /// Current state of the shared connection
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Unregister this consumer
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.inner.release(self.consumer_id);
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("consumer_id", &self.consumer_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Builder for [`ConnectionManager`]
pub struct ConnectionManagerBuilder {
    url: String,
    connector: Option<Arc<dyn Connector>>,
    session: Option<AuthSession>,
    backoff: Backoff,
    linger_when_idle: bool,
    on_frame: Option<FrameCallback>,
}

impl ConnectionManagerBuilder {
    /// Create a builder for the given endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connector: None,
            session: None,
            backoff: Backoff::default(),
            linger_when_idle: false,
            on_frame: None,
        }
    }

    /// Use a specific transport (defaults to [`WsConnector`])
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Share an authentication session
    pub fn with_session(mut self, session: AuthSession) -> Self {
        self.session = Some(session);
        self
    }

    /// Override the reconnect policy
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Keep the socket open after the last consumer leaves, while signed in
    pub fn linger_when_idle(mut self, linger: bool) -> Self {
        self.linger_when_idle = linger;
        self
    }

    /// Callback invoked first for every frame, before consumer callbacks
    pub fn on_frame<F>(mut self, on_frame: F) -> Self
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.on_frame = Some(Arc::new(on_frame));
        self
    }

    /// Spawn the manager's tasks and return it
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> ConnectionManager {
        let (events, mut events_rx) = mpsc::unbounded_channel::<SocketEvent>();
        let session = self.session.unwrap_or_default();
        let mut session_rx = session.subscribe();

        let inner = Arc::new(Inner {
            state: Mutex::new(ManagerState::new()),
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(WsConnector::new())),
            session,
            backoff: self.backoff,
            url: self.url,
            linger_when_idle: self.linger_when_idle,
            on_frame: self.on_frame,
            events,
            tasks: Mutex::new(Vec::new()),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let event_loop = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.handle_socket_event(event);
            }
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let session_watch = tokio::spawn(async move {
            while session_rx.changed().await.is_ok() {
                let authenticated = session_rx.borrow_and_update().is_some();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.on_session_change(authenticated);
            }
        });

        inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([event_loop, session_watch]);

        ConnectionManager { inner }
    }
}
