//! In-process transport
//!
//! [`MemoryConnector`] hands out [`MemorySocket`]s that never touch the
//! network. The embedding code (usually a test) drives each socket by calling
//! [`MemorySocket::open`], [`MemorySocket::deliver`], [`MemorySocket::fail`]
//! and [`MemorySocket::drop_connection`], which report through the same event
//! channel a real socket would use.

use super::frame::Payload;
use super::{
    ConnectionState, Connector, OpenRequest, SocketEvent, SocketEventKind, SocketEventSender,
    SocketHandle, StateCell,
};
use std::sync::{Arc, Mutex};

/// Scriptable socket living entirely in memory
pub struct MemorySocket {
    id: u64,
    url: String,
    bearer_token: Option<String>,
    state: StateCell,
    events: SocketEventSender,
    sent: Mutex<Vec<String>>,
}

impl MemorySocket {
    fn emit(&self, kind: SocketEventKind) {
        let _ = self.events.send(SocketEvent {
            socket_id: self.id,
            kind,
        });
    }

    /// URL the socket was opened with
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Bearer token presented in the handshake
    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    /// Complete the handshake
    pub fn open(&self) {
        if self
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Open)
        {
            self.emit(SocketEventKind::Opened);
        }
    }

    /// Deliver one inbound text frame
    pub fn deliver(&self, text: &str) {
        if self.state.get() == ConnectionState::Open {
            self.emit(SocketEventKind::Message(Payload::decode(text)));
        }
    }

    /// Report a transport error followed by the close it causes
    pub fn fail(&self, message: &str) {
        if self.state.get().is_live() {
            self.emit(SocketEventKind::Error(message.to_string()));
            self.drop_connection();
        }
    }

    /// Simulate the peer going away
    pub fn drop_connection(&self) {
        if self.state.get() != ConnectionState::Closed {
            self.state.set(ConnectionState::Closed);
            self.emit(SocketEventKind::Closed {
                code: Some(1006),
                reason: String::new(),
            });
        }
    }

    /// Text frames sent through this socket
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl SocketHandle for MemorySocket {
    fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, text: &str) -> bool {
        if self.state.get() != ConnectionState::Open {
            return false;
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(text.to_string());
        }
        true
    }

    fn close(&self) {
        if self.state.begin_close() {
            self.state.set(ConnectionState::Closed);
            self.emit(SocketEventKind::Closed {
                code: Some(1000),
                reason: String::new(),
            });
        }
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }
}

/// Connector producing [`MemorySocket`]s
///
/// Clones share the same socket log, so a test can keep one clone and give
/// the other to the client.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    sockets: Arc<Mutex<Vec<Arc<MemorySocket>>>>,
}

impl MemoryConnector {
    /// Create a connector with no sockets
    pub fn new() -> Self {
        Self::default()
    }

    /// Every socket opened so far, oldest first
    pub fn sockets(&self) -> Vec<Arc<MemorySocket>> {
        self.sockets.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Most recently opened socket
    pub fn latest(&self) -> Option<Arc<MemorySocket>> {
        self.sockets().last().cloned()
    }

    /// Number of sockets opened so far
    pub fn open_count(&self) -> usize {
        self.sockets().len()
    }

    /// Number of sockets currently connecting or open
    pub fn live_count(&self) -> usize {
        self.sockets()
            .iter()
            .filter(|s| s.state().is_live())
            .count()
    }
}

impl Connector for MemoryConnector {
    fn open(&self, request: OpenRequest, events: SocketEventSender) -> Arc<dyn SocketHandle> {
        let socket = Arc::new(MemorySocket {
            id: request.socket_id,
            url: request.url,
            bearer_token: request.bearer_token,
            state: StateCell::new(ConnectionState::Connecting),
            events,
            sent: Mutex::new(Vec::new()),
        });

        if let Ok(mut sockets) = self.sockets.lock() {
            sockets.push(socket.clone());
        }

        socket
    }
}
