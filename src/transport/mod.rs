//! Transport socket seam
//!
//! A transport is a single raw connection to the notification endpoint. It is
//! receive-only from this crate's point of view: outbound chat queries travel
//! over REST, so [`SocketHandle::send`] exists for completeness and never
//! queues.
//!
//! # Architecture
//!
//! ```text
//! Connector::open(request, events) ──▶ SocketHandle { send, close, state }
//!                                          │
//!                          background task drives the socket
//!                                          │
//!        SocketEvent { socket_id, Opened | Message(Payload) | Error | Closed }
//!                                          │
//!                                          ▼
//!                                  ConnectionManager
//! ```
//!
//! Two connectors ship with the crate: [`socket::WsConnector`] over
//! tokio-tungstenite and [`memory::MemoryConnector`], a scriptable in-process
//! transport.

pub mod frame;
pub mod memory;
pub mod socket;

pub use frame::{InboundEvent, Payload, Source};
pub use memory::{MemoryConnector, MemorySocket};
pub use socket::{TransportSocket, WsConnector};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;

/// Lifecycle state shared by sockets and the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket has been requested yet
    Idle,
    /// Handshake or reconnect in progress
    Connecting,
    /// Frames are flowing
    Open,
    /// Close requested, not yet finished
    Closing,
    /// No live socket
    Closed,
}

impl ConnectionState {
    /// Whether a socket in this state counts as live
    pub fn is_live(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Open => 2,
            ConnectionState::Closing => 3,
            ConnectionState::Closed => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Idle,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Open,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Lock-free state cell shared between a socket handle and its driver task
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self(Arc::new(AtomicU8::new(state.as_u8())))
    }

    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }

    /// Move `from` → `to` atomically; returns false if the state was not `from`
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Request a close; returns false if the socket is already closing or closed
    pub(crate) fn begin_close(&self) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let state = ConnectionState::from_u8(current);
            if matches!(state, ConnectionState::Closing | ConnectionState::Closed) {
                return false;
            }
            match self.0.compare_exchange(
                current,
                ConnectionState::Closing.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// What happened on a socket
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEventKind {
    /// Handshake completed
    Opened,
    /// One inbound frame, already decoded
    Message(Payload),
    /// Transport-level error; a `Closed` event follows
    Error(String),
    /// The socket is gone
    Closed {
        /// Close code sent by the peer, if any
        code: Option<u16>,
        /// Close reason sent by the peer
        reason: String,
    },
}

/// An event tagged with the socket that produced it
///
/// The id lets the manager ignore late events from sockets it already
/// discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketEvent {
    /// Identifier assigned by the manager when the socket was opened
    pub socket_id: u64,
    /// The event itself
    pub kind: SocketEventKind,
}

/// Sender half that socket drivers report into
pub type SocketEventSender = mpsc::UnboundedSender<SocketEvent>;

/// Parameters for opening one socket
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// Identifier to tag every event of this socket with
    pub socket_id: u64,
    /// Endpoint URL
    pub url: String,
    /// Bearer token for the handshake
    pub bearer_token: Option<String>,
}

/// A live (or dying) socket
pub trait SocketHandle: Send + Sync {
    /// Identifier given in the [`OpenRequest`]
    fn id(&self) -> u64;

    /// Send a text frame; returns true iff the socket was open
    fn send(&self, text: &str) -> bool;

    /// Close the socket; idempotent
    fn close(&self);

    /// Current lifecycle state
    fn state(&self) -> ConnectionState;
}

/// Factory for sockets
///
/// `open` must return immediately with a socket in the `Connecting` state and
/// report progress through `events`. Every socket eventually reports exactly
/// one `Closed` event.
pub trait Connector: Send + Sync + 'static {
    /// Start connecting
    fn open(&self, request: OpenRequest, events: SocketEventSender) -> Arc<dyn SocketHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_transitions() {
        let cell = StateCell::new(ConnectionState::Connecting);

        assert!(cell.transition(ConnectionState::Connecting, ConnectionState::Open));
        assert!(!cell.transition(ConnectionState::Connecting, ConnectionState::Open));
        assert_eq!(cell.get(), ConnectionState::Open);
    }

    #[test]
    fn test_begin_close_is_idempotent() {
        let cell = StateCell::new(ConnectionState::Open);

        assert!(cell.begin_close());
        assert_eq!(cell.get(), ConnectionState::Closing);
        assert!(!cell.begin_close());

        cell.set(ConnectionState::Closed);
        assert!(!cell.begin_close());
        assert_eq!(cell.get(), ConnectionState::Closed);
    }

    #[test]
    fn test_is_live() {
        assert!(ConnectionState::Connecting.is_live());
        assert!(ConnectionState::Open.is_live());
        assert!(!ConnectionState::Idle.is_live());
        assert!(!ConnectionState::Closing.is_live());
        assert!(!ConnectionState::Closed.is_live());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_value(ConnectionState::Connecting).unwrap();
        assert_eq!(json, "connecting");
        assert_eq!(ConnectionState::Open.to_string(), "open");
    }
}
