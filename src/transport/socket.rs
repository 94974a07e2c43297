//! tokio-tungstenite transport
//!
//! Each [`TransportSocket`] is backed by one spawned task that performs the
//! handshake, decodes inbound frames and forwards outbound text. The handle
//! only holds the shared state cell and a command channel, so `send`,
//! `close` and `state` never block.

use super::frame::Payload;
use super::{
    ConnectionState, Connector, OpenRequest, SocketEvent, SocketEventKind, SocketEventSender,
    SocketHandle, StateCell,
};
use crate::core::error::TransportError;
use futures::SinkExt;
use futures::stream::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Commands from the handle to the driver task
enum Outbound {
    Text(String),
    Close,
}

/// Connector opening real WebSocket connections
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn open(&self, request: OpenRequest, events: SocketEventSender) -> Arc<dyn SocketHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        let socket = TransportSocket {
            id: request.socket_id,
            state: StateCell::new(ConnectionState::Connecting),
            outbound: tx,
        };

        let state = socket.state.clone();
        tokio::spawn(async move {
            drive_socket(request, state, events, rx).await;
        });

        Arc::new(socket)
    }
}

/// Handle to one WebSocket connection
pub struct TransportSocket {
    id: u64,
    state: StateCell,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl SocketHandle for TransportSocket {
    fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, text: &str) -> bool {
        if self.state.get() != ConnectionState::Open {
            return false;
        }
        self.outbound.send(Outbound::Text(text.to_string())).is_ok()
    }

    fn close(&self) {
        if self.state.begin_close() {
            // driver already gone
            if self.outbound.send(Outbound::Close).is_err() {
                self.state.set(ConnectionState::Closed);
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }
}

/// Build the handshake request, attaching the bearer token if any
pub(crate) fn build_request(request: &OpenRequest) -> Result<Request, TransportError> {
    let mut http_request =
        request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidRequest {
                url: request.url.clone(),
                message: e.to_string(),
            })?;

    if let Some(token) = &request.bearer_token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
            TransportError::InvalidRequest {
                url: request.url.clone(),
                message: e.to_string(),
            }
        })?;
        http_request.headers_mut().insert(AUTHORIZATION, value);
    }

    Ok(http_request)
}

fn emit(events: &SocketEventSender, socket_id: u64, kind: SocketEventKind) {
    // A dropped receiver means the manager is gone; nothing left to notify.
    let _ = events.send(SocketEvent { socket_id, kind });
}

fn finish(events: &SocketEventSender, state: &StateCell, socket_id: u64, code: Option<u16>, reason: String) {
    state.set(ConnectionState::Closed);
    emit(events, socket_id, SocketEventKind::Closed { code, reason });
}

/// Run one socket from handshake to close
async fn drive_socket(
    request: OpenRequest,
    state: StateCell,
    events: SocketEventSender,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let socket_id = request.socket_id;

    let http_request = match build_request(&request) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(socket_id, error = %e, "Socket request rejected");
            emit(&events, socket_id, SocketEventKind::Error(e.to_string()));
            finish(&events, &state, socket_id, None, String::new());
            return;
        }
    };

    tracing::debug!(socket_id, url = %request.url, "Starting WebSocket handshake");

    // Sends are refused while connecting, so the only command that can
    // arrive here is a close (or the handle being dropped).
    let ws_stream = tokio::select! {
        result = connect_async(http_request) => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                let err = TransportError::Connect {
                    url: request.url.clone(),
                    message: e.to_string(),
                };
                tracing::warn!(socket_id, error = %err, "Socket handshake failed");
                emit(&events, socket_id, SocketEventKind::Error(err.to_string()));
                finish(&events, &state, socket_id, None, String::new());
                return;
            }
        },
        _ = outbound.recv() => {
            tracing::debug!(socket_id, "Socket closed before handshake completed");
            finish(&events, &state, socket_id, None, String::new());
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    if !state.transition(ConnectionState::Connecting, ConnectionState::Open) {
        // close() won the race against the handshake
        let _ = write.send(Message::Close(None)).await;
        finish(&events, &state, socket_id, None, String::new());
        return;
    }

    tracing::info!(socket_id, "Notification socket open");
    emit(&events, socket_id, SocketEventKind::Opened);

    let mut close_code = None;
    let mut close_reason = String::new();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!(socket_id, len = text.len(), "Frame received");
                    emit(&events, socket_id, SocketEventKind::Message(Payload::decode(text.as_str())));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    emit(&events, socket_id, SocketEventKind::Message(binary_payload(socket_id, &bytes)));
                }
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        close_code = Some(u16::from(frame.code));
                        close_reason = frame.reason.as_str().to_string();
                    }
                    tracing::debug!(socket_id, code = ?close_code, "Peer closed socket");
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/Pong are answered by tungstenite
                }
                Some(Err(e)) => {
                    let err = TransportError::Io(e.to_string());
                    tracing::warn!(socket_id, error = %err, "Socket read error");
                    emit(&events, socket_id, SocketEventKind::Error(err.to_string()));
                    break;
                }
                None => break,
            },
            command = outbound.recv() => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        let err = TransportError::Io(e.to_string());
                        tracing::warn!(socket_id, error = %err, "Socket write error");
                        emit(&events, socket_id, SocketEventKind::Error(err.to_string()));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    state.set(ConnectionState::Closing);
                    let _ = write.send(Message::Close(None)).await;
                    tracing::debug!(socket_id, "Socket closed locally");
                    break;
                }
            }
        }
    }

    finish(&events, &state, socket_id, close_code, close_reason);
}

/// Binary frames carry the same UTF-8 text as text frames
fn binary_payload(socket_id: u64, bytes: &[u8]) -> Payload {
    match std::str::from_utf8(bytes) {
        Ok(text) => Payload::decode(text),
        Err(e) => {
            tracing::debug!(
                socket_id,
                len = bytes.len(),
                error = %e,
                "Binary frame is not valid UTF-8; invalid bytes replaced"
            );
            Payload::decode(&String::from_utf8_lossy(bytes))
        }
    }
}
