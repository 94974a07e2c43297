//! Integration tests for the live client
//!
//! These tests spin up a real HTTP+WebSocket server standing in for the
//! gateway and verify the full flow: acquire → socket handshake → REST query
//! submission → streamed frames reassembled by the client.

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use live::prelude::*;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

const TOKEN: &str = "integration-token";

/// Shared state of the fake gateway
struct Gateway {
    frames: broadcast::Sender<String>,
    queries: Mutex<Vec<Value>>,
    accepted_sockets: AtomicUsize,
    open_sockets: AtomicUsize,
}

impl Gateway {
    fn push(&self, frame: Value) {
        let _ = self.frames.send(frame.to_string());
    }

    fn push_text(&self, text: &str) {
        let _ = self.frames.send(text.to_string());
    }

    fn queries(&self) -> Vec<Value> {
        self.queries.lock().unwrap().clone()
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn notifications(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(gateway): State<Arc<Gateway>>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    // subscribe before the handshake completes so no frame is missed
    let frames = gateway.frames.subscribe();
    gateway.accepted_sockets.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| serve_socket(socket, frames, gateway))
}

async fn serve_socket(
    mut socket: WebSocket,
    mut frames: broadcast::Receiver<String>,
    gateway: Arc<Gateway>,
) {
    gateway.open_sockets.fetch_add(1, Ordering::SeqCst);
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    gateway.open_sockets.fetch_sub(1, Ordering::SeqCst);
}

async fn search(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    gateway.queries.lock().unwrap().push(body.clone());

    if body["query"] == "fail" {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }

    let request_id = body["requestId"].as_str().unwrap_or_default().to_string();
    let stream = gateway.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        // a stale request interleaves with the real one
        stream.push(json!({"event": "chat.response", "requestId": "req_stale", "token": "XX"}));
        for token in ["Hel", "lo"] {
            stream.push(json!({"event": "chat.response", "requestId": request_id, "token": token}));
        }
        stream.push(json!({
            "event": "chat.response",
            "requestId": request_id,
            "token": "!",
            "sources": [{"id": "d1", "name": "report.pdf", "page": 3}]
        }));
        stream.push(json!({"event": "chat.response", "requestId": request_id, "complete": true}));
    });

    StatusCode::ACCEPTED
}

/// Helper: start the fake gateway and return (address, state)
async fn start_gateway() -> (SocketAddr, Arc<Gateway>) {
    let (frames, _) = broadcast::channel(64);
    let gateway = Arc::new(Gateway {
        frames,
        queries: Mutex::new(Vec::new()),
        accepted_sockets: AtomicUsize::new(0),
        open_sockets: AtomicUsize::new(0),
    });

    let app = Router::new()
        .route("/api/ws/notifications", get(notifications))
        .route("/api/search", post(search))
        .with_state(gateway.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Small delay to let the server start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, gateway)
}

fn config_for(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        api_base_url: format!("http://{addr}"),
        ws_url: format!("ws://{addr}/api/ws/notifications"),
        ..ClientConfig::default()
    }
}

fn client_for(addr: SocketAddr, token: &str) -> LiveClient {
    LiveClient::builder(config_for(addr))
        .with_session(AuthSession::authenticated(Credentials::new("u1", token)))
        .build()
        .unwrap()
}

/// Helper: poll until `condition` holds or fail after a few seconds
async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_streamed_answer_over_real_socket() {
    let (addr, gateway) = start_gateway().await;
    let client = client_for(addr, TOKEN);

    let _handle = client.acquire();
    eventually("socket open", || client.connection_state() == ConnectionState::Open).await;

    let request_id = client.submit("What grew?", Some("d1".to_string())).await.unwrap();
    eventually("answer complete", || client.active_request().is_none()).await;

    let transcript = client.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, Role::User);
    assert_eq!(transcript[0].text, "What grew?");
    assert_eq!(transcript[1].role, Role::Agent);
    assert_eq!(transcript[1].id, request_id);
    assert_eq!(transcript[1].text, "Hello!");
    assert_eq!(transcript[1].sources.len(), 1);
    assert_eq!(transcript[1].sources[0].page.as_deref(), Some("3"));

    let queries = gateway.queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0]["requestId"], request_id.as_str());
    assert_eq!(queries[0]["documentId"], "d1");
    assert_eq!(queries[0]["context"], json!([]));
}

#[tokio::test]
async fn test_follow_up_query_carries_context() {
    let (addr, gateway) = start_gateway().await;
    let client = client_for(addr, TOKEN);

    let _handle = client.acquire();
    eventually("socket open", || client.connection_state() == ConnectionState::Open).await;

    client.submit("first", None).await.unwrap();
    eventually("first answer", || client.active_request().is_none()).await;
    client.submit("second", None).await.unwrap();
    eventually("second answer", || client.active_request().is_none()).await;

    let queries = gateway.queries();
    assert_eq!(
        queries[1]["context"],
        json!([
            {"role": "user", "message": "first"},
            {"role": "agent", "message": "Hello!"}
        ])
    );
    assert!(queries[1].get("documentId").is_none());
}

#[tokio::test]
async fn test_rejected_query_becomes_notification() {
    let (addr, _gateway) = start_gateway().await;
    let client = client_for(addr, TOKEN);

    let _handle = client.acquire();
    eventually("socket open", || client.connection_state() == ConnectionState::Open).await;

    let err = client.submit("fail", None).await.unwrap_err();
    assert_eq!(err.error_code(), "SUBMISSION_REJECTED");

    let texts: Vec<_> = client.notifications().into_iter().map(|n| n.text).collect();
    assert_eq!(texts, vec!["Error: 500 Internal Server Error"]);
    assert!(client.active_request().is_none());
    assert!(client.session().is_authenticated());
}

#[tokio::test]
async fn test_document_events_over_real_socket() {
    let (addr, gateway) = start_gateway().await;
    let client = client_for(addr, TOKEN);
    client.seed_documents([
        TrackedDocument::new("d1", "processing").with_name("report.pdf"),
        TrackedDocument::new("d2", "uploaded").with_name("scan.pdf"),
    ]);

    let _handle = client.acquire();
    eventually("socket open", || client.connection_state() == ConnectionState::Open).await;

    gateway.push(json!({"event": "documents.processing", "id": "d1", "progressPercentage": 75}));
    gateway.push(json!({"event": "documents.processed", "id": "d1", "status": "processed"}));
    gateway.push(json!({"event": "documents.processing.error", "id": "d2", "error": "virus detected"}));
    gateway.push_text("Scheduled maintenance tonight");

    eventually("two notifications", || client.notifications().len() == 2).await;

    let documents = client.documents();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].id, "d1");
    assert_eq!(documents[0].status, "processed");

    let texts: Vec<_> = client.notifications().into_iter().map(|n| n.text).collect();
    assert_eq!(texts, vec!["virus detected", "Scheduled maintenance tonight"]);
}

#[tokio::test]
async fn test_consumers_share_one_socket_and_release_closes_it() {
    let (addr, gateway) = start_gateway().await;
    let client = client_for(addr, TOKEN);

    let first = client.acquire();
    let second = client.acquire();
    eventually("socket open", || client.connection_state() == ConnectionState::Open).await;
    eventually("server side open", || gateway.open_sockets.load(Ordering::SeqCst) == 1).await;
    assert_eq!(gateway.accepted_sockets.load(Ordering::SeqCst), 1);

    first.release();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.connection_state(), ConnectionState::Open);

    second.release();
    assert_eq!(client.connection_state(), ConnectionState::Closed);
    eventually("server side closed", || gateway.open_sockets.load(Ordering::SeqCst) == 0).await;
}

#[tokio::test]
async fn test_rejected_handshake_is_retried_with_backoff() {
    let (addr, gateway) = start_gateway().await;
    let client = client_for(addr, "wrong-token");

    let _handle = client.acquire();
    eventually("first retry scheduled", || client.connection().reconnect_attempt() >= 1).await;

    assert_eq!(client.connection_state(), ConnectionState::Connecting);
    let delay = client.connection().last_reconnect_delay().unwrap();
    assert!(delay >= Duration::from_millis(250) && delay < Duration::from_millis(550));
    assert_eq!(gateway.open_sockets.load(Ordering::SeqCst), 0);

    eventually("second retry scheduled", || client.connection().reconnect_attempt() >= 2).await;
}

#[tokio::test]
async fn test_logout_closes_socket() {
    let (addr, gateway) = start_gateway().await;
    let client = client_for(addr, TOKEN);

    let _handle = client.acquire();
    eventually("server side open", || gateway.open_sockets.load(Ordering::SeqCst) == 1).await;

    client.session().logout();
    eventually("client closed", || client.connection_state() == ConnectionState::Closed).await;
    eventually("server side closed", || gateway.open_sockets.load(Ordering::SeqCst) == 0).await;
}
