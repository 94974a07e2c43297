//! # vectordocs-live
//!
//! Real-time notification client for the VectorDocs gateway.
//!
//! The client keeps a single shared WebSocket to the notification service and
//! reconciles what arrives on it:
//!
//! - **Document lifecycle events** (uploaded, processing progress, processed,
//!   processing errors) are applied to a locally tracked document list.
//! - **Streamed chat answers** are reassembled token by token into one agent
//!   message per query, keyed by the request id the client minted.
//! - **Anything else** becomes a user-visible notification.
//!
//! Queries themselves go out over REST; the socket is receive-only.
//!
//! ## Components
//!
//! - [`transport`]: one raw socket (tokio-tungstenite or in-memory) and frame
//!   decoding
//! - [`connection`]: the refcounted shared connection with backoff reconnects
//! - [`dispatch`]: discriminator-based routing onto the typed event bus
//! - [`chat`]: the streaming reconciler and transcript
//! - [`documents`]: tracked document status
//! - [`client`]: the facade tying it all together
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use live::prelude::*;
//!
//! let session = AuthSession::authenticated(Credentials::new("user-1", token));
//! let client = LiveClient::builder(ClientConfig::default().apply_env_overrides())
//!     .with_session(session)
//!     .build()?;
//!
//! // keep the handle alive for as long as notifications are wanted
//! let _connection = client.acquire();
//!
//! let request_id = client.submit("Summarize the Q3 report", None).await?;
//! ```

pub mod api;
pub mod chat;
pub mod client;
pub mod config;
pub mod connection;
pub mod core;
pub mod dispatch;
pub mod documents;
pub mod telemetry;
pub mod transport;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Client ===
    pub use crate::client::{LiveClient, LiveClientBuilder};
    pub use crate::config::{ClientConfig, ReconnectConfig};

    // === Connection ===
    pub use crate::connection::{Backoff, ConnectionHandle, ConnectionManager};
    pub use crate::transport::{
        ConnectionState, Connector, MemoryConnector, Payload, Source, WsConnector,
    };

    // === Events ===
    pub use crate::core::events::{
        ChatChunk, DocumentFailure, DocumentUpdate, EventBus, EventEnvelope, LiveEvent, Topic,
    };
    pub use crate::dispatch::EventDispatcher;

    // === Chat & documents ===
    pub use crate::api::{QueryApi, QueryRequest, RestQueryApi, SubmitResponse};
    pub use crate::chat::{ChatMessage, ContextTurn, Role, StreamingReconciler};
    pub use crate::documents::{DocumentTracker, TrackedDocument};

    // === Core ===
    pub use crate::core::auth::{AuthSession, Credentials};
    pub use crate::core::error::{LiveError, SubmitError};
    pub use crate::core::notify::{Notification, NotificationCenter};
    pub use crate::core::store::{HistoryStore, InMemoryHistory, JsonFileHistory};
    pub use crate::telemetry::init_tracing;
}
