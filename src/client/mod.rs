//! Live client facade
//!
//! [`LiveClient`] is what a UI layer talks to. It owns one of each component
//! and runs the single event-delivery path:
//!
//! ```text
//! socket ──▶ ConnectionManager ──▶ classify ──┬──▶ StreamingReconciler / DocumentTracker / NotificationCenter
//!                                             └──▶ EventDispatcher ──▶ EventBus ──▶ subscribers
//! ```
//!
//! Client state is updated inside the manager's frame callback, one frame at
//! a time and in arrival order, before the event is fanned out. The bus is
//! bounded: a slow subscriber may miss events, the transcript and the
//! document list never do.

mod builder;

pub use builder::LiveClientBuilder;

use crate::api::QueryApi;
use crate::chat::{ChatMessage, StreamingReconciler};
use crate::config::ClientConfig;
use crate::connection::{ConnectionHandle, ConnectionManager};
use crate::core::auth::AuthSession;
use crate::core::error::SubmitError;
use crate::core::events::{EventEnvelope, LiveEvent, Topic};
use crate::core::notify::{Notification, NotificationCenter};
use crate::dispatch::EventDispatcher;
use crate::documents::{DocumentTracker, TrackedDocument};
use crate::transport::{ConnectionState, Payload};
use futures::Stream;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// State written by the frame callback and by explicit UI commands
pub(crate) struct Shared {
    reconciler: Mutex<StreamingReconciler>,
    documents: Mutex<DocumentTracker>,
    notifications: NotificationCenter,
}

impl Shared {
    fn reconciler(&self) -> MutexGuard<'_, StreamingReconciler> {
        self.reconciler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn documents(&self) -> MutexGuard<'_, DocumentTracker> {
        self.documents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, event: &LiveEvent) {
        match event {
            LiveEvent::ChatResponse(chunk) => {
                let outcome = self.reconciler().apply(chunk);
                tracing::trace!(request_id = %chunk.request_id, ?outcome, "Chat frame applied");
            }
            LiveEvent::Notification(text) => {
                self.notifications.push(text.clone());
            }
            _ => {
                let change = self.documents().apply(event);
                if let Some(error) = change.user_error() {
                    self.notifications.push(error);
                }
            }
        }
    }
}

/// Real-time notification client
pub struct LiveClient {
    config: ClientConfig,
    session: AuthSession,
    manager: ConnectionManager,
    dispatcher: EventDispatcher,
    query_api: Arc<dyn QueryApi>,
    shared: Arc<Shared>,
}

impl LiveClient {
    /// Start building a client
    pub fn builder(config: ClientConfig) -> LiveClientBuilder {
        LiveClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Register interest in the shared connection
    pub fn acquire(&self) -> ConnectionHandle {
        self.manager.acquire()
    }

    /// Register interest and receive every raw frame
    pub fn acquire_with<F>(&self, on_message: F) -> ConnectionHandle
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.manager.acquire_with(on_message)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Submit a chat query, returning its request id
    ///
    /// A closed connection while signed in means the session is no longer
    /// valid: the session is revoked and [`SubmitError::NotConnected`] is
    /// returned. A rejected submission is also raised as a notification and
    /// ends the request session without completing it.
    pub async fn submit(
        &self,
        query: &str,
        document_id: Option<String>,
    ) -> Result<String, SubmitError> {
        let state = self.manager.state();
        let begun = self.shared.reconciler().begin(query, document_id, state);

        let request = match begun {
            Ok(request) => request,
            Err(e) if e.is_authorization_loss() => {
                tracing::warn!(error = %e, "Submission without an open connection; signing out");
                self.session.logout();
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let request_id = request.request_id.clone();
        let error = match self.query_api.submit_query(&request).await {
            Ok(response) if response.is_accepted() => {
                tracing::info!(request_id = %request_id, "Query accepted");
                return Ok(request_id);
            }
            Ok(response) => SubmitError::Rejected {
                status: response.status,
                reason: response.reason,
            },
            Err(e) => SubmitError::Api(e),
        };

        tracing::warn!(request_id = %request_id, error = %error, "Query submission failed");
        self.shared.notifications.push(match &error {
            SubmitError::Rejected { .. } => error.to_string(),
            other => format!("Error: {other}"),
        });
        self.shared.reconciler().abandon(&request_id);
        Err(error)
    }

    /// Empty the transcript and its saved history
    pub fn clear_chat(&self) {
        self.shared.reconciler().clear();
    }

    /// Snapshot of the chat transcript
    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.shared.reconciler().transcript().messages().to_vec()
    }

    /// Request id of the in-flight query, if any
    pub fn active_request(&self) -> Option<String> {
        self.shared
            .reconciler()
            .active_request()
            .map(str::to_string)
    }

    /// Replace the tracked documents with a listing from the REST API
    pub fn seed_documents(&self, documents: impl IntoIterator<Item = TrackedDocument>) {
        self.shared.documents().seed(documents);
    }

    /// Snapshot of the tracked documents
    pub fn documents(&self) -> Vec<TrackedDocument> {
        self.shared.documents().documents().to_vec()
    }

    /// Pending notifications, oldest first
    pub fn notifications(&self) -> Vec<Notification> {
        self.shared.notifications.list()
    }

    pub fn notification_center(&self) -> &NotificationCenter {
        &self.shared.notifications
    }

    /// Dismiss a notification
    pub fn dismiss_notification(&self, id: u64) -> bool {
        self.shared.notifications.remove(id)
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.dispatcher.bus().subscribe()
    }

    /// Stream of events for the given topics (all topics if empty)
    pub fn stream(&self, topics: &[Topic]) -> impl Stream<Item = EventEnvelope> + use<> {
        self.dispatcher.bus().stream(topics)
    }

    /// Close the shared connection and stop delivering events
    pub fn shutdown(&self) {
        tracing::info!("Live client shutting down");
        self.manager.shutdown();
    }
}

impl std::fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveClient")
            .field("manager", &self.manager)
            .field("config", &self.config)
            .finish()
    }
}
