//! Builder for [`LiveClient`]

use super::{LiveClient, Shared};
use crate::api::{QueryApi, RestQueryApi};
use crate::config::ClientConfig;
use crate::connection::{Backoff, ConnectionManager};
use crate::core::auth::AuthSession;
use crate::core::events::EventBus;
use crate::core::notify::NotificationCenter;
use crate::core::store::{HistoryStore, InMemoryHistory, JsonFileHistory};
use crate::chat::StreamingReconciler;
use crate::dispatch::{EventDispatcher, classify};
use crate::documents::DocumentTracker;
use crate::transport::{Connector, WsConnector};
use crate::core::error::LiveError;
use std::sync::{Arc, Mutex};

/// Assembles a [`LiveClient`] from its collaborators
///
/// Everything except the configuration has a default: a signed-out session,
/// the WebSocket transport, the REST query API on
/// [`ClientConfig::search_endpoint`] and a history store chosen by
/// [`ClientConfig::history_path`].
pub struct LiveClientBuilder {
    config: ClientConfig,
    session: Option<AuthSession>,
    connector: Option<Arc<dyn Connector>>,
    query_api: Option<Arc<dyn QueryApi>>,
    history: Option<Arc<dyn HistoryStore>>,
}

impl LiveClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            session: None,
            connector: None,
            query_api: None,
            history: None,
        }
    }

    /// Share an existing authentication session
    pub fn with_session(mut self, session: AuthSession) -> Self {
        self.session = Some(session);
        self
    }

    /// Use a different transport
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Use a different query submission backend
    pub fn with_query_api(mut self, api: Arc<dyn QueryApi>) -> Self {
        self.query_api = Some(api);
        self
    }

    /// Use a different chat history store
    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Validate the configuration, wire everything up and start the client
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<LiveClient, LiveError> {
        self.config.validate()?;
        let config = self.config;

        let session = self.session.unwrap_or_default();
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WsConnector::new()));
        let query_api = self.query_api.unwrap_or_else(|| {
            Arc::new(RestQueryApi::new(config.search_endpoint(), session.clone()))
        });
        let history: Arc<dyn HistoryStore> = match (self.history, &config.history_path) {
            (Some(history), _) => history,
            (None, Some(path)) => Arc::new(JsonFileHistory::new(path)),
            (None, None) => Arc::new(InMemoryHistory::new()),
        };

        let shared = Arc::new(Shared {
            reconciler: Mutex::new(StreamingReconciler::new(config.context_window, history)),
            documents: Mutex::new(DocumentTracker::new()),
            notifications: NotificationCenter::new(),
        });
        let dispatcher = EventDispatcher::new(EventBus::new(config.event_buffer));

        let frame_shared = shared.clone();
        let frame_dispatcher = dispatcher.clone();
        let manager = ConnectionManager::builder(config.ws_url.clone())
            .with_connector(connector)
            .with_session(session.clone())
            .with_backoff(Backoff::from(&config.reconnect))
            .linger_when_idle(config.linger_when_idle)
            .on_frame(move |payload| {
                let event = classify(payload);
                frame_shared.apply(&event);
                frame_dispatcher.publish(event);
            })
            .start();

        tracing::info!(
            ws_url = %config.ws_url,
            api_base_url = %config.api_base_url,
            "Live client started"
        );

        Ok(LiveClient {
            config,
            session,
            manager,
            dispatcher,
            query_api,
            shared,
        })
    }
}
