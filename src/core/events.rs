//! Typed local event bus
//!
//! The EventBus decouples the dispatcher (one producer, one call per inbound
//! frame) from whatever reacts to the events: the chat reconciler, the
//! document tracker, the notification center, or a UI. It uses
//! `tokio::sync::broadcast`, so every subscriber sees every event in the
//! order it was published.
//!
//! # Architecture
//!
//! ```text
//! socket frame ──▶ EventDispatcher::dispatch() ──▶ EventBus::publish()
//!                                                      │
//!                                  ┌───────────────────┼──────────────────┐
//!                                  ▼                   ▼                  ▼
//!                          StreamingReconciler   DocumentTracker   NotificationCenter
//! ```
//!
//! The set of topics is closed: one per known discriminator plus
//! [`Topic::Notification`] for everything else.
//!
//! # Usage
//!
//! ```rust,ignore
//! let bus = EventBus::new(1024);
//! let mut rx = bus.subscribe();
//!
//! bus.publish(LiveEvent::Notification("Welcome back".to_string()));
//!
//! if let Ok(envelope) = rx.recv().await {
//!     println!("{}: {:?}", envelope.event.topic(), envelope.event);
//! }
//! ```

use crate::transport::Source;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

/// Topics of the local bus, one per event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    DocumentUploaded,
    DocumentProcessed,
    DocumentProcessing,
    DocumentProcessingError,
    ChatResponse,
    /// Default topic for payloads without a known discriminator
    Notification,
}

impl Topic {
    /// Every topic, in declaration order
    pub const ALL: [Topic; 6] = [
        Topic::DocumentUploaded,
        Topic::DocumentProcessed,
        Topic::DocumentProcessing,
        Topic::DocumentProcessingError,
        Topic::ChatResponse,
        Topic::Notification,
    ];

    /// Look up the topic named by a frame's `event` discriminator
    ///
    /// Accepts the dotted names emitted by the notification service
    /// (`documents.processing`) as well as the hyphenated names
    /// (`document-processing`). Unknown names return `None`.
    pub fn from_discriminator(discriminator: &str) -> Option<Self> {
        match discriminator {
            "documents.uploaded" | "document-uploaded" => Some(Topic::DocumentUploaded),
            "documents.processed" | "document-processed" => Some(Topic::DocumentProcessed),
            "documents.processing" | "document-processing" => Some(Topic::DocumentProcessing),
            "documents.processing.error" | "document-processing-error" => {
                Some(Topic::DocumentProcessingError)
            }
            "chat.response" | "chat-response" => Some(Topic::ChatResponse),
            _ => None,
        }
    }

    /// Canonical topic name
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::DocumentUploaded => "document-uploaded",
            Topic::DocumentProcessed => "document-processed",
            Topic::DocumentProcessing => "document-processing",
            Topic::DocumentProcessingError => "document-processing-error",
            Topic::ChatResponse => "chat-response",
            Topic::Notification => "notification",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status or progress change of a tracked document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpdate {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percentage: Option<f64>,
}

/// Server-side processing failure of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFailure {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One frame of a streamed chat answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatChunk {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
}

impl ChatChunk {
    /// A token frame
    pub fn token(request_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            token: Some(token.into()),
            complete: false,
            sources: None,
        }
    }

    /// The terminal frame
    pub fn complete(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            token: None,
            complete: true,
            sources: None,
        }
    }

    /// Attach sources
    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = Some(sources);
        self
    }
}

/// Events carried by the bus, one variant per topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "data", rename_all = "kebab-case")]
pub enum LiveEvent {
    DocumentUploaded(DocumentUpdate),
    DocumentProcessed(DocumentUpdate),
    DocumentProcessing(DocumentUpdate),
    DocumentProcessingError(DocumentFailure),
    ChatResponse(ChatChunk),
    /// Anything without a known discriminator, as display text
    Notification(String),
}

impl LiveEvent {
    /// Topic this event is published on
    pub fn topic(&self) -> Topic {
        match self {
            LiveEvent::DocumentUploaded(_) => Topic::DocumentUploaded,
            LiveEvent::DocumentProcessed(_) => Topic::DocumentProcessed,
            LiveEvent::DocumentProcessing(_) => Topic::DocumentProcessing,
            LiveEvent::DocumentProcessingError(_) => Topic::DocumentProcessingError,
            LiveEvent::ChatResponse(_) => Topic::ChatResponse,
            LiveEvent::Notification(_) => Topic::Notification,
        }
    }

    /// Document id for document events
    pub fn document_id(&self) -> Option<&str> {
        match self {
            LiveEvent::DocumentUploaded(u)
            | LiveEvent::DocumentProcessed(u)
            | LiveEvent::DocumentProcessing(u) => Some(&u.id),
            LiveEvent::DocumentProcessingError(f) => Some(&f.id),
            _ => None,
        }
    }
}

/// Envelope wrapping a live event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event was published
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: LiveEvent,
}

impl EventEnvelope {
    /// Create a new event envelope
    pub fn new(event: LiveEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Broadcast-based event bus
///
/// The bus is cheap to clone (Arc internally) and can be shared across tasks.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    ///
    /// The capacity determines how many events can be buffered before slow
    /// receivers start losing events (lagged).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all subscribers
    ///
    /// Never blocks and never fails. Returns the number of receivers that
    /// will see the event.
    pub fn publish(&self, event: LiveEvent) -> usize {
        let envelope = EventEnvelope::new(event);
        // send() returns Err only if there are no receivers, which is fine
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Stream of future events restricted to the given topics
    ///
    /// An empty slice means every topic. Lagged gaps are skipped.
    pub fn stream(&self, topics: &[Topic]) -> impl Stream<Item = EventEnvelope> + use<> {
        let topics = topics.to_vec();
        BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| match item {
            Ok(envelope) if topics.is_empty() || topics.contains(&envelope.event.topic()) => {
                Some(envelope)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Event stream lagged");
                None
            }
        })
    }

    /// Get the current number of active subscribers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_discriminator_accepts_both_spellings() {
        assert_eq!(
            Topic::from_discriminator("documents.processing.error"),
            Some(Topic::DocumentProcessingError)
        );
        assert_eq!(
            Topic::from_discriminator("document-processing-error"),
            Some(Topic::DocumentProcessingError)
        );
        assert_eq!(Topic::from_discriminator("chat.response"), Some(Topic::ChatResponse));
        assert_eq!(Topic::from_discriminator("chat-response"), Some(Topic::ChatResponse));
        assert_eq!(Topic::from_discriminator("documents.deleted"), None);
        assert_eq!(Topic::from_discriminator(""), None);
    }

    #[test]
    fn test_every_named_topic_resolves_from_its_name() {
        for topic in Topic::ALL {
            if topic == Topic::Notification {
                assert_eq!(Topic::from_discriminator(topic.as_str()), None);
            } else {
                assert_eq!(Topic::from_discriminator(topic.as_str()), Some(topic));
            }
        }
    }

    #[test]
    fn test_live_event_serialization() {
        let event = LiveEvent::ChatResponse(ChatChunk::token("req_1", "Hel"));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["topic"], "chat-response");
        assert_eq!(json["data"]["requestId"], "req_1");
        assert_eq!(json["data"]["token"], "Hel");
    }

    #[test]
    fn test_document_id() {
        let event = LiveEvent::DocumentProcessingError(DocumentFailure {
            id: "d1".to_string(),
            name: None,
            error: Some("virus detected".to_string()),
        });
        assert_eq!(event.document_id(), Some("d1"));
        assert_eq!(event.topic(), Topic::DocumentProcessingError);
        assert_eq!(LiveEvent::Notification("x".into()).document_id(), None);
    }

    #[test]
    fn test_event_envelope_has_metadata() {
        let envelope = EventEnvelope::new(LiveEvent::Notification("hi".to_string()));
        assert!(!envelope.id.is_nil());
        assert!(envelope.timestamp <= Utc::now());
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let receivers = bus.publish(LiveEvent::DocumentProcessing(DocumentUpdate {
            id: "d1".to_string(),
            name: None,
            status: None,
            progress_percentage: Some(40.0),
        }));
        assert_eq!(receivers, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event.document_id(), Some("d1"));
    }

    #[tokio::test]
    async fn test_event_bus_preserves_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        for token in ["a", "b", "c"] {
            bus.publish(LiveEvent::ChatResponse(ChatChunk::token("r", token)));
        }

        let mut seen = String::new();
        for _ in 0..3 {
            if let LiveEvent::ChatResponse(chunk) = rx.recv().await.unwrap().event {
                seen.push_str(chunk.token.as_deref().unwrap_or_default());
            }
        }
        assert_eq!(seen, "abc");
    }

    #[tokio::test]
    async fn test_stream_filters_topics() {
        let bus = EventBus::new(16);
        let mut stream = Box::pin(bus.stream(&[Topic::Notification]));

        bus.publish(LiveEvent::ChatResponse(ChatChunk::complete("r")));
        bus.publish(LiveEvent::Notification(json!({"a": 1}).to_string()));

        let envelope = stream.next().await.unwrap();
        assert_eq!(envelope.event, LiveEvent::Notification(r#"{"a":1}"#.to_string()));
    }

    #[test]
    fn test_event_bus_publish_without_subscribers() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish(LiveEvent::Notification("lost".to_string())), 0);
    }

    #[test]
    fn test_event_bus_clone() {
        let bus = EventBus::new(16);
        let _rx = bus.subscribe();

        let bus2 = bus.clone();
        assert_eq!(bus2.receiver_count(), 1);

        let _rx2 = bus2.subscribe();
        assert_eq!(bus.receiver_count(), 2);
    }
}
