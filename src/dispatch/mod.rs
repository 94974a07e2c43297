//! Event dispatcher
//!
//! Classifies each decoded frame by its `event` discriminator and publishes
//! the matching [`LiveEvent`] on the bus. Classification is a pure function
//! ([`classify`]); dispatch never blocks and never awaits.
//!
//! Anything that cannot be classified (plain strings, JSON without a known
//! discriminator, or a known discriminator missing the field its handler keys
//! on) is published on [`Topic::Notification`] as display text.

use crate::core::events::{
    ChatChunk, DocumentFailure, DocumentUpdate, EventBus, LiveEvent, Topic,
};
use crate::transport::{InboundEvent, Payload};

/// Map a decoded frame onto a typed event
pub fn classify(payload: &Payload) -> LiveEvent {
    let Some(topic) = payload.discriminator().and_then(Topic::from_discriminator) else {
        return LiveEvent::Notification(payload.display_text());
    };

    payload
        .as_event()
        .and_then(|event| route(topic, event))
        .unwrap_or_else(|| {
            tracing::debug!(topic = %topic, "Frame missing required fields; treating as notification");
            LiveEvent::Notification(payload.display_text())
        })
}

fn route(topic: Topic, event: InboundEvent) -> Option<LiveEvent> {
    let event = match topic {
        Topic::DocumentUploaded => LiveEvent::DocumentUploaded(document_update(event)?),
        Topic::DocumentProcessed => LiveEvent::DocumentProcessed(document_update(event)?),
        Topic::DocumentProcessing => LiveEvent::DocumentProcessing(document_update(event)?),
        Topic::DocumentProcessingError => LiveEvent::DocumentProcessingError(DocumentFailure {
            id: event.id?,
            name: event.name,
            error: event.error,
        }),
        Topic::ChatResponse => LiveEvent::ChatResponse(ChatChunk {
            request_id: event.request_id?,
            token: event.token,
            complete: event.complete.unwrap_or(false),
            sources: event.sources,
        }),
        Topic::Notification => return None,
    };
    Some(event)
}

fn document_update(event: InboundEvent) -> Option<DocumentUpdate> {
    Some(DocumentUpdate {
        id: event.id?,
        name: event.name,
        status: event.status,
        progress_percentage: event.progress_percentage,
    })
}

/// Routes frames onto the local event bus
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    bus: EventBus,
}

impl EventDispatcher {
    /// Create a dispatcher publishing on `bus`
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    /// Classify and publish one frame, returning the topic it went to
    pub fn dispatch(&self, payload: &Payload) -> Topic {
        self.publish(classify(payload))
    }

    /// Publish an already classified event
    pub fn publish(&self, event: LiveEvent) -> Topic {
        let topic = event.topic();
        let receivers = self.bus.publish(event);
        tracing::trace!(topic = %topic, receivers, "Frame dispatched");
        topic
    }

    /// The bus this dispatcher publishes on
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}
