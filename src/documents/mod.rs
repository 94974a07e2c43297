//! Document status tracking
//!
//! Mirrors the status and processing progress of the documents the UI lists.
//! The list itself is owned by the REST API; the tracker is seeded from it and
//! then kept current by document events.

use crate::core::events::{DocumentFailure, DocumentUpdate, LiveEvent};
use serde::{Deserialize, Serialize};

/// Status given to an uploaded document when the event carries none
pub const STATUS_UPLOADED: &str = "uploaded";

/// Status given to a processed document when the event carries none
pub const STATUS_PROCESSED: &str = "processed";

/// Status of a document whose processing is under way
pub const STATUS_PROCESSING: &str = "processing";

/// Locally mirrored document state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedDocument {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_progress: Option<f64>,
}

impl TrackedDocument {
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            status: status.into(),
            processing_progress: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Effect of applying an event to the tracker
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentChange {
    /// A tracked document was added or changed
    Updated(String),
    /// Processing failed; the document was dropped if it was tracked
    Failed {
        id: String,
        removed: bool,
        error: Option<String>,
    },
    /// The event named a document that is not tracked
    Untracked(String),
    /// Not a document event
    Ignored,
}

impl DocumentChange {
    /// Error text worth showing to the user, if any
    pub fn user_error(&self) -> Option<&str> {
        match self {
            DocumentChange::Failed {
                error: Some(error), ..
            } if !error.trim().is_empty() => Some(error.as_str()),
            _ => None,
        }
    }
}

/// Ordered list of tracked documents
#[derive(Debug, Clone, Default)]
pub struct DocumentTracker {
    documents: Vec<TrackedDocument>,
}

impl DocumentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tracked list with a fresh listing
    pub fn seed(&mut self, documents: impl IntoIterator<Item = TrackedDocument>) {
        self.documents = documents.into_iter().collect();
    }

    pub fn documents(&self) -> &[TrackedDocument] {
        &self.documents
    }

    pub fn get(&self, id: &str) -> Option<&TrackedDocument> {
        self.documents.iter().find(|d| d.id == id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut TrackedDocument> {
        self.documents.iter_mut().find(|d| d.id == id)
    }

    /// Apply a document event
    pub fn apply(&mut self, event: &LiveEvent) -> DocumentChange {
        match event {
            LiveEvent::DocumentUploaded(update) => self.uploaded(update),
            LiveEvent::DocumentProcessed(update) => self.set_status(update, STATUS_PROCESSED),
            LiveEvent::DocumentProcessing(update) => self.progress(update),
            LiveEvent::DocumentProcessingError(failure) => self.failed(failure),
            _ => DocumentChange::Ignored,
        }
    }

    fn uploaded(&mut self, update: &DocumentUpdate) -> DocumentChange {
        if self.get(&update.id).is_none() {
            let mut document = TrackedDocument::new(
                update.id.clone(),
                update.status.as_deref().unwrap_or(STATUS_UPLOADED),
            );
            document.name = update.name.clone();
            document.processing_progress = update.progress_percentage;
            tracing::debug!(document_id = %update.id, "Tracking uploaded document");
            self.documents.push(document);
            return DocumentChange::Updated(update.id.clone());
        }
        self.set_status(update, STATUS_UPLOADED)
    }

    fn set_status(&mut self, update: &DocumentUpdate, fallback: &str) -> DocumentChange {
        let Some(document) = self.get_mut(&update.id) else {
            return DocumentChange::Untracked(update.id.clone());
        };
        document.status = update.status.clone().unwrap_or_else(|| fallback.to_string());
        if let Some(name) = &update.name {
            document.name = Some(name.clone());
        }
        if document.status == STATUS_PROCESSED {
            document.processing_progress = Some(100.0);
        }
        DocumentChange::Updated(update.id.clone())
    }

    fn progress(&mut self, update: &DocumentUpdate) -> DocumentChange {
        let Some(document) = self.get_mut(&update.id) else {
            return DocumentChange::Untracked(update.id.clone());
        };
        if let Some(progress) = update.progress_percentage {
            document.processing_progress = Some(progress.clamp(0.0, 100.0));
        }
        if let Some(status) = &update.status {
            document.status = status.clone();
        }
        DocumentChange::Updated(update.id.clone())
    }

    fn failed(&mut self, failure: &DocumentFailure) -> DocumentChange {
        let before = self.documents.len();
        self.documents.retain(|d| d.id != failure.id);
        let removed = self.documents.len() < before;

        tracing::info!(
            document_id = %failure.id,
            removed,
            error = failure.error.as_deref().unwrap_or_default(),
            "Document processing failed"
        );

        DocumentChange::Failed {
            id: failure.id.clone(),
            removed,
            error: failure.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(id: &str) -> DocumentUpdate {
        DocumentUpdate {
            id: id.to_string(),
            name: None,
            status: None,
            progress_percentage: None,
        }
    }

    fn seeded() -> DocumentTracker {
        let mut tracker = DocumentTracker::new();
        tracker.seed([
            TrackedDocument::new("d1", STATUS_PROCESSING).with_name("a.pdf"),
            TrackedDocument::new("d2", STATUS_UPLOADED).with_name("b.pdf"),
        ]);
        tracker
    }

    #[test]
    fn test_processing_updates_progress_only_when_present() {
        let mut tracker = seeded();

        let mut event = update("d1");
        event.progress_percentage = Some(40.0);
        assert_eq!(
            tracker.apply(&LiveEvent::DocumentProcessing(event)),
            DocumentChange::Updated("d1".to_string())
        );
        assert_eq!(tracker.get("d1").unwrap().processing_progress, Some(40.0));

        tracker.apply(&LiveEvent::DocumentProcessing(update("d1")));
        assert_eq!(tracker.get("d1").unwrap().processing_progress, Some(40.0));
    }

    #[test]
    fn test_processed_sets_status() {
        let mut tracker = seeded();

        tracker.apply(&LiveEvent::DocumentProcessed(update("d1")));
        let document = tracker.get("d1").unwrap();
        assert_eq!(document.status, STATUS_PROCESSED);
        assert_eq!(document.processing_progress, Some(100.0));

        let mut explicit = update("d2");
        explicit.status = Some("indexed".to_string());
        tracker.apply(&LiveEvent::DocumentProcessed(explicit));
        assert_eq!(tracker.get("d2").unwrap().status, "indexed");
    }

    #[test]
    fn test_uploaded_adds_unknown_document() {
        let mut tracker = seeded();

        let mut event = update("d3");
        event.name = Some("c.pdf".to_string());
        tracker.apply(&LiveEvent::DocumentUploaded(event));

        assert_eq!(tracker.len(), 3);
        let document = tracker.get("d3").unwrap();
        assert_eq!(document.status, STATUS_UPLOADED);
        assert_eq!(document.name.as_deref(), Some("c.pdf"));
    }

    #[test]
    fn test_unknown_document_is_untracked() {
        let mut tracker = seeded();
        assert_eq!(
            tracker.apply(&LiveEvent::DocumentProcessed(update("zz"))),
            DocumentChange::Untracked("zz".to_string())
        );
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_processing_error_removes_document() {
        let mut tracker = seeded();

        let change = tracker.apply(&LiveEvent::DocumentProcessingError(DocumentFailure {
            id: "d1".to_string(),
            name: None,
            error: Some("virus detected".to_string()),
        }));

        assert!(tracker.get("d1").is_none());
        assert_eq!(tracker.len(), 1);
        assert_eq!(change.user_error(), Some("virus detected"));
        assert!(matches!(change, DocumentChange::Failed { removed: true, .. }));
    }

    #[test]
    fn test_processing_error_without_message_has_no_user_error() {
        let mut tracker = seeded();
        let change = tracker.apply(&LiveEvent::DocumentProcessingError(DocumentFailure {
            id: "d2".to_string(),
            name: None,
            error: Some("  ".to_string()),
        }));
        assert_eq!(change.user_error(), None);
        assert!(tracker.get("d2").is_none());
    }

    #[test]
    fn test_non_document_events_are_ignored() {
        let mut tracker = seeded();
        assert_eq!(
            tracker.apply(&LiveEvent::Notification("hi".to_string())),
            DocumentChange::Ignored
        );
    }
}
