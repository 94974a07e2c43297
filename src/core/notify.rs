//! User-visible notifications
//!
//! The center is the generic sink of the event pipeline: unclassified frames,
//! rejected submissions and document processing failures all end up here as
//! plain text that a UI can show and dismiss.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A single notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique (per center) identifier
    pub id: u64,
    /// Text to display
    pub text: String,
    /// When the notification was raised
    pub created_at: DateTime<Utc>,
}

/// Ordered list of pending notifications
///
/// Cheap to clone; clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct NotificationCenter {
    entries: Arc<Mutex<Vec<Notification>>>,
    next_id: Arc<AtomicU64>,
}

impl NotificationCenter {
    /// Create an empty center
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raise a notification, returning its id
    pub fn push(&self, text: impl Into<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let notification = Notification {
            id,
            text: text.into(),
            created_at: Utc::now(),
        };
        tracing::debug!(notification_id = id, text = %notification.text, "Notification raised");
        self.entries().push(notification);
        id
    }

    /// Dismiss a notification; returns true if it existed
    pub fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|n| n.id != id);
        entries.len() < before
    }

    /// Snapshot of pending notifications, oldest first
    pub fn list(&self) -> Vec<Notification> {
        self.entries().clone()
    }

    /// Number of pending notifications
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dismiss everything
    pub fn clear(&self) {
        self.entries().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_list_in_order() {
        let center = NotificationCenter::new();
        let a = center.push("first");
        let b = center.push("second");

        assert_ne!(a, b);
        let texts: Vec<_> = center.list().into_iter().map(|n| n.text).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_remove() {
        let center = NotificationCenter::new();
        let id = center.push("bye");

        assert!(center.remove(id));
        assert!(!center.remove(id));
        assert!(center.is_empty());
    }

    #[test]
    fn test_poisoned_lock_keeps_working() {
        let center = NotificationCenter::new();
        center.push("before");

        let poisoner = center.clone();
        let result = std::thread::spawn(move || {
            let _guard = poisoner.entries.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(result.is_err());
        assert!(center.entries.is_poisoned());

        let id = center.push("after");
        let texts: Vec<_> = center.list().into_iter().map(|n| n.text).collect();
        assert_eq!(texts, vec!["before", "after"]);
        assert!(center.remove(id));
        assert_eq!(center.len(), 1);
    }

    #[test]
    fn test_clones_share_entries() {
        let center = NotificationCenter::new();
        let clone = center.clone();
        clone.push("shared");

        assert_eq!(center.len(), 1);
        center.clear();
        assert!(clone.is_empty());
    }
}
