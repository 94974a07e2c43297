//! Chat history persistence
//!
//! The transcript survives restarts through a [`HistoryStore`]. Stores are
//! synchronous: they are called from the single event-delivery path and hold
//! a handful of messages at most.

use crate::chat::transcript::ChatMessage;
use crate::core::error::HistoryError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Storage backend for the chat transcript
pub trait HistoryStore: Send + Sync {
    /// Load the saved transcript; a missing history is an empty one
    fn load(&self) -> Result<Vec<ChatMessage>, HistoryError>;

    /// Replace the saved transcript
    fn save(&self, messages: &[ChatMessage]) -> Result<(), HistoryError>;

    /// Forget the saved transcript
    fn clear(&self) -> Result<(), HistoryError>;
}

/// Process-local history, lost on exit
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    messages: Mutex<Vec<ChatMessage>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing transcript
    pub fn with_messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages: Mutex::new(messages),
        }
    }
}

impl HistoryStore for InMemoryHistory {
    fn load(&self) -> Result<Vec<ChatMessage>, HistoryError> {
        Ok(self
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, messages: &[ChatMessage]) -> Result<(), HistoryError> {
        *self.messages.lock().unwrap_or_else(PoisonError::into_inner) = messages.to_vec();
        Ok(())
    }

    fn clear(&self) -> Result<(), HistoryError> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

/// History kept as a JSON array in a single file
///
/// Saving an empty transcript removes the file. A file that cannot be parsed
/// as an array of messages loads as an empty transcript.
#[derive(Debug, Clone)]
pub struct JsonFileHistory {
    path: PathBuf,
}

impl JsonFileHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryStore for JsonFileHistory {
    fn load(&self) -> Result<Vec<ChatMessage>, HistoryError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Vec<ChatMessage>>(&text) {
            Ok(messages) => Ok(messages),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring unreadable chat history");
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, messages: &[ChatMessage]) -> Result<(), HistoryError> {
        if messages.is_empty() {
            return self.clear();
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(messages)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), HistoryError> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
