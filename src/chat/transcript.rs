//! Chat transcript model

use crate::transport::Source;
use serde::{Deserialize, Serialize};

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "assistant")]
    Agent,
}

/// One message of the transcript
///
/// For agent messages `id` is the request id of the query that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl ChatMessage {
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            text: text.into(),
            sources: Vec::new(),
        }
    }

    pub fn agent(id: impl Into<String>, text: impl Into<String>, sources: Vec<Source>) -> Self {
        Self {
            id: id.into(),
            role: Role::Agent,
            text: text.into(),
            sources,
        }
    }
}

/// A prior turn sent along with a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTurn {
    pub role: Role,
    pub message: String,
}

impl From<&ChatMessage> for ContextTurn {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            message: message.text.clone(),
        }
    }
}

/// Ordered, append-only list of chat messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Most recent message with the given id
    pub fn find_mut(&mut self, id: &str) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.id == id)
    }

    /// The last `window` messages as context turns, oldest first
    pub fn context(&self, window: usize) -> Vec<ContextTurn> {
        let start = self.messages.len().saturating_sub(window);
        self.messages[start..].iter().map(ContextTurn::from).collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
