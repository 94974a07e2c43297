//! Streaming reconciler
//!
//! Turns the `chat.response` frames of one request into one growing agent
//! message.
//!
//! ```text
//! begin(query) ──▶ user message appended, session { request_id } active
//!      │
//!      ▼
//! token frame (first) ──▶ agent message created   (id = request_id)
//! token frame         ──▶ text appended, sources replaced if present
//! complete frame      ──▶ session ended, nothing appended
//! ```
//!
//! Frames whose request id is not the active session's are ignored, which
//! also covers late frames of an abandoned or finished request.

use crate::api::QueryRequest;
use crate::chat::transcript::{ChatMessage, Transcript};
use crate::core::error::SubmitError;
use crate::core::events::ChatChunk;
use crate::core::store::{HistoryStore, InMemoryHistory};
use crate::transport::ConnectionState;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Bookkeeping for the one in-flight query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSession {
    pub request_id: String,
    pub active: bool,
}

/// What applying a chunk did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// First token; the agent message was created
    Created,
    /// Token appended to the existing agent message
    Appended,
    /// Terminal frame; the session ended
    Completed,
    /// Not for the active session
    Ignored,
}

/// Mint a request identifier
pub fn new_request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

pub struct StreamingReconciler {
    transcript: Transcript,
    session: Option<RequestSession>,
    assembling: Option<String>,
    context_window: usize,
    history: Arc<dyn HistoryStore>,
}

impl StreamingReconciler {
    /// Create a reconciler, restoring the transcript from `history`
    pub fn new(context_window: usize, history: Arc<dyn HistoryStore>) -> Self {
        let messages = history.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not restore chat history");
            Vec::new()
        });
        if !messages.is_empty() {
            tracing::debug!(messages = messages.len(), "Chat history restored");
        }

        Self {
            transcript: Transcript::from_messages(messages),
            session: None,
            assembling: None,
            context_window,
            history,
        }
    }

    /// Reconciler without persistence
    pub fn in_memory(context_window: usize) -> Self {
        Self::new(context_window, Arc::new(InMemoryHistory::new()))
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn session(&self) -> Option<&RequestSession> {
        self.session.as_ref()
    }

    /// Request id of the active session
    pub fn active_request(&self) -> Option<&str> {
        self.session
            .as_ref()
            .filter(|s| s.active)
            .map(|s| s.request_id.as_str())
    }

    /// Id of the agent message currently being assembled
    pub fn assembling(&self) -> Option<&str> {
        self.assembling.as_deref()
    }

    /// Start a request cycle
    ///
    /// Rejects an empty query, a second in-flight request and a connection
    /// that is not open. On success the user message is appended and the
    /// body of the submission call is returned.
    pub fn begin(
        &mut self,
        query: &str,
        document_id: Option<String>,
        connection: ConnectionState,
    ) -> Result<QueryRequest, SubmitError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SubmitError::EmptyQuery);
        }
        if let Some(request_id) = self.active_request() {
            return Err(SubmitError::SessionActive {
                request_id: request_id.to_string(),
            });
        }
        if connection != ConnectionState::Open {
            return Err(SubmitError::NotConnected { state: connection });
        }

        let context = self.transcript.context(self.context_window);
        let request_id = new_request_id();

        self.transcript.push(ChatMessage::user(
            format!("{}-u", Utc::now().timestamp_millis()),
            query,
        ));
        self.session = Some(RequestSession {
            request_id: request_id.clone(),
            active: true,
        });
        self.assembling = None;
        self.checkpoint();

        tracing::debug!(request_id = %request_id, context = context.len(), "Request session started");

        Ok(QueryRequest {
            request_id,
            query: query.to_string(),
            context,
            document_id,
        })
    }

    /// Apply one chat frame
    pub fn apply(&mut self, chunk: &ChatChunk) -> ChunkOutcome {
        if self.active_request() != Some(chunk.request_id.as_str()) {
            tracing::trace!(request_id = %chunk.request_id, "Ignoring frame for inactive request");
            return ChunkOutcome::Ignored;
        }

        if chunk.complete {
            if let (Some(sources), Some(message)) =
                (&chunk.sources, self.transcript.find_mut(&chunk.request_id))
            {
                message.sources = sources.clone();
            }
            self.session = None;
            self.assembling = None;
            self.checkpoint();
            tracing::debug!(request_id = %chunk.request_id, "Request session complete");
            return ChunkOutcome::Completed;
        }

        let token = chunk.token.as_deref().unwrap_or_default();
        if let Some(message) = self.transcript.find_mut(&chunk.request_id) {
            message.text.push_str(token);
            if let Some(sources) = &chunk.sources {
                message.sources = sources.clone();
            }
            return ChunkOutcome::Appended;
        }

        self.transcript.push(ChatMessage::agent(
            chunk.request_id.clone(),
            token,
            chunk.sources.clone().unwrap_or_default(),
        ));
        self.assembling = Some(chunk.request_id.clone());
        ChunkOutcome::Created
    }

    /// End a session without completing it; returns false if it was not active
    pub fn abandon(&mut self, request_id: &str) -> bool {
        if self.active_request() != Some(request_id) {
            return false;
        }
        tracing::debug!(request_id, "Request session abandoned");
        self.session = None;
        self.assembling = None;
        true
    }

    /// Drop the transcript, the active session and the saved history
    pub fn clear(&mut self) {
        self.transcript.clear();
        self.session = None;
        self.assembling = None;
        if let Err(e) = self.history.clear() {
            tracing::warn!(error = %e, "Could not clear chat history");
        }
    }

    fn checkpoint(&self) {
        if let Err(e) = self.history.save(self.transcript.messages()) {
            tracing::warn!(error = %e, "Could not save chat history");
        }
    }
}

impl std::fmt::Debug for StreamingReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingReconciler")
            .field("messages", &self.transcript.len())
            .field("session", &self.session)
            .field("context_window", &self.context_window)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::transcript::Role;
    use crate::transport::Source;

    fn started() -> (StreamingReconciler, String) {
        let mut reconciler = StreamingReconciler::in_memory(8);
        let request = reconciler
            .begin("what changed?", None, ConnectionState::Open)
            .unwrap();
        (reconciler, request.request_id)
    }

    fn source(id: &str) -> Source {
        Source {
            id: id.to_string(),
            name: format!("{id}.pdf"),
            page: None,
        }
    }

    #[test]
    fn test_tokens_assemble_into_one_message() {
        let (mut r, id) = started();

        assert_eq!(r.apply(&ChatChunk::token(&id, "Hel")), ChunkOutcome::Created);
        assert_eq!(r.assembling(), Some(id.as_str()));
        assert_eq!(r.apply(&ChatChunk::token(&id, "lo")), ChunkOutcome::Appended);
        assert_eq!(r.apply(&ChatChunk::complete(&id)), ChunkOutcome::Completed);

        let agent = r.transcript().get(&id).unwrap();
        assert_eq!(agent.role, Role::Agent);
        assert_eq!(agent.text, "Hello");
        assert_eq!(r.active_request(), None);
        assert_eq!(r.assembling(), None);
        assert_eq!(r.transcript().len(), 2);
    }

    #[test]
    fn test_complete_frame_never_appends() {
        let (mut r, id) = started();
        r.apply(&ChatChunk::token(&id, "done"));

        let mut complete = ChatChunk::complete(&id);
        complete.token = Some("!!".to_string());
        r.apply(&complete);

        assert_eq!(r.transcript().get(&id).unwrap().text, "done");
    }

    #[test]
    fn test_frames_after_complete_are_ignored() {
        let (mut r, id) = started();
        r.apply(&ChatChunk::token(&id, "a"));
        r.apply(&ChatChunk::complete(&id));

        assert_eq!(r.apply(&ChatChunk::token(&id, "b")), ChunkOutcome::Ignored);
        assert_eq!(r.transcript().get(&id).unwrap().text, "a");
    }

    #[test]
    fn test_cross_talk_is_rejected() {
        let (mut r, id) = started();
        r.apply(&ChatChunk::token(&id, "mine"));

        let before = r.transcript().clone();
        assert_eq!(r.apply(&ChatChunk::token("req_stale", "theirs")), ChunkOutcome::Ignored);
        assert_eq!(r.apply(&ChatChunk::complete("req_stale")), ChunkOutcome::Ignored);

        assert_eq!(r.transcript(), &before);
        assert_eq!(r.active_request(), Some(id.as_str()));
    }

    #[test]
    fn test_sources_preserved_when_absent_and_replaced_when_present() {
        let (mut r, id) = started();

        r.apply(&ChatChunk::token(&id, "a").with_sources(vec![source("d1")]));
        r.apply(&ChatChunk::token(&id, "b"));
        assert_eq!(r.transcript().get(&id).unwrap().sources, vec![source("d1")]);

        r.apply(&ChatChunk::token(&id, "c").with_sources(vec![source("d2"), source("d3")]));
        let message = r.transcript().get(&id).unwrap();
        assert_eq!(message.text, "abc");
        assert_eq!(message.sources, vec![source("d2"), source("d3")]);
    }

    #[test]
    fn test_first_frame_without_token_creates_empty_message() {
        let (mut r, id) = started();
        let chunk = ChatChunk {
            request_id: id.clone(),
            token: None,
            complete: false,
            sources: Some(vec![source("d1")]),
        };

        assert_eq!(r.apply(&chunk), ChunkOutcome::Created);
        assert_eq!(r.transcript().get(&id).unwrap().text, "");
    }

    #[test]
    fn test_second_submit_while_active_is_rejected() {
        let (mut r, id) = started();

        let err = r
            .begin("another", None, ConnectionState::Open)
            .unwrap_err();
        assert!(matches!(err, SubmitError::SessionActive { ref request_id } if *request_id == id));
        assert_eq!(r.transcript().len(), 1);
        assert_eq!(r.active_request(), Some(id.as_str()));
    }

    #[test]
    fn test_submit_requires_open_connection() {
        let mut r = StreamingReconciler::in_memory(8);
        for state in [
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Closing,
            ConnectionState::Closed,
        ] {
            let err = r.begin("q", None, state).unwrap_err();
            assert!(err.is_authorization_loss());
        }
        assert!(r.transcript().is_empty());
        assert!(r.session().is_none());
    }

    #[test]
    fn test_empty_query_is_rejected() {
        let mut r = StreamingReconciler::in_memory(8);
        assert!(matches!(
            r.begin("   ", None, ConnectionState::Open),
            Err(SubmitError::EmptyQuery)
        ));
    }

    #[test]
    fn test_context_excludes_new_query_and_is_bounded() {
        let mut r = StreamingReconciler::in_memory(2);
        let first = r.begin("one", None, ConnectionState::Open).unwrap();
        assert!(first.context.is_empty());
        r.apply(&ChatChunk::token(&first.request_id, "uno"));
        r.apply(&ChatChunk::complete(&first.request_id));

        let second = r
            .begin("two", Some("d9".to_string()), ConnectionState::Open)
            .unwrap();
        assert_eq!(second.query, "two");
        assert_eq!(second.document_id.as_deref(), Some("d9"));
        let turns: Vec<_> = second
            .context
            .iter()
            .map(|t| (t.role, t.message.as_str()))
            .collect();
        assert_eq!(turns, vec![(Role::User, "one"), (Role::Agent, "uno")]);
        assert!(second.request_id.starts_with("req_"));
        assert_ne!(second.request_id, first.request_id);
    }

    #[test]
    fn test_abandoned_session_discards_late_frames() {
        let (mut r, id) = started();

        assert!(r.abandon(&id));
        assert!(!r.abandon(&id));
        assert_eq!(r.apply(&ChatChunk::token(&id, "late")), ChunkOutcome::Ignored);
        assert!(r.transcript().get(&id).is_none());

        // a new request can start
        assert!(r.begin("again", None, ConnectionState::Open).is_ok());
    }

    #[test]
    fn test_clear_ends_session_and_history() {
        let history = Arc::new(InMemoryHistory::new());
        let mut r = StreamingReconciler::new(8, history.clone());
        let request = r.begin("q", None, ConnectionState::Open).unwrap();
        assert_eq!(history.load().unwrap().len(), 1);

        r.clear();
        assert!(r.transcript().is_empty());
        assert!(history.load().unwrap().is_empty());
        assert_eq!(r.apply(&ChatChunk::token(&request.request_id, "x")), ChunkOutcome::Ignored);
    }

    #[test]
    fn test_history_checkpoint_and_restore() {
        let history = Arc::new(InMemoryHistory::new());
        {
            let mut r = StreamingReconciler::new(8, history.clone());
            let id = r.begin("q", None, ConnectionState::Open).unwrap().request_id;
            r.apply(&ChatChunk::token(&id, "answer"));
            r.apply(&ChatChunk::complete(&id));
        }

        let restored = StreamingReconciler::new(8, history);
        let texts: Vec<_> = restored
            .transcript()
            .messages()
            .iter()
            .map(|m| m.text.as_str())
            .collect();
        assert_eq!(texts, vec!["q", "answer"]);
        assert!(restored.active_request().is_none());
    }
}
