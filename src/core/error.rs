//! Typed error handling for the live client
//!
//! Nothing in this crate is fatal to the process: every failure ends in a
//! retry, a discarded frame, or a user-visible notification. The types below
//! describe the failures that do reach a caller.
//!
//! # Error Categories
//!
//! - [`TransportError`]: socket handshake and request construction failures
//! - [`SubmitError`]: a chat query that could not be issued
//! - [`ApiError`]: the REST call itself failed
//! - [`HistoryError`]: the chat transcript could not be read or written
//!
//! # Example
//!
//! ```rust,ignore
//! match client.submit("What is in the contract?", None).await {
//!     Ok(request_id) => tracing::info!(%request_id, "query accepted"),
//!     Err(e) if e.is_authorization_loss() => show_login_screen(),
//!     Err(e) => tracing::warn!(code = e.error_code(), "{e}"),
//! }
//! ```

use crate::transport::ConnectionState;
use thiserror::Error;

/// The main error type for the live client
#[derive(Debug, Error)]
pub enum LiveError {
    /// Socket-level failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Query submission failure
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// REST call failure
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Transcript persistence failure
    #[error(transparent)]
    History(#[from] HistoryError),

    /// The client configuration was rejected
    #[error(transparent)]
    Config(#[from] anyhow::Error),
}

impl LiveError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            LiveError::Transport(e) => e.error_code(),
            LiveError::Submit(e) => e.error_code(),
            LiveError::Api(_) => "API_ERROR",
            LiveError::History(_) => "HISTORY_ERROR",
            LiveError::Config(_) => "CONFIG_INVALID",
        }
    }
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors raised while opening or driving a socket
#[derive(Debug, Error)]
pub enum TransportError {
    /// The handshake request could not be built
    #[error("Invalid socket request for '{url}': {message}")]
    InvalidRequest { url: String, message: String },

    /// The handshake failed
    #[error("Failed to connect to '{url}': {message}")]
    Connect { url: String, message: String },

    /// Reading or writing an established socket failed
    #[error("Socket I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            TransportError::InvalidRequest { .. } => "TRANSPORT_INVALID_REQUEST",
            TransportError::Connect { .. } => "TRANSPORT_CONNECT_FAILED",
            TransportError::Io(_) => "TRANSPORT_IO",
        }
    }
}

// =============================================================================
// Submission Errors
// =============================================================================

/// Reasons a chat query was not issued or not accepted
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Blank queries are never sent
    #[error("Query is empty")]
    EmptyQuery,

    /// Only one request may stream at a time
    #[error("A request is already in flight: {request_id}")]
    SessionActive { request_id: String },

    /// The notification socket is not open, so the session is considered invalid
    #[error("Notification connection is not open (state: {state}); please sign in again")]
    NotConnected { state: ConnectionState },

    /// The gateway answered with something other than 202 Accepted
    #[error("Error: {status} {reason}")]
    Rejected { status: u16, reason: String },

    /// The REST call failed before a status was received
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl SubmitError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            SubmitError::EmptyQuery => "EMPTY_QUERY",
            SubmitError::SessionActive { .. } => "SESSION_ACTIVE",
            SubmitError::NotConnected { .. } => "AUTHORIZATION_LOST",
            SubmitError::Rejected { .. } => "SUBMISSION_REJECTED",
            SubmitError::Api(_) => "API_ERROR",
        }
    }

    /// Whether the caller must re-authenticate
    pub fn is_authorization_loss(&self) -> bool {
        matches!(self, SubmitError::NotConnected { .. })
    }
}

// =============================================================================
// API Errors
// =============================================================================

/// Failures of the REST collaborator
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network or protocol failure reported by the HTTP client
    #[error("Request to '{url}' failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// No credentials are available for an authenticated call
    #[error("Not authenticated")]
    Unauthenticated,
}

// =============================================================================
// History Errors
// =============================================================================

/// Failures reading or writing the persisted transcript
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Filesystem failure
    #[error("History I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transcript could not be encoded
    #[error("History encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
