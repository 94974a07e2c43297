//! Authentication session shared across the client
//!
//! Issuing credentials is someone else's job (the gateway's login call). This
//! module only holds the current credentials and lets interested parties
//! observe transitions: the connection manager closes its socket as soon as
//! the session is revoked and reconnects when it is restored.

use tokio::sync::watch;

/// Credentials of a signed-in user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User identifier as known to the gateway
    pub user_id: String,
    /// Bearer token presented on every call
    pub token: String,
}

impl Credentials {
    /// Create credentials
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
        }
    }
}

/// Observable authentication state
///
/// Cheap to clone; all clones share the same state.
#[derive(Debug, Clone)]
pub struct AuthSession {
    sender: watch::Sender<Option<Credentials>>,
}

impl AuthSession {
    /// Create a signed-out session
    pub fn new() -> Self {
        Self {
            sender: watch::Sender::new(None),
        }
    }

    /// Create a session that is already signed in
    pub fn authenticated(credentials: Credentials) -> Self {
        Self {
            sender: watch::Sender::new(Some(credentials)),
        }
    }

    /// Sign in (or replace the credentials)
    pub fn login(&self, credentials: Credentials) {
        tracing::info!(user_id = %credentials.user_id, "Session authenticated");
        self.sender.send_replace(Some(credentials));
    }

    /// Sign out; observers are notified only if a user was signed in
    pub fn logout(&self) {
        self.sender.send_if_modified(|current| match current.take() {
            Some(credentials) => {
                tracing::info!(user_id = %credentials.user_id, "Session revoked");
                true
            }
            None => false,
        });
    }

    /// Whether credentials are present
    pub fn is_authenticated(&self) -> bool {
        self.sender.borrow().is_some()
    }

    /// Current credentials, if any
    pub fn credentials(&self) -> Option<Credentials> {
        self.sender.borrow().clone()
    }

    /// Bearer token of the current credentials
    pub fn token(&self) -> Option<String> {
        self.sender.borrow().as_ref().map(|c| c.token.clone())
    }

    /// Observe session transitions
    pub fn subscribe(&self) -> watch::Receiver<Option<Credentials>> {
        self.sender.subscribe()
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}
