//! Core module containing the shared building blocks of the client

pub mod auth;
pub mod error;
pub mod events;
pub mod notify;
pub mod store;

pub use auth::{AuthSession, Credentials};
pub use error::{ApiError, HistoryError, LiveError, SubmitError, TransportError};
pub use events::{EventBus, EventEnvelope, LiveEvent, Topic};
pub use notify::{Notification, NotificationCenter};
pub use store::{HistoryStore, InMemoryHistory, JsonFileHistory};
