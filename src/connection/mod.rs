//! Shared connection ownership
//!
//! [`ConnectionManager`] owns at most one live transport for the whole client,
//! reference-counted by the [`ConnectionHandle`]s it hands out, and reconnects
//! with [`Backoff`] while anybody is still interested.

pub mod backoff;
pub mod manager;

pub use backoff::Backoff;
pub use manager::{ConnectionHandle, ConnectionManager, ConnectionManagerBuilder, FrameCallback};
