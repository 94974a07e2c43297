//! Chat transcript and streamed answer reassembly

pub mod reconciler;
pub mod transcript;

pub use reconciler::{ChunkOutcome, RequestSession, StreamingReconciler, new_request_id};
pub use transcript::{ChatMessage, ContextTurn, Role, Transcript};
