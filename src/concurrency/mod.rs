//! Conversation-level concurrency: one serialized worker per session key.

pub mod run_queue;

pub use run_queue::{
    DEFAULT_IDLE_GRACE, QueueSnapshot, QueueStatus, RunError, RunHandle, RunInput, RunQueue,
};
