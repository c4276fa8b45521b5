//! Conversation identity and state: session keys, transcripts, and the owned
//! session registry.

pub mod key;
pub mod store;
pub mod types;

pub use key::{ChatKind, SessionKey, SessionKeyParts};
pub use store::SessionRegistry;
pub use types::*;
