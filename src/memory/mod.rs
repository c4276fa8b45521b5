//! Markdown memory files read by the `/memory` directive.

pub mod markdown;
pub mod traits;

pub use markdown::MarkdownMemory;
pub use traits::{MemoryMatch, MemorySearchHit, MemoryStore};
