#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::field_reassign_with_default,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::new_without_default,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unused_self
)]

use clap::Subcommand;
use serde::{Deserialize, Serialize};

pub mod agent;
pub mod channels;
pub mod commands;
pub mod concurrency;
pub mod config;
pub mod gateway;
pub mod health;
pub mod memory;
pub mod observability;
pub mod security;
pub mod session;
pub mod tools;
pub mod util;

pub use config::Config;

/// Memory inspection subcommands
#[derive(Subcommand, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemoryCommands {
    /// List daily memory files, newest first
    List,
    /// Case-insensitive search across long-term memory and recent daily notes
    Search {
        /// Text to look for
        query: String,
    },
}
