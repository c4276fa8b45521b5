//! The agent-execution collaborator: event protocol, runner trait and the
//! subprocess-backed runner.

pub mod cli;
pub mod traits;

pub use cli::CliAgentRunner;
pub use traits::{AgentEvent, AgentRunner, AgentStream, RunRequest};
