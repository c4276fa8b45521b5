use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::channels::ImagePayload;
use crate::config::ToolServerConfig;
use crate::session::SessionKey;

/// One event in the agent's output for a single run.
///
/// Wire form is `{"type": "...", "content": ...}`; `content` is omitted for
/// `start` and `done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum AgentEvent {
    Start,
    /// Partial reply text.
    Text(String),
    /// The agent is invoking the named tool.
    ToolUse(String),
    Done,
    Error(String),
}

/// Lazy, finite event sequence for one run. Not restartable.
pub type AgentStream = BoxStream<'static, AgentEvent>;

/// Everything the agent needs to execute one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub message: String,
    pub session_key: SessionKey,
    pub platform: String,
    pub chat_id: String,
    pub image: Option<ImagePayload>,
    /// Snapshot of the auxiliary tool servers configured at admission time.
    pub auxiliary_tools: Vec<ToolServerConfig>,
    /// Fired by `/stop`. Runners check it between events.
    pub cancel: CancellationToken,
}

/// The agent-execution collaborator.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    fn name(&self) -> &str;

    /// Start a run. Failures after the stream is returned arrive as
    /// [`AgentEvent::Error`].
    async fn run(&self, request: RunRequest) -> anyhow::Result<AgentStream>;

    /// Drop any agent-side conversational state for `key`.
    async fn reset_session(&self, _key: &SessionKey) {}
}
