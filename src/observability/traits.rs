use std::time::Duration;

/// Discrete lifecycle events emitted by the gateway.
///
/// Events carry identifiers and counts, never message bodies or secrets.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    /// A run was admitted. `position` is 0-based: pending length, plus one
    /// when a worker is already busy for the key.
    RunQueued {
        session_key: String,
        run_id: String,
        position: usize,
    },
    /// A worker picked up a run.
    RunStarted {
        session_key: String,
        run_id: String,
        waited: Duration,
    },
    RunCompleted {
        session_key: String,
        run_id: String,
        duration: Duration,
        chunks_sent: usize,
    },
    RunFailed {
        session_key: String,
        run_id: String,
        duration: Duration,
        error: String,
    },
    /// The agent announced a tool invocation during a run.
    ToolInvoked { session_key: String, tool: String },
    /// An idle, empty queue was dropped from the registry.
    QueueEvicted { session_key: String },
    /// A directive was intercepted before reaching the agent.
    CommandHandled { session_key: String, command: String },
    /// A message was sent or received through a channel.
    ChannelMessage {
        /// Channel name (e.g., `"telegram"`, `"cli"`).
        channel: String,
        /// `"inbound"` or `"outbound"`.
        direction: String,
    },
    /// An error occurred in a named component.
    Error {
        /// Subsystem where the error originated (e.g., `"channel:telegram"`).
        component: String,
        /// Must not contain secrets or tokens.
        message: String,
    },
}

/// Numeric samples.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverMetric {
    /// Runs waiting across every key.
    QueueDepth(u64),
    /// Keys with a worker currently processing.
    ActiveSessions(u64),
}

/// Sink for gateway telemetry.
///
/// Called synchronously on the hot path; implementations should not block.
pub trait Observer: Send + Sync + 'static {
    fn record_event(&self, event: &ObserverEvent);

    fn record_metric(&self, metric: &ObserverMetric);

    /// Called during graceful shutdown.
    fn flush(&self) {}

    fn name(&self) -> &str;
}
