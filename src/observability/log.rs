use super::traits::{Observer, ObserverEvent, ObserverMetric};
use std::time::Duration;
use tracing::{info, warn};

/// Observer that forwards everything to `tracing`.
pub struct LogObserver;

impl LogObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogObserver {
    fn default() -> Self {
        Self::new()
    }
}

fn millis(d: &Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Observer for LogObserver {
    fn record_event(&self, event: &ObserverEvent) {
        match event {
            ObserverEvent::RunQueued {
                session_key,
                run_id,
                position,
            } => {
                info!(session_key = %session_key, run_id = %run_id, position, "run.queued");
            }
            ObserverEvent::RunStarted {
                session_key,
                run_id,
                waited,
            } => {
                info!(session_key = %session_key, run_id = %run_id, waited_ms = millis(waited), "run.started");
            }
            ObserverEvent::RunCompleted {
                session_key,
                run_id,
                duration,
                chunks_sent,
            } => {
                info!(
                    session_key = %session_key,
                    run_id = %run_id,
                    duration_ms = millis(duration),
                    chunks_sent,
                    "run.completed"
                );
            }
            ObserverEvent::RunFailed {
                session_key,
                run_id,
                duration,
                error,
            } => {
                warn!(
                    session_key = %session_key,
                    run_id = %run_id,
                    duration_ms = millis(duration),
                    error = %error,
                    "run.failed"
                );
            }
            ObserverEvent::ToolInvoked { session_key, tool } => {
                info!(session_key = %session_key, tool = %tool, "tool.invoked");
            }
            ObserverEvent::QueueEvicted { session_key } => {
                info!(session_key = %session_key, "queue.evicted");
            }
            ObserverEvent::CommandHandled {
                session_key,
                command,
            } => {
                info!(session_key = %session_key, command = %command, "command.handled");
            }
            ObserverEvent::ChannelMessage { channel, direction } => {
                info!(channel = %channel, direction = %direction, "channel.message");
            }
            ObserverEvent::Error { component, message } => {
                warn!(component = %component, error = %message, "error");
            }
        }
    }

    fn record_metric(&self, metric: &ObserverMetric) {
        match metric {
            ObserverMetric::QueueDepth(d) => {
                info!(depth = d, "metric.queue_depth");
            }
            ObserverMetric::ActiveSessions(s) => {
                info!(sessions = s, "metric.active_sessions");
            }
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}
