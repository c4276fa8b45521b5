//! Slash directives handled outside the run queue.
//!
//! A directive never reaches the agent. Its reply goes straight back through
//! the originating channel, even while a run for the same conversation is in
//! flight.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::agent::AgentRunner;
use crate::channels::Channel;
use crate::concurrency::RunQueue;
use crate::memory::MemoryStore;
use crate::observability::{Observer, ObserverEvent};
use crate::session::{SessionKey, SessionRegistry};
use crate::util::{single_line, truncate_with_ellipsis};

const DIRECTIVE_MARKER: char = '/';
const MEMORY_PREVIEW_CHARS: usize = 500;
const MEMORY_LIST_LIMIT: usize = 10;
const SEARCH_FILE_LIMIT: usize = 5;
const SEARCH_MATCH_LIMIT: usize = 5;
const SEARCH_CONTEXT_CHARS: usize = 100;

pub const HELP_TEXT: &str = "Available commands:
/reset (or /new) - start a fresh conversation
/status - session and queue status
/memory - preview long-term memory and today's notes
/memory list - list daily memory files
/memory search <query> - search memory files
/queue - global queue statistics
/stop - stop the reply currently being generated
/help - show this message";

/// A directive split into its lower-cased name and trimmed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub args: String,
}

/// Result of [`CommandRouter::execute`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutcome {
    /// False means the text should go to the agent.
    pub handled: bool,
    pub response: Option<String>,
}

impl CommandOutcome {
    fn reply(text: impl Into<String>) -> Self {
        Self {
            handled: true,
            response: Some(text.into()),
        }
    }

    fn not_handled() -> Self {
        Self::default()
    }
}

pub struct CommandRouter {
    queue: RunQueue,
    sessions: Arc<SessionRegistry>,
    memory: Arc<dyn MemoryStore>,
    runner: Arc<dyn AgentRunner>,
    observer: Arc<dyn Observer>,
}

impl CommandRouter {
    pub fn new(
        queue: RunQueue,
        sessions: Arc<SessionRegistry>,
        memory: Arc<dyn MemoryStore>,
        runner: Arc<dyn AgentRunner>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            queue,
            sessions,
            memory,
            runner,
            observer,
        }
    }

    pub fn is_directive(text: &str) -> bool {
        text.trim_start().starts_with(DIRECTIVE_MARKER)
    }

    /// `"/Memory  search foo bar "` → `{name: "memory", args: "search foo bar"}`.
    /// A Telegram-style `@botname` suffix on the name is dropped.
    pub fn parse(text: &str) -> ParsedCommand {
        let body = text.trim().trim_start_matches(DIRECTIVE_MARKER);
        let (name, args) = body
            .split_once(char::is_whitespace)
            .unwrap_or((body, ""));
        let name = name.split('@').next().unwrap_or_default().to_lowercase();
        ParsedCommand {
            name,
            args: args.trim().to_string(),
        }
    }

    /// Run a directive and send its reply through `channel`.
    ///
    /// Unknown directives and non-directive text return `handled: false`.
    pub async fn execute(
        &self,
        text: &str,
        key: &SessionKey,
        channel: &dyn Channel,
        chat_id: &str,
    ) -> CommandOutcome {
        if !Self::is_directive(text) {
            return CommandOutcome::not_handled();
        }
        let command = Self::parse(text);
        let outcome = match command.name.as_str() {
            "reset" | "new" => self.reset(key).await,
            "status" => self.status(key),
            "memory" => self.memory(&command.args).await,
            "queue" => self.queue_stats(),
            "stop" => self.stop(key),
            "help" => CommandOutcome::reply(HELP_TEXT),
            _ => return CommandOutcome::not_handled(),
        };

        self.observer.record_event(&ObserverEvent::CommandHandled {
            session_key: key.to_string(),
            command: command.name.clone(),
        });

        if let Some(response) = &outcome.response {
            if let Err(e) = channel.send_message(chat_id, response).await {
                tracing::warn!(
                    session_key = %key,
                    command = %command.name,
                    "failed to send command reply: {e:#}"
                );
            }
        }
        outcome
    }

    async fn reset(&self, key: &SessionKey) -> CommandOutcome {
        self.sessions.reset(key);
        self.runner.reset_session(key).await;
        CommandOutcome::reply("Session reset. Your next message starts a fresh conversation.")
    }

    fn status(&self, key: &SessionKey) -> CommandOutcome {
        let status = self.queue.status(key);
        let snapshot = self.queue.snapshot();
        let state = if status.processing {
            "processing"
        } else {
            "idle"
        };
        CommandOutcome::reply(format!(
            "Session status\nMessages: {}\nQueue: {} pending, {state}\nProcessed: {} | Failed: {}",
            self.sessions.message_count(key),
            status.pending,
            snapshot.total_processed,
            snapshot.total_failed,
        ))
    }

    fn queue_stats(&self) -> CommandOutcome {
        let s = self.queue.snapshot();
        CommandOutcome::reply(format!(
            "Queue\nPending: {}\nActive sessions: {}\nTracked sessions: {}\nProcessed: {} | Failed: {}",
            s.pending, s.active_sessions, s.tracked_sessions, s.total_processed, s.total_failed,
        ))
    }

    fn stop(&self, key: &SessionKey) -> CommandOutcome {
        if self.queue.abort(key) {
            CommandOutcome::reply("Stopped the current run.")
        } else {
            CommandOutcome::reply("Nothing to stop.")
        }
    }

    async fn memory(&self, args: &str) -> CommandOutcome {
        let (sub, rest) = args
            .split_once(char::is_whitespace)
            .map_or((args, ""), |(s, r)| (s, r.trim()));
        let result = match sub.to_lowercase().as_str() {
            "" => self.memory_preview().await,
            "list" => self.memory_list().await,
            "search" if rest.is_empty() => Ok("Usage: /memory search <query>".to_string()),
            "search" => self.memory_search(rest).await,
            _ => Ok("Usage: /memory [list | search <query>]".to_string()),
        };
        match result {
            Ok(text) => CommandOutcome::reply(text),
            Err(e) => {
                tracing::warn!("memory command failed: {e:#}");
                CommandOutcome::reply("Memory is unavailable right now.")
            }
        }
    }

    async fn memory_preview(&self) -> anyhow::Result<String> {
        let long_term = self.memory.read_long_term().await?;
        let today = self.memory.read_today().await?;
        Ok(format!(
            "Long-term memory:\n{}\n\nToday's notes:\n{}",
            preview(&long_term),
            preview(&today)
        ))
    }

    async fn memory_list(&self) -> anyhow::Result<String> {
        let files = self.memory.list_daily_files().await?;
        if files.is_empty() {
            return Ok("No daily memory files yet.".into());
        }
        let mut out = format!("Daily memory files ({}):", files.len());
        for name in files.iter().take(MEMORY_LIST_LIMIT) {
            let _ = write!(out, "\n- {name}");
        }
        if files.len() > MEMORY_LIST_LIMIT {
            let _ = write!(out, "\n...and {} more", files.len() - MEMORY_LIST_LIMIT);
        }
        Ok(out)
    }

    async fn memory_search(&self, query: &str) -> anyhow::Result<String> {
        let hits = self.memory.search(query).await?;
        if hits.is_empty() {
            return Ok(format!("No memory matches for \"{query}\"."));
        }
        let mut out = format!("Memory matches for \"{query}\":");
        for hit in hits.iter().take(SEARCH_FILE_LIMIT) {
            let _ = write!(out, "\n\n{}", hit.file);
            for m in hit.matches.iter().take(SEARCH_MATCH_LIMIT) {
                let context = truncate_with_ellipsis(&single_line(&m.context), SEARCH_CONTEXT_CHARS);
                let _ = write!(out, "\n  L{}: {context}", m.line);
            }
        }
        Ok(out)
    }
}

fn preview(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        "(empty)".into()
    } else {
        truncate_with_ellipsis(text, MEMORY_PREVIEW_CHARS)
    }
}
