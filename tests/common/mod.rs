//! Shared fakes for integration tests: a scripted agent runner that tracks
//! concurrency per session key, and a channel that records what it sends.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use clawgate::agent::{AgentEvent, AgentRunner, AgentStream, RunRequest};
use clawgate::channels::{AccessPolicy, Channel, InboundMessage};
use clawgate::concurrency::RunInput;
use clawgate::session::SessionKey;

#[derive(Debug, Clone)]
pub enum Step {
    Wait(Duration),
    Emit(AgentEvent),
    /// Panic inside `run` before any stream exists.
    Panic,
}

pub fn wait_ms(ms: u64) -> Step {
    Step::Wait(Duration::from_millis(ms))
}

pub fn text(s: &str) -> Step {
    Step::Emit(AgentEvent::Text(s.to_string()))
}

pub fn tool(name: &str) -> Step {
    Step::Emit(AgentEvent::ToolUse(name.to_string()))
}

pub fn panic_in_run() -> Step {
    Step::Panic
}

pub fn fail(message: &str) -> Step {
    Step::Emit(AgentEvent::Error(message.to_string()))
}

#[derive(Default)]
struct Tracker {
    active: Mutex<HashMap<String, usize>>,
    global_active: AtomicUsize,
    max_per_key: AtomicUsize,
    max_global: AtomicUsize,
}

impl Tracker {
    fn enter(&self, key: &str) {
        let mut active = self.active.lock();
        let n = active.entry(key.to_string()).or_insert(0);
        *n += 1;
        self.max_per_key.fetch_max(*n, Ordering::SeqCst);
        let global = self.global_active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_global.fetch_max(global, Ordering::SeqCst);
    }

    fn leave(&self, key: &str) {
        if let Some(n) = self.active.lock().get_mut(key) {
            *n = n.saturating_sub(1);
        }
        self.global_active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Plays a fixed script per message text. Unscripted messages reply with
/// `echo: <message>`.
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<String, Vec<Step>>>,
    tracker: Arc<Tracker>,
    calls: Mutex<Vec<RunRequestSummary>>,
    resets: Mutex<Vec<SessionKey>>,
}

#[derive(Debug, Clone)]
pub struct RunRequestSummary {
    pub message: String,
    pub session_key: SessionKey,
    pub chat_id: String,
    pub tool_servers: usize,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, message: &str, steps: Vec<Step>) {
        self.scripts.lock().insert(message.to_string(), steps);
    }

    pub fn max_concurrent_per_key(&self) -> usize {
        self.tracker.max_per_key.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_global(&self) -> usize {
        self.tracker.max_global.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RunRequestSummary> {
        self.calls.lock().clone()
    }

    pub fn resets(&self) -> Vec<SessionKey> {
        self.resets.lock().clone()
    }
}

fn is_terminal(step: &Step) -> bool {
    matches!(
        step,
        Step::Emit(AgentEvent::Done) | Step::Emit(AgentEvent::Error(_))
    )
}

#[async_trait]
impl AgentRunner for ScriptedRunner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(&self, request: RunRequest) -> anyhow::Result<AgentStream> {
        let mut steps = self
            .scripts
            .lock()
            .get(&request.message)
            .cloned()
            .unwrap_or_else(|| vec![text(&format!("echo: {}", request.message))]);
        if !steps.last().is_some_and(is_terminal) {
            steps.push(Step::Emit(AgentEvent::Done));
        }

        let key = request.session_key.to_string();
        self.calls.lock().push(RunRequestSummary {
            message: request.message.clone(),
            session_key: request.session_key.clone(),
            chat_id: request.chat_id.clone(),
            tool_servers: request.auxiliary_tools.len(),
        });
        assert!(
            !steps.iter().any(|s| matches!(s, Step::Panic)),
            "scripted runner panic for {key}"
        );
        self.tracker.enter(&key);

        let tracker = Arc::clone(&self.tracker);
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let _ = tx.send(AgentEvent::Start).await;
            let last = steps.len() - 1;
            let mut left = false;
            for (i, step) in steps.into_iter().enumerate() {
                if i == last {
                    // Leave before the terminal event so the next run for
                    // this key cannot observe us as still active.
                    tracker.leave(&key);
                    left = true;
                }
                match step {
                    Step::Wait(d) => tokio::time::sleep(d).await,
                    Step::Panic => unreachable!("panics happen before the stream starts"),
                    Step::Emit(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
            if !left {
                tracker.leave(&key);
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn reset_session(&self, key: &SessionKey) {
        self.resets.lock().push(key.clone());
    }
}

/// Records every outbound message; can be switched into failure mode.
pub struct RecordingChannel {
    name: String,
    sent: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
    policy: AccessPolicy,
}

impl RecordingChannel {
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_policy(name, AccessPolicy::open())
    }

    pub fn with_policy(name: &str, policy: AccessPolicy) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            policy,
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("platform unavailable");
        }
        self.sent.lock().push((chat_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn listen(&self, _tx: mpsc::Sender<InboundMessage>) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_allowed(&self, message: &InboundMessage) -> bool {
        self.policy.allows(message)
    }
}

pub fn key(chat_id: &str) -> SessionKey {
    SessionKey::build("main", "test", false, chat_id)
}

pub fn input(channel: &Arc<RecordingChannel>, chat_id: &str, message: &str) -> RunInput {
    let channel: Arc<dyn Channel> = channel.clone();
    RunInput {
        message: message.to_string(),
        image: None,
        channel,
        chat_id: chat_id.to_string(),
        platform: "test".to_string(),
        auxiliary_tools: Vec::new(),
    }
}
