//! Per-conversation run queue.
//!
//! Every session key owns one FIFO of pending runs and at most one worker
//! task. Admission appends and, if no worker is active for the key, spawns
//! one; the worker drains the queue sequentially through the
//! [`AgentRunner`] and then exits. Different keys never wait on each other.
//!
//! Completion is delivered through a oneshot stored on each run, surfaced to
//! the caller as a [`RunHandle`] future.

use futures_util::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{AgentEvent, AgentRunner, RunRequest};
use crate::channels::{Channel, ImagePayload};
use crate::config::ToolServerConfig;
use crate::observability::{Observer, ObserverEvent, ObserverMetric};
use crate::session::{SessionKey, SessionRegistry};

/// Default grace window before an idle, empty queue is dropped.
pub const DEFAULT_IDLE_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("agent error: {0}")]
    Agent(String),
    #[error("failed to deliver reply: {0}")]
    Send(String),
    #[error("run aborted")]
    Aborted,
    #[error("run panicked: {0}")]
    Panicked(String),
    #[error("run worker dropped before completion")]
    WorkerDropped,
}

/// What the caller hands over at admission.
pub struct RunInput {
    pub message: String,
    pub image: Option<ImagePayload>,
    /// Adapter the replies go out through.
    pub channel: Arc<dyn Channel>,
    pub chat_id: String,
    pub platform: String,
    pub auxiliary_tools: Vec<ToolServerConfig>,
}

struct Run {
    id: String,
    input: RunInput,
    enqueued_at: Instant,
    completion: oneshot::Sender<Result<String, RunError>>,
}

/// Settles with the run's full reply text, or its error.
#[derive(Debug)]
pub struct RunHandle {
    run_id: String,
    position: usize,
    rx: oneshot::Receiver<Result<String, RunError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// 0-based position at admission time.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl Future for RunHandle {
    type Output = Result<String, RunError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RunError::WorkerDropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[derive(Default)]
struct ConversationQueue {
    pending: VecDeque<Run>,
    /// True exactly while a worker loop for this key is alive.
    processing: bool,
    current: Option<CancellationToken>,
    eviction: Option<JoinHandle<()>>,
    eviction_epoch: u64,
}

impl ConversationQueue {
    fn cancel_eviction(&mut self) {
        if let Some(handle) = self.eviction.take() {
            handle.abort();
        }
        self.eviction_epoch = self.eviction_epoch.wrapping_add(1);
    }
}

#[derive(Default)]
struct GlobalStats {
    queued: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Pending and processing state of one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub processing: bool,
}

/// Process-wide view across all keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueSnapshot {
    /// Runs waiting (not yet started) across every key.
    pub pending: usize,
    /// Keys with a worker currently running.
    pub active_sessions: usize,
    /// Keys with a queue entry, idle or not.
    pub tracked_sessions: usize,
    pub total_queued: u64,
    pub total_processed: u64,
    pub total_failed: u64,
}

struct QueueInner {
    runner: Arc<dyn AgentRunner>,
    sessions: Arc<SessionRegistry>,
    observer: Arc<dyn Observer>,
    queues: Mutex<HashMap<SessionKey, ConversationQueue>>,
    stats: GlobalStats,
    idle_grace: Duration,
}

/// Owned registry of conversation queues. Cheap to clone.
#[derive(Clone)]
pub struct RunQueue {
    inner: Arc<QueueInner>,
}

impl RunQueue {
    pub fn new(
        runner: Arc<dyn AgentRunner>,
        sessions: Arc<SessionRegistry>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self::with_idle_grace(runner, sessions, observer, DEFAULT_IDLE_GRACE)
    }

    pub fn with_idle_grace(
        runner: Arc<dyn AgentRunner>,
        sessions: Arc<SessionRegistry>,
        observer: Arc<dyn Observer>,
        idle_grace: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                runner,
                sessions,
                observer,
                queues: Mutex::new(HashMap::new()),
                stats: GlobalStats::default(),
                idle_grace,
            }),
        }
    }

    /// Append a run to `key`'s queue, starting a worker if none is active.
    ///
    /// Never waits on the agent. Must be called inside a tokio runtime.
    pub fn admit(&self, key: &SessionKey, input: RunInput) -> RunHandle {
        let (tx, rx) = oneshot::channel();
        let run_id = uuid::Uuid::new_v4().to_string();
        let run = Run {
            id: run_id.clone(),
            input,
            enqueued_at: Instant::now(),
            completion: tx,
        };

        let (position, spawn_worker) = {
            let mut queues = self.inner.queues.lock();
            let queue = queues.entry(key.clone()).or_default();
            queue.cancel_eviction();
            let position = queue.pending.len() + usize::from(queue.processing);
            queue.pending.push_back(run);
            let spawn_worker = !queue.processing;
            if spawn_worker {
                queue.processing = true;
            }
            (position, spawn_worker)
        };

        self.inner.stats.queued.fetch_add(1, Ordering::Relaxed);
        self.inner.observer.record_event(&ObserverEvent::RunQueued {
            session_key: key.to_string(),
            run_id: run_id.clone(),
            position,
        });
        self.inner.record_depth_metrics();

        if spawn_worker {
            let inner = Arc::clone(&self.inner);
            let key = key.clone();
            tokio::spawn(async move { QueueInner::worker_loop(inner, key).await });
        }

        RunHandle {
            run_id,
            position,
            rx,
        }
    }

    /// Cancel the run currently executing under `key`. Queued runs are not
    /// touched. Returns whether a cancellation was delivered.
    pub fn abort(&self, key: &SessionKey) -> bool {
        let queues = self.inner.queues.lock();
        match queues.get(key).and_then(|q| q.current.as_ref()) {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                info!(session_key = %key, "run abort requested");
                true
            }
            _ => false,
        }
    }

    pub fn status(&self, key: &SessionKey) -> QueueStatus {
        self.inner
            .queues
            .lock()
            .get(key)
            .map(|q| QueueStatus {
                pending: q.pending.len(),
                processing: q.processing,
            })
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let (pending, active_sessions, tracked_sessions) = self.inner.depth();
        QueueSnapshot {
            pending,
            active_sessions,
            tracked_sessions,
            total_queued: self.inner.stats.queued.load(Ordering::Relaxed),
            total_processed: self.inner.stats.processed.load(Ordering::Relaxed),
            total_failed: self.inner.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// Whether `key` currently has a queue entry.
    pub fn is_tracked(&self, key: &SessionKey) -> bool {
        self.inner.queues.lock().contains_key(key)
    }

    pub fn idle_grace(&self) -> Duration {
        self.inner.idle_grace
    }
}

impl QueueInner {
    /// (pending runs, active keys, tracked keys)
    fn depth(&self) -> (usize, usize, usize) {
        let queues = self.queues.lock();
        let pending = queues.values().map(|q| q.pending.len()).sum();
        let active = queues.values().filter(|q| q.processing).count();
        (pending, active, queues.len())
    }

    fn record_depth_metrics(&self) {
        let (pending, active, _) = self.depth();
        self.observer
            .record_metric(&ObserverMetric::QueueDepth(pending as u64));
        self.observer
            .record_metric(&ObserverMetric::ActiveSessions(active as u64));
    }

    async fn worker_loop(inner: Arc<Self>, key: SessionKey) {
        debug!(session_key = %key, "queue worker started");
        loop {
            let next = {
                let mut queues = inner.queues.lock();
                let Some(queue) = queues.get_mut(&key) else {
                    return;
                };
                match queue.pending.pop_front() {
                    Some(run) => {
                        let token = CancellationToken::new();
                        queue.current = Some(token.clone());
                        Some((run, token))
                    }
                    None => {
                        queue.processing = false;
                        queue.current = None;
                        Self::schedule_eviction(&inner, &key, queue);
                        None
                    }
                }
            };
            let Some((run, cancel)) = next else {
                debug!(session_key = %key, "queue drained, worker exiting");
                inner.record_depth_metrics();
                return;
            };

            inner.record_depth_metrics();
            let Run {
                id,
                input,
                enqueued_at,
                completion,
            } = run;

            inner.observer.record_event(&ObserverEvent::RunStarted {
                session_key: key.to_string(),
                run_id: id.clone(),
                waited: enqueued_at.elapsed(),
            });
            let started = Instant::now();
            // A panicking runner or channel fails this run only; the loop
            // must survive to settle the runs queued behind it.
            let outcome = AssertUnwindSafe(inner.execute(&key, &input, cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(session_key = %key, run_id = %id, "agent run panicked: {message}");
                    Err(RunError::Panicked(message))
                });

            if let Some(queue) = inner.queues.lock().get_mut(&key) {
                queue.current = None;
            }

            match &outcome {
                Ok((_, chunks_sent)) => {
                    inner.stats.processed.fetch_add(1, Ordering::Relaxed);
                    inner.observer.record_event(&ObserverEvent::RunCompleted {
                        session_key: key.to_string(),
                        run_id: id.clone(),
                        duration: started.elapsed(),
                        chunks_sent: *chunks_sent,
                    });
                }
                Err(e) => {
                    inner.stats.failed.fetch_add(1, Ordering::Relaxed);
                    inner.observer.record_event(&ObserverEvent::RunFailed {
                        session_key: key.to_string(),
                        run_id: id.clone(),
                        duration: started.elapsed(),
                        error: e.to_string(),
                    });
                }
            }

            // The caller may have dropped its handle.
            let _ = completion.send(outcome.map(|(text, _)| text));
        }
    }

    fn schedule_eviction(inner: &Arc<Self>, key: &SessionKey, queue: &mut ConversationQueue) {
        queue.cancel_eviction();
        let epoch = queue.eviction_epoch;
        let grace = inner.idle_grace;
        let weak = Arc::downgrade(inner);
        let key = key.clone();
        queue.eviction = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let evicted = {
                let mut queues = inner.queues.lock();
                let idle = queues.get(&key).is_some_and(|q| {
                    q.eviction_epoch == epoch && !q.processing && q.pending.is_empty()
                });
                if idle {
                    queues.remove(&key);
                }
                idle
            };
            if evicted {
                debug!(session_key = %key, "idle queue evicted");
                inner.observer.record_event(&ObserverEvent::QueueEvicted {
                    session_key: key.to_string(),
                });
            }
        }));
    }

    /// Drive one run through the agent, streaming flushed text to the channel.
    /// Returns the full reply and how many chunks were sent.
    async fn execute(
        &self,
        key: &SessionKey,
        input: &RunInput,
        cancel: CancellationToken,
    ) -> Result<(String, usize), RunError> {
        self.sessions
            .record_user(key, &input.message, input.image.is_some());

        let request = RunRequest {
            message: input.message.clone(),
            session_key: key.clone(),
            platform: input.platform.clone(),
            chat_id: input.chat_id.clone(),
            image: input.image.clone(),
            auxiliary_tools: input.auxiliary_tools.clone(),
            cancel: cancel.clone(),
        };

        let mut stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RunError::Aborted),
            started = self.runner.run(request) => {
                started.map_err(|e| RunError::Agent(format!("{e:#}")))?
            }
        };

        let mut outbox = Outbox::new(input, self.observer.as_ref());
        let mut full = String::new();

        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    if let Err(e) = outbox.flush().await {
                        warn!(session_key = %key, "flush after abort failed: {e}");
                    }
                    return Err(RunError::Aborted);
                }
                event = stream.next() => event,
            };

            match event {
                None | Some(AgentEvent::Done) => break,
                Some(AgentEvent::Start) => {}
                Some(AgentEvent::Text(delta)) => {
                    outbox.push(&delta);
                    full.push_str(&delta);
                }
                Some(AgentEvent::ToolUse(tool)) => {
                    outbox.flush().await?;
                    self.observer.record_event(&ObserverEvent::ToolInvoked {
                        session_key: key.to_string(),
                        tool,
                    });
                }
                Some(AgentEvent::Error(message)) => return Err(RunError::Agent(message)),
            }
        }

        outbox.flush().await?;
        self.sessions.record_assistant(key, &full);
        Ok((full, outbox.sent))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

/// Accumulates text deltas and sends them as one message per flush.
struct Outbox<'a> {
    input: &'a RunInput,
    observer: &'a dyn Observer,
    buffer: String,
    sent: usize,
}

impl<'a> Outbox<'a> {
    fn new(input: &'a RunInput, observer: &'a dyn Observer) -> Self {
        Self {
            input,
            observer,
            buffer: String::new(),
            sent: 0,
        }
    }

    fn push(&mut self, delta: &str) {
        self.buffer.push_str(delta);
    }

    /// Send buffered text if it has any non-whitespace content.
    async fn flush(&mut self) -> Result<(), RunError> {
        let text = std::mem::take(&mut self.buffer);
        if text.trim().is_empty() {
            return Ok(());
        }
        self.input
            .channel
            .send_message(&self.input.chat_id, &text)
            .await
            .map_err(|e| RunError::Send(format!("{e:#}")))?;
        self.sent += 1;
        self.observer.record_event(&ObserverEvent::ChannelMessage {
            channel: self.input.channel.name().to_string(),
            direction: "outbound".into(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentStream;
    use crate::channels::InboundMessage;
    use crate::observability::NoopObserver;
    use async_trait::async_trait;

    struct SilentChannel;

    #[async_trait]
    impl Channel for SilentChannel {
        fn name(&self) -> &str {
            "silent"
        }

        async fn send_message(&self, _chat_id: &str, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn listen(
            &self,
            _tx: tokio::sync::mpsc::Sender<InboundMessage>,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct InstantRunner;

    #[async_trait]
    impl AgentRunner for InstantRunner {
        fn name(&self) -> &str {
            "instant"
        }

        async fn run(&self, request: RunRequest) -> anyhow::Result<AgentStream> {
            Ok(futures_util::stream::iter(vec![
                AgentEvent::Text(format!("echo: {}", request.message)),
                AgentEvent::Done,
            ])
            .boxed())
        }
    }

    fn queue(grace: Duration) -> RunQueue {
        RunQueue::with_idle_grace(
            Arc::new(InstantRunner),
            Arc::new(SessionRegistry::new()),
            Arc::new(NoopObserver),
            grace,
        )
    }

    fn input(message: &str) -> RunInput {
        RunInput {
            message: message.into(),
            image: None,
            channel: Arc::new(SilentChannel),
            chat_id: "c1".into(),
            platform: "silent".into(),
            auxiliary_tools: Vec::new(),
        }
    }

    fn key() -> SessionKey {
        SessionKey::build("main", "silent", false, "c1")
    }

    #[tokio::test]
    async fn handle_resolves_with_full_text() {
        let q = queue(DEFAULT_IDLE_GRACE);
        let handle = q.admit(&key(), input("hi"));
        assert_eq!(handle.position(), 0);
        assert!(!handle.run_id().is_empty());
        assert_eq!(handle.await.unwrap(), "echo: hi");

        let snap = q.snapshot();
        assert_eq!(snap.total_queued, 1);
        assert_eq!(snap.total_processed, 1);
        assert_eq!(snap.total_failed, 0);
    }

    #[tokio::test]
    async fn unknown_key_reports_idle_status() {
        let q = queue(DEFAULT_IDLE_GRACE);
        assert_eq!(q.status(&key()), QueueStatus::default());
        assert!(!q.abort(&key()));
        assert!(!q.is_tracked(&key()));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_queue_is_evicted_after_grace() {
        let q = queue(Duration::from_secs(60));
        q.admit(&key(), input("hi")).await.unwrap();
        tokio::task::yield_now().await;
        assert!(q.is_tracked(&key()));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(q.is_tracked(&key()));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!q.is_tracked(&key()));
        assert_eq!(q.snapshot().tracked_sessions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn new_admission_cancels_pending_eviction() {
        let q = queue(Duration::from_secs(60));
        q.admit(&key(), input("one")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(45)).await;
        q.admit(&key(), input("two")).await.unwrap();

        // Past the first window, inside the second one.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(q.is_tracked(&key()));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!q.is_tracked(&key()));
    }

    #[tokio::test]
    async fn dropped_handle_does_not_stall_queue() {
        let q = queue(DEFAULT_IDLE_GRACE);
        drop(q.admit(&key(), input("fire and forget")));
        assert_eq!(q.admit(&key(), input("second")).await.unwrap(), "echo: second");
        assert_eq!(q.snapshot().total_processed, 2);
    }

    #[test]
    fn worker_dropped_error_when_sender_vanishes() {
        let (tx, rx) = oneshot::channel::<Result<String, RunError>>();
        drop(tx);
        let handle = RunHandle {
            run_id: "r".into(),
            position: 0,
            rx,
        };
        let result = futures_util::FutureExt::now_or_never(handle).unwrap();
        assert_eq!(result, Err(RunError::WorkerDropped));
    }
}
