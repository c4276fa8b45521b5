//! Gateway wiring: inbound dispatch from channels into the run queue, and the
//! HTTP control plane.

pub mod api;
pub mod error;

pub use api::router;
pub use error::ApiError;

use crate::agent::{AgentRunner, CliAgentRunner};
use crate::channels::{self, Channel, InboundMessage};
use crate::commands::{CommandOutcome, CommandRouter};
use crate::concurrency::{RunError, RunInput, RunQueue};
use crate::config::{Config, ToolServerConfig};
use crate::health::HealthRegistry;
use crate::memory::{MarkdownMemory, MemoryStore};
use crate::observability::{self, Observer, ObserverEvent};
use crate::security::{AuthGate, PathSandbox, is_public_bind};
use crate::session::{SessionKey, SessionRegistry};
use crate::tools::ToolRegistry;
use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Maximum request body size for the control plane (64KB).
pub const MAX_BODY_SIZE: usize = 65_536;
/// Per-request timeout for the control plane.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const INBOUND_BUFFER: usize = 100;
const RUN_FAILED_NOTICE: &str = "Sorry, something went wrong while handling your message. Please try again.";

/// What [`GatewayCoordinator::handle_inbound`] did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Sender or chat is not on the channel's allow-list.
    Denied,
    /// Nothing to process (no text and no image).
    Ignored,
    /// A directive was answered directly.
    Command(CommandOutcome),
    /// The message was queued for the agent.
    Admitted { run_id: String, position: usize },
}

/// Owns the per-instance registries and routes channel traffic through them.
pub struct GatewayCoordinator {
    agent_id: String,
    queue: RunQueue,
    commands: CommandRouter,
    sessions: Arc<SessionRegistry>,
    runner: Arc<dyn AgentRunner>,
    sandbox: Arc<PathSandbox>,
    tools: ToolRegistry,
    tool_servers: RwLock<Vec<ToolServerConfig>>,
    observer: Arc<dyn Observer>,
    health: Arc<HealthRegistry>,
}

impl GatewayCoordinator {
    pub fn new(
        config: &Config,
        runner: Arc<dyn AgentRunner>,
        memory: Arc<dyn MemoryStore>,
        observer: Arc<dyn Observer>,
    ) -> Result<Self> {
        let sandbox = Arc::new(
            PathSandbox::new(config.workspace_policy())
                .context("Invalid workspace directory")?,
        );
        let sessions = Arc::new(SessionRegistry::new());
        let queue = RunQueue::with_idle_grace(
            Arc::clone(&runner),
            Arc::clone(&sessions),
            Arc::clone(&observer),
            config.idle_grace(),
        );
        let commands = CommandRouter::new(
            queue.clone(),
            Arc::clone(&sessions),
            memory,
            Arc::clone(&runner),
            Arc::clone(&observer),
        );

        Ok(Self {
            agent_id: config.agent.id.clone(),
            queue,
            commands,
            sessions,
            runner,
            tools: ToolRegistry::with_defaults(Arc::clone(&sandbox)),
            sandbox,
            tool_servers: RwLock::new(config.agent.tool_servers.clone()),
            observer,
            health: Arc::new(HealthRegistry::new()),
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn queue(&self) -> &RunQueue {
        &self.queue
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn sandbox(&self) -> &Arc<PathSandbox> {
        &self.sandbox
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn observer(&self) -> &Arc<dyn Observer> {
        &self.observer
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    /// Snapshot of the auxiliary tool servers handed to new runs.
    pub fn tool_servers(&self) -> Vec<ToolServerConfig> {
        self.tool_servers.read().clone()
    }

    /// Replace the auxiliary tool servers. Runs already admitted keep the
    /// snapshot they were admitted with.
    pub fn set_tool_servers(&self, servers: Vec<ToolServerConfig>) {
        *self.tool_servers.write() = servers;
    }

    pub fn session_key_for(&self, msg: &InboundMessage) -> SessionKey {
        SessionKey::build(&self.agent_id, &msg.platform, msg.is_group, &msg.chat_id)
    }

    /// Clear a session and drop the agent's state for it. In-flight and
    /// queued runs are left alone.
    pub async fn reset_session(&self, key: &SessionKey) -> bool {
        let existed = self.sessions.reset(key);
        self.runner.reset_session(key).await;
        existed
    }

    /// Route one inbound message: allow-list, directive interception, then
    /// admission into the run queue.
    pub async fn handle_inbound(
        &self,
        channel: Arc<dyn Channel>,
        msg: InboundMessage,
    ) -> Dispatch {
        self.observer.record_event(&ObserverEvent::ChannelMessage {
            channel: channel.name().to_string(),
            direction: "inbound".into(),
        });

        if !channel.is_allowed(&msg) {
            tracing::debug!(
                channel = channel.name(),
                chat_id = %msg.chat_id,
                sender = %msg.sender,
                "dropping message from non-allowed sender"
            );
            return Dispatch::Denied;
        }

        if msg.text.trim().is_empty() && msg.image.is_none() {
            return Dispatch::Ignored;
        }

        let key = self.session_key_for(&msg);

        if CommandRouter::is_directive(&msg.text) {
            let outcome = self
                .commands
                .execute(&msg.text, &key, channel.as_ref(), &msg.chat_id)
                .await;
            if outcome.handled {
                return Dispatch::Command(outcome);
            }
        }

        let chat_id = msg.chat_id.clone();
        let handle = self.queue.admit(
            &key,
            RunInput {
                message: msg.text,
                image: msg.image,
                channel: Arc::clone(&channel),
                chat_id: chat_id.clone(),
                platform: msg.platform,
                auxiliary_tools: self.tool_servers(),
            },
        );
        let dispatch = Dispatch::Admitted {
            run_id: handle.run_id().to_string(),
            position: handle.position(),
        };

        let observer = Arc::clone(&self.observer);
        tokio::spawn(async move {
            match handle.await {
                Ok(_) | Err(RunError::Aborted) => {}
                Err(e) => {
                    tracing::warn!(session_key = %key, "run failed: {e}");
                    if let Err(send_err) = channel.send_message(&chat_id, RUN_FAILED_NOTICE).await {
                        observer.record_event(&ObserverEvent::Error {
                            component: format!("channel:{}", channel.name()),
                            message: send_err.to_string(),
                        });
                    }
                }
            }
        });

        dispatch
    }
}

/// Run the gateway: channel listeners plus the HTTP control plane, until Ctrl+C.
pub async fn run_gateway(host: &str, port: u16, config: Config) -> Result<()> {
    // ── Security: refuse public bind without explicit opt-in ──
    if is_public_bind(host) && !config.gateway.allow_public_bind {
        anyhow::bail!(
            "🛑 Refusing to bind to {host} — the control plane would be exposed.\n\
             Fix: use --host 127.0.0.1 (default), or set\n\
             [gateway] allow_public_bind = true in config.toml (NOT recommended)."
        );
    }

    let observer = observability::create_observer(&config.observability);
    let runner: Arc<dyn AgentRunner> =
        Arc::new(CliAgentRunner::from_config(&config.agent, &config.workspace_dir));
    let memory: Arc<dyn MemoryStore> = Arc::new(MarkdownMemory::new(&config.workspace_dir));
    let coordinator = Arc::new(GatewayCoordinator::new(
        &config,
        Arc::clone(&runner),
        memory,
        Arc::clone(&observer),
    )?);
    let auth = AuthGate::new(config.gateway.api_key.clone());

    let listener = TcpListener::bind(format!("{host}:{port}"))
        .await
        .with_context(|| format!("Failed to bind {host}:{port}"))?;
    let actual_port = listener.local_addr()?.port();

    // ── Channels ──────────────────────────────────────────────
    let (tx, mut rx) = mpsc::channel(INBOUND_BUFFER);
    let channels = channels::build_channels(&config);
    let mut listeners = Vec::with_capacity(channels.len());
    for channel in &channels {
        listeners.push(channels::spawn_supervised_listener(
            Arc::clone(channel),
            tx.clone(),
            Arc::clone(coordinator.health()),
            channels::INITIAL_LISTENER_BACKOFF,
            channels::MAX_LISTENER_BACKOFF,
        ));
    }
    drop(tx);

    let dispatcher = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            // Sequential so admission order matches arrival order per chat.
            while let Some((channel, msg)) = rx.recv().await {
                coordinator.handle_inbound(channel, msg).await;
            }
        })
    };

    println!("🦀 clawgate listening on http://{host}:{actual_port}");
    println!("  Agent:     {} ({})", config.agent.id, runner.name());
    println!("  Workspace: {}", config.workspace_dir.display());
    let names: Vec<&str> = channels.iter().map(|c| c.name()).collect();
    println!("  Channels:  {}", if names.is_empty() { "none".to_string() } else { names.join(", ") });
    if auth.is_enabled() {
        println!("  🔒 Control plane: bearer token required");
    } else {
        println!("  ⚠️  Control plane: auth DISABLED (set [gateway] api_key)");
    }
    println!("  Press Ctrl+C to stop.\n");

    let app = router(Arc::clone(&coordinator), auth).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
    );

    coordinator.health().mark_component_ok("gateway");
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    for handle in listeners {
        handle.abort();
    }
    dispatcher.abort();
    observer.flush();

    served.context("Control-plane server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
