//! Agent runner backed by an external command.
//!
//! The command is spawned once per run with the workspace as its working
//! directory. The message goes to stdin; stdout lines that parse as
//! [`AgentEvent`] JSON are forwarded as-is and every other line is treated as
//! reply text.

use anyhow::Context;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use futures_util::StreamExt;

use super::traits::{AgentEvent, AgentRunner, AgentStream, RunRequest};
use crate::channels::ImagePayload;
use crate::config::AgentConfig;

const STDERR_TAIL_LINES: usize = 20;
const EVENT_BUFFER: usize = 64;

pub struct CliAgentRunner {
    command: String,
    args: Vec<String>,
    workspace: PathBuf,
    /// Where inbound images are written for the child to read.
    image_dir: PathBuf,
}

impl CliAgentRunner {
    pub fn new(command: impl Into<String>, args: Vec<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args,
            workspace: workspace.into(),
            image_dir: std::env::temp_dir(),
        }
    }

    #[must_use]
    pub fn with_image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_dir = dir.into();
        self
    }

    pub fn from_config(config: &AgentConfig, workspace: &Path) -> Self {
        Self::new(config.command.clone(), config.args.clone(), workspace)
    }

    fn build_command(&self, request: &RunRequest, image_path: Option<&Path>) -> anyhow::Result<Command> {
        let tool_servers = serde_json::to_string(&request.auxiliary_tools)
            .context("failed to serialize tool servers")?;
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(&self.workspace)
            .env("CLAWGATE_SESSION_KEY", request.session_key.as_str())
            .env("CLAWGATE_PLATFORM", &request.platform)
            .env("CLAWGATE_CHAT_ID", &request.chat_id)
            .env("CLAWGATE_WORKSPACE", &self.workspace)
            .env("CLAWGATE_TOOL_SERVERS", tool_servers)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = image_path {
            cmd.env("CLAWGATE_IMAGE_PATH", path);
        }
        Ok(cmd)
    }
}

/// Parse one stdout line. Blank lines yield nothing.
fn parse_line(line: &str) -> Option<AgentEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') {
        if let Ok(event) = serde_json::from_str::<AgentEvent>(trimmed) {
            return Some(event);
        }
    }
    Some(AgentEvent::Text(format!("{line}\n")))
}

fn image_extension(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

async fn stage_image(dir: &Path, image: &ImagePayload) -> anyhow::Result<PathBuf> {
    let path = dir.join(format!(
        "clawgate-{}.{}",
        uuid::Uuid::new_v4(),
        image_extension(&image.mime_type)
    ));
    tokio::fs::write(&path, &image.data)
        .await
        .with_context(|| format!("failed to stage image at {}", path.display()))?;
    Ok(path)
}

async fn remove_staged_image(path: Option<&Path>) {
    if let Some(path) = path {
        let _ = tokio::fs::remove_file(path).await;
    }
}

#[async_trait]
impl AgentRunner for CliAgentRunner {
    fn name(&self) -> &str {
        "cli"
    }

    async fn run(&self, request: RunRequest) -> anyhow::Result<AgentStream> {
        let image_path = match &request.image {
            Some(image) => Some(stage_image(&self.image_dir, image).await?),
            None => None,
        };

        let spawned = self
            .build_command(&request, image_path.as_deref())
            .and_then(|mut cmd| {
                cmd.spawn()
                    .with_context(|| format!("failed to spawn agent command '{}'", self.command))
            });
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                remove_staged_image(image_path.as_deref()).await;
                return Err(e);
            }
        };

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("agent command missing stdin pipe"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("agent command missing stdout pipe"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("agent command missing stderr pipe"))?;

        let message = request.message.clone();
        tokio::spawn(async move {
            // A child that never reads stdin must not fail the run.
            let _ = stdin.write_all(message.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = request.cancel.clone();
        let session_key = request.session_key.clone();

        tokio::spawn(async move {
            let mut out_lines = BufReader::new(stdout).lines();
            let mut saw_done = false;
            let mut saw_error = false;
            let mut receiver_gone = tx.send(AgentEvent::Start).await.is_err();

            while !receiver_gone {
                let line = tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::debug!(session_key = %session_key, "agent run cancelled, killing child");
                        let _ = child.kill().await;
                        remove_staged_image(image_path.as_deref()).await;
                        return;
                    }
                    line = out_lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => {
                        let Some(event) = parse_line(&line) else {
                            continue;
                        };
                        match &event {
                            AgentEvent::Start => continue,
                            AgentEvent::Done => saw_done = true,
                            AgentEvent::Error(_) => saw_error = true,
                            _ => {}
                        }
                        receiver_gone = tx.send(event).await.is_err();
                        if saw_done || saw_error {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx
                            .send(AgentEvent::Error(format!("failed to read agent output: {e}")))
                            .await;
                        saw_error = true;
                        break;
                    }
                }
            }

            // The run is over once a terminal event was forwarded or nobody
            // listens anymore. Whatever the child still writes goes nowhere.
            if saw_done || saw_error || receiver_gone {
                drop(out_lines);
                let _ = child.kill().await;
                stderr_task.abort();
                remove_staged_image(image_path.as_deref()).await;
                return;
            }

            let status = tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(session_key = %session_key, "agent run cancelled after output closed");
                    let _ = child.kill().await;
                    stderr_task.abort();
                    remove_staged_image(image_path.as_deref()).await;
                    return;
                }
                status = child.wait() => status,
            };
            let stderr_tail = stderr_task.await.unwrap_or_default();
            remove_staged_image(image_path.as_deref()).await;
            match status {
                Ok(status) if status.success() => {
                    let _ = tx.send(AgentEvent::Done).await;
                }
                Ok(status) => {
                    let detail = if stderr_tail.trim().is_empty() {
                        String::new()
                    } else {
                        format!(": {}", stderr_tail.trim())
                    };
                    let _ = tx
                        .send(AgentEvent::Error(format!("agent exited with {status}{detail}")))
                        .await;
                }
                Err(e) => {
                    let _ = tx
                        .send(AgentEvent::Error(format!("failed to wait for agent: {e}")))
                        .await;
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}
