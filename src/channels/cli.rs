use super::traits::{Channel, InboundMessage};
use async_trait::async_trait;
use tokio::io::{self, AsyncBufReadExt, BufReader};

/// Chat id used for the single local conversation.
pub const CLI_CHAT_ID: &str = "local";

/// Local stdin/stdout channel. Always available.
pub struct CliChannel;

impl CliChannel {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn line_to_message(line: &str) -> Option<InboundMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(InboundMessage::direct("cli", CLI_CHAT_ID, "user", line))
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn send_message(&self, _chat_id: &str, text: &str) -> anyhow::Result<()> {
        println!("{text}");
        Ok(())
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundMessage>) -> anyhow::Result<()> {
        let stdin = io::stdin();
        let reader = BufReader::new(stdin);
        let mut lines = reader.lines();

        while let Ok(Some(line)) = lines.next_line().await {
            if matches!(line.trim(), "/quit" | "/exit") {
                break;
            }
            let Some(msg) = line_to_message(&line) else {
                continue;
            };
            if tx.send(msg).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}
