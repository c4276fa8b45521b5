use super::access::AccessPolicy;
use super::traits::{Channel, ImagePayload, InboundMessage};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;

/// Bot API hard limit on message length, in characters.
const MAX_MESSAGE_CHARS: usize = 4096;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram channel. Long-polls the Bot API for updates.
pub struct TelegramChannel {
    bot_token: String,
    api_base: String,
    access: AccessPolicy,
    client: reqwest::Client,
}

/// An update reduced to what the gateway needs, before any photo download.
#[derive(Debug)]
struct ParsedUpdate {
    message: InboundMessage,
    photo_file_id: Option<String>,
}

impl TelegramChannel {
    pub fn new(bot_token: String, access: AccessPolicy) -> Self {
        Self {
            bot_token,
            api_base: DEFAULT_API_BASE.into(),
            access,
            client: reqwest::Client::new(),
        }
    }

    /// Point the channel at a different Bot API server (self-hosted or test).
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{file_path}", self.api_base, self.bot_token)
    }

    async fn download_photo(&self, file_id: &str) -> anyhow::Result<ImagePayload> {
        let meta: Value = self
            .client
            .post(self.api_url("getFile"))
            .json(&serde_json::json!({ "file_id": file_id }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let file_path = meta
            .pointer("/result/file_path")
            .and_then(Value::as_str)
            .context("getFile response missing file_path")?;
        let data = self
            .client
            .get(self.file_url(file_path))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(ImagePayload {
            mime_type: "image/jpeg".into(),
            data: data.to_vec(),
        })
    }
}

/// Mentioned handles from `mention` entities. Offsets are UTF-16 code units.
fn extract_mentions(text: &str, entities: Option<&Value>) -> Vec<String> {
    let Some(entities) = entities.and_then(Value::as_array) else {
        return Vec::new();
    };
    let utf16: Vec<u16> = text.encode_utf16().collect();
    entities
        .iter()
        .filter(|e| e.get("type").and_then(Value::as_str) == Some("mention"))
        .filter_map(|e| {
            let offset = usize::try_from(e.get("offset")?.as_u64()?).ok()?;
            let length = usize::try_from(e.get("length")?.as_u64()?).ok()?;
            let slice = utf16.get(offset..offset.checked_add(length)?)?;
            let handle = String::from_utf16_lossy(slice);
            Some(handle.trim_start_matches('@').to_string())
        })
        .collect()
}

fn parse_update(update: &Value) -> Option<ParsedUpdate> {
    let message = update.get("message")?;
    let photo_file_id = message
        .get("photo")
        .and_then(Value::as_array)
        .and_then(|sizes| sizes.last())
        .and_then(|largest| largest.get("file_id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let (text, entities) = match message.get("text").and_then(Value::as_str) {
        Some(text) => (text, message.get("entities")),
        None => (
            message
                .get("caption")
                .and_then(Value::as_str)
                .unwrap_or_default(),
            message.get("caption_entities"),
        ),
    };
    if text.trim().is_empty() && photo_file_id.is_none() {
        return None;
    }

    let chat = message.get("chat")?;
    let chat_id = chat.get("id").and_then(Value::as_i64)?.to_string();
    let is_group = matches!(
        chat.get("type").and_then(Value::as_str),
        Some("group" | "supergroup")
    );

    let from = message.get("from");
    let sender = from
        .and_then(|f| f.get("username"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            from.and_then(|f| f.get("id"))
                .and_then(Value::as_i64)
                .map(|id| id.to_string())
        })
        .unwrap_or_else(|| "unknown".into());

    Some(ParsedUpdate {
        message: InboundMessage {
            platform: "telegram".into(),
            chat_id,
            text: text.to_string(),
            is_group,
            sender,
            mentions: extract_mentions(text, entities),
            image: None,
            raw: update.clone(),
        },
        photo_file_id,
    })
}

/// Split on character boundaries into chunks the Bot API accepts.
fn split_message(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(MAX_MESSAGE_CHARS)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> anyhow::Result<()> {
        for chunk in split_message(text) {
            let body = serde_json::json!({
                "chat_id": chat_id,
                "text": chunk,
            });
            self.client
                .post(self.api_url("sendMessage"))
                .json(&body)
                .send()
                .await?
                .error_for_status()
                .context("Telegram sendMessage failed")?;
        }
        Ok(())
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundMessage>) -> anyhow::Result<()> {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for messages...");

        loop {
            let url = self.api_url("getUpdates");
            let body = serde_json::json!({
                "offset": offset,
                "timeout": 30,
                "allowed_updates": ["message"]
            });

            let resp = match self.client.post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Telegram poll error: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
                anyhow::bail!("Telegram rejected the bot token");
            }

            let data: Value = match resp.json().await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("Telegram parse error: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            let Some(results) = data.get("result").and_then(Value::as_array) else {
                continue;
            };
            for update in results {
                // Advance offset past this update
                if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                    offset = uid + 1;
                }

                let Some(parsed) = parse_update(update) else {
                    continue;
                };
                let mut msg = parsed.message;

                if let Some(file_id) = parsed.photo_file_id {
                    match self.download_photo(&file_id).await {
                        Ok(image) => msg.image = Some(image),
                        Err(e) => tracing::warn!("Telegram photo download failed: {e}"),
                    }
                    if msg.image.is_none() && msg.text.trim().is_empty() {
                        continue;
                    }
                }

                if tx.send(msg).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    fn is_allowed(&self, message: &InboundMessage) -> bool {
        self.access.allows(message)
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
