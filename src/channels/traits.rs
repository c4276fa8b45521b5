use async_trait::async_trait;

/// Image attached to an inbound message.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// A message received from a platform.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Channel name that produced the message (e.g. `"telegram"`).
    pub platform: String,
    pub chat_id: String,
    pub text: String,
    pub is_group: bool,
    pub sender: String,
    /// Handles mentioned in the message, without the leading `@`.
    pub mentions: Vec<String>,
    pub image: Option<ImagePayload>,
    /// Platform payload, kept for adapters and debugging.
    pub raw: serde_json::Value,
}

impl InboundMessage {
    /// Plain-text direct message with no platform payload.
    pub fn direct(platform: &str, chat_id: &str, sender: &str, text: &str) -> Self {
        Self {
            platform: platform.to_string(),
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            is_group: false,
            sender: sender.to_string(),
            mentions: Vec::new(),
            image: None,
            raw: serde_json::Value::Null,
        }
    }
}

/// A messaging platform the gateway can listen on and reply through.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name
    fn name(&self) -> &str;

    /// Send a text message to a chat.
    async fn send_message(&self, chat_id: &str, text: &str) -> anyhow::Result<()>;

    /// Start listening for incoming messages (long-running)
    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundMessage>) -> anyhow::Result<()>;

    /// Allow-list predicate applied before any processing.
    fn is_allowed(&self, _message: &InboundMessage) -> bool {
        true
    }

    /// Check if channel is healthy
    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyChannel;

    #[async_trait]
    impl Channel for DummyChannel {
        fn name(&self) -> &str {
            "dummy"
        }

        async fn send_message(&self, _chat_id: &str, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn listen(
            &self,
            tx: tokio::sync::mpsc::Sender<InboundMessage>,
        ) -> anyhow::Result<()> {
            tx.send(InboundMessage::direct("dummy", "chat-1", "tester", "hello"))
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))
        }
    }

    #[tokio::test]
    async fn default_trait_methods_return_success() {
        let channel = DummyChannel;
        assert!(channel.health_check().await);
        assert!(channel.is_allowed(&InboundMessage::direct("dummy", "c", "s", "t")));
        assert!(channel.send_message("bob", "hello").await.is_ok());
    }

    #[tokio::test]
    async fn listen_sends_message_to_channel() {
        let channel = DummyChannel;
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);

        channel.listen(tx).await.unwrap();

        let received = rx.recv().await.expect("message should be sent");
        assert_eq!(received.sender, "tester");
        assert_eq!(received.text, "hello");
        assert_eq!(received.platform, "dummy");
        assert!(!received.is_group);
    }

    #[test]
    fn image_debug_hides_bytes() {
        let image = ImagePayload {
            mime_type: "image/png".into(),
            data: vec![0; 2048],
        };
        let rendered = format!("{image:?}");
        assert!(rendered.contains("2048"));
        assert!(rendered.len() < 80);
    }
}
