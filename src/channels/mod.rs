//! Platform adapters and their supervision.

pub mod access;
pub mod cli;
pub mod telegram;
pub mod traits;

pub use access::AccessPolicy;
pub use cli::CliChannel;
pub use telegram::TelegramChannel;
pub use traits::{Channel, ImagePayload, InboundMessage};

use crate::config::Config;
use crate::health::HealthRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const INITIAL_LISTENER_BACKOFF: Duration = Duration::from_secs(2);
pub const MAX_LISTENER_BACKOFF: Duration = Duration::from_secs(60);

/// Build every channel enabled in config.
pub fn build_channels(config: &Config) -> Vec<Arc<dyn Channel>> {
    let mut channels: Vec<Arc<dyn Channel>> = Vec::new();
    if config.channels_config.cli {
        channels.push(Arc::new(CliChannel::new()));
    }
    if let Some(tg) = &config.channels_config.telegram {
        let mut telegram = TelegramChannel::new(tg.bot_token.clone(), tg.access.clone());
        if let Some(base) = &tg.api_base {
            telegram = telegram.with_api_base(base.clone());
        }
        channels.push(Arc::new(telegram));
    }
    channels
}

/// Run a channel listener forever, restarting it with exponential backoff
/// whenever it fails. A listener that returns `Ok` is treated as finished.
pub fn spawn_supervised_listener(
    channel: Arc<dyn Channel>,
    tx: mpsc::Sender<(Arc<dyn Channel>, InboundMessage)>,
    health: Arc<HealthRegistry>,
    initial_backoff: Duration,
    max_backoff: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let component = format!("channel:{}", channel.name());
        let mut backoff = initial_backoff;
        let max_backoff = max_backoff.max(initial_backoff);

        loop {
            health.mark_component_ok(&component);

            let (inner_tx, mut inner_rx) = mpsc::channel::<InboundMessage>(64);
            let forward_channel = Arc::clone(&channel);
            let forward_tx = tx.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(msg) = inner_rx.recv().await {
                    if forward_tx
                        .send((Arc::clone(&forward_channel), msg))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });

            let result = channel.listen(inner_tx).await;
            let _ = forwarder.await;

            match result {
                Ok(()) => {
                    tracing::info!("Channel '{}' listener finished", channel.name());
                    health.mark_component_error(&component, "listener finished");
                    return;
                }
                Err(e) => {
                    health.mark_component_error(&component, e.to_string());
                    tracing::error!(
                        "Channel '{}' listener failed: {e}; restarting in {}s",
                        channel.name(),
                        backoff.as_secs_f32()
                    );
                }
            }

            if tx.is_closed() {
                return;
            }
            health.bump_component_restart(&component);
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2).min(max_backoff);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelegramConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyChannel {
        attempts: AtomicUsize,
        fail_times: usize,
    }

    #[async_trait]
    impl Channel for FlakyChannel {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn send_message(&self, _chat_id: &str, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn listen(&self, tx: mpsc::Sender<InboundMessage>) -> anyhow::Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_times {
                anyhow::bail!("connection dropped");
            }
            tx.send(InboundMessage::direct("flaky", "c1", "u1", "after restart"))
                .await
                .ok();
            Ok(())
        }
    }

    #[tokio::test]
    async fn listener_restarts_after_failure_and_records_health() {
        let channel = Arc::new(FlakyChannel {
            attempts: AtomicUsize::new(0),
            fail_times: 2,
        });
        let health = Arc::new(HealthRegistry::new());
        let (tx, mut rx) = mpsc::channel(8);

        let handle = spawn_supervised_listener(
            channel.clone(),
            tx,
            Arc::clone(&health),
            Duration::from_millis(1),
            Duration::from_millis(4),
        );

        let (from, msg) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from.name(), "flaky");
        assert_eq!(msg.text, "after restart");
        handle.await.unwrap();

        assert_eq!(channel.attempts.load(Ordering::SeqCst), 3);
        let snapshot = health.snapshot();
        assert_eq!(snapshot.components["channel:flaky"].restart_count, 2);
    }

    #[test]
    fn build_channels_follows_config() {
        let mut config = Config::default();
        config.channels_config.cli = false;
        assert!(build_channels(&config).is_empty());

        config.channels_config.cli = true;
        config.channels_config.telegram = Some(TelegramConfig {
            bot_token: "t".into(),
            api_base: Some("http://127.0.0.1:8081".into()),
            access: AccessPolicy::default(),
        });
        let names: Vec<String> = build_channels(&config)
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, vec!["cli", "telegram"]);
    }
}
