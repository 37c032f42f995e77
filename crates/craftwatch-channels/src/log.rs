//! Log-only notifier — dry runs and operator diagnostics.

use async_trait::async_trait;
use craftwatch_core::{ChannelId, Notifier, Result};

/// Writes each message to the log instead of a chat channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, channel: ChannelId, text: &str) -> Result<()> {
        tracing::info!("📢 [channel {channel}] {text}");
        Ok(())
    }
}
