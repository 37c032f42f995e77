//! Discord channel — message sending via the Bot REST API.

use async_trait::async_trait;
use craftwatch_core::config::DiscordConfig;
use craftwatch_core::{ChannelId, CraftError, Notifier, Result};

/// Max message length Discord accepts.
const MAX_CONTENT_LEN: usize = 2000;

/// Sends plain-text messages to Discord channels as a bot user.
pub struct DiscordNotifier {
    config: DiscordConfig,
    client: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new(config: DiscordConfig) -> Result<Self> {
        if config.bot_token.trim().is_empty() {
            return Err(CraftError::Config("discord.bot_token is empty".into()));
        }
        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }

    fn messages_url(&self, channel: ChannelId) -> String {
        format!(
            "{}/channels/{}/messages",
            self.config.api_base.trim_end_matches('/'),
            channel
        )
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, channel: ChannelId, text: &str) -> Result<()> {
        let response = self
            .client
            .post(self.messages_url(channel))
            .header("Authorization", format!("Bot {}", self.config.bot_token))
            .json(&message_body(text))
            .send()
            .await
            .map_err(|e| CraftError::Notify(format!("Discord send failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!("✅ Discord message sent to channel {channel}");
            return Ok(());
        }
        // Unknown channel, or one the bot can no longer see.
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::FORBIDDEN {
            return Err(CraftError::UnknownChannel(channel));
        }
        let body = response.text().await.unwrap_or_default();
        Err(CraftError::Notify(format!("Discord API error {status}: {body}")))
    }
}

/// JSON payload for a channel message. Mentions in the text ping users only.
fn message_body(text: &str) -> serde_json::Value {
    let content: String = text.chars().take(MAX_CONTENT_LEN).collect();
    serde_json::json!({
        "content": content,
        "allowed_mentions": { "parse": ["users"] },
    })
}
