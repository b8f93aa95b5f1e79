//! Telegram client using teloxide.

use std::future::Future;

use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId, ReplyParameters};
use tracing::{info, warn};

/// Chat and message every reply for a job refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyTarget {
    pub chat_id: i64,
    pub message_id: i64,
}

/// Outbound chat operations the workflow needs.
pub trait Replier: Send + Sync {
    fn send_text(
        &self,
        target: ReplyTarget,
        text: &str,
    ) -> impl Future<Output = Result<i64, String>> + Send;

    /// Send a video the service hosts; Telegram fetches it from `url`.
    fn send_video(
        &self,
        target: ReplyTarget,
        url: &str,
        caption: &str,
    ) -> impl Future<Output = Result<i64, String>> + Send;
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

impl Replier for TelegramClient {
    async fn send_text(&self, target: ReplyTarget, text: &str) -> Result<i64, String> {
        let reply_params = ReplyParameters::new(MessageId(target.message_id as i32)).allow_sending_without_reply();

        self.bot
            .send_message(ChatId(target.chat_id), text)
            .reply_parameters(reply_params)
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                msg
            })
    }

    async fn send_video(&self, target: ReplyTarget, url: &str, caption: &str) -> Result<i64, String> {
        info!("📹 Sending video to chat {}: {}", target.chat_id, url);

        let url = reqwest::Url::parse(url).map_err(|e| format!("Invalid video URL '{url}': {e}"))?;
        let reply_params = ReplyParameters::new(MessageId(target.message_id as i32)).allow_sending_without_reply();

        self.bot
            .send_video(ChatId(target.chat_id), InputFile::url(url))
            .caption(caption)
            .reply_parameters(reply_params)
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| {
                let msg = format!("Failed to send video: {e}");
                warn!("{}", msg);
                msg
            })
    }
}
