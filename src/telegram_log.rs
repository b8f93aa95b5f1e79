//! Mirrors log events into an admin Telegram chat.
//!
//! WARN and ERROR go out immediately. INFO lines are batched and flushed
//! every few seconds, or sooner when the batch fills up.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BATCH: usize = 50;
/// Telegram rejects messages over 4096 chars.
const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, PartialEq, Eq)]
enum LogLine {
    Urgent(String),
    Batched(String),
}

fn classify(level: Level, message: String) -> Option<LogLine> {
    match level {
        Level::ERROR => Some(LogLine::Urgent(format!("❌ {}", message))),
        Level::WARN => Some(LogLine::Urgent(format!("⚠️ {}", message))),
        Level::INFO => Some(LogLine::Batched(message)),
        _ => None,
    }
}

fn truncate_for_telegram(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let truncated: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
    format!("{}...", truncated)
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogLine>,
}

impl TelegramLogLayer {
    /// Must be called inside a Tokio runtime; the forwarder runs as a task.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward(bot, chat_id, rx));
        Self { tx }
    }
}

async fn forward(bot: Bot, chat_id: ChatId, mut rx: mpsc::UnboundedReceiver<LogLine>) {
    let mut batch: Vec<String> = Vec::new();
    let mut interval = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(LogLine::Urgent(text)) => send(&bot, chat_id, &text).await,
                Some(LogLine::Batched(text)) => {
                    batch.push(text);
                    if batch.len() >= MAX_BATCH {
                        flush(&bot, chat_id, &mut batch).await;
                    }
                }
                None => {
                    flush(&bot, chat_id, &mut batch).await;
                    break;
                }
            },
            _ = interval.tick() => flush(&bot, chat_id, &mut batch).await,
        }
    }
}

async fn flush(bot: &Bot, chat_id: ChatId, batch: &mut Vec<String>) {
    if batch.is_empty() {
        return;
    }
    let combined = batch.join("\n");
    batch.clear();
    send(bot, chat_id, &combined).await;
}

async fn send(bot: &Bot, chat_id: ChatId, text: &str) {
    // Not through tracing: this layer would receive its own failures
    if let Err(e) = bot.send_message(chat_id, truncate_for_telegram(text)).await {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if let Some(line) = classify(*event.metadata().level(), visitor.message)
            && self.tx.send(line).is_err()
        {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
