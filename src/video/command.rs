//! Bot commands.

use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
pub enum Command {
    #[command(description = "show the welcome message.")]
    Start,
    #[command(description = "show this text.")]
    Help,
    #[command(description = "generate a video from a prompt.")]
    Generate(String),
}

pub const WELCOME_TEXT: &str = "Welcome! Use /generate followed by your prompt to create a video.";

/// The prompt from a `/generate` argument, or `None` when it is blank.
pub fn prompt_of(argument: &str) -> Option<String> {
    let prompt = argument.trim();
    if prompt.is_empty() {
        None
    } else {
        Some(prompt.to_string())
    }
}
