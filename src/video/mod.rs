//! Video module - turns `/generate` prompts into Hailuo videos.

pub mod admission;
pub mod client;
pub mod command;
pub mod telegram;
pub mod workflow;


pub use admission::AdmissionGate;
pub use client::UseApiClient;
pub use command::Command;
pub use telegram::{ReplyTarget, TelegramClient};
pub use workflow::{GenerateRequest, GenerationWorkflow};
