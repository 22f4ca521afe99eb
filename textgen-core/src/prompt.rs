//! Prompt formatting for the text-completion endpoint.

use std::fmt;

pub const HUMAN_PROMPT: &str = "\n\nHuman:";
pub const AI_PROMPT: &str = "\n\nAssistant:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    System,
    Human,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: Sender,
    pub content: String,
}

impl Message {
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self { sender, content: content.into() }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sender {
            // system text goes in verbatim, ahead of the first turn
            Sender::System => f.write_str(&self.content),
            Sender::Human => write!(f, "{HUMAN_PROMPT} {}", self.content),
            Sender::Assistant => write!(f, "{AI_PROMPT} {}", self.content),
        }
    }
}

pub fn prompt_from_messages(messages: &[Message]) -> String {
    messages.iter().map(|m| m.to_string()).collect()
}

/// Single-turn prompt ending on the assistant marker.
pub fn prompt_from_string(question: &str) -> String {
    format!("{HUMAN_PROMPT} {question}{AI_PROMPT}")
}

pub fn prompt_with_system(system: &str, question: &str) -> String {
    format!("{system}{}", prompt_from_string(question))
}
