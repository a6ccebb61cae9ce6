//! Chat messages and the ordered conversation log.

use crate::store::KeyValueStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Greeting seeded into a brand new conversation.
pub const DEFAULT_GREETING: &str = "Hello! I'm an AI-powered chatbot. I can now speak my responses! \
Ask me anything, and use /voice to toggle my voice.";

/// Sole message left after the log is cleared.
pub const CLEARED_GREETING: &str =
    "Chat cleared! Let's start a fresh conversation. What can I help you with?";

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// Typed by the human.
    User,
    /// Produced by the chat model (or the client on its behalf).
    Bot,
}

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique, strictly increasing within a conversation.
    pub id: i64,
    /// Message text.
    pub text: String,
    /// Who wrote it.
    pub sender: Sender,
}

impl Message {
    /// Whether the user wrote this message.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.sender == Sender::User
    }
}

/// Chronologically ordered messages. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationLog {
    messages: Vec<Message>,
}

impl ConversationLog {
    /// A log holding one bot message with id 1.
    pub fn with_greeting(text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message {
                id: 1,
                text: text.into(),
                sender: Sender::Bot,
            }],
        }
    }

    /// Load the log saved under `key`.
    ///
    /// Missing, unreadable, malformed, or empty data falls back to the
    /// default greeting.
    pub fn load(store: &dyn KeyValueStore, key: &str) -> Self {
        match store.get(key) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Message>>(&raw) {
                Ok(messages) if !messages.is_empty() => {
                    debug!("loaded {} messages from '{key}'", messages.len());
                    return Self { messages };
                }
                Ok(_) => debug!("saved log under '{key}' is empty"),
                Err(e) => warn!("failed to parse saved messages: {e}"),
            },
            Ok(None) => debug!("no saved log under '{key}'"),
            Err(e) => warn!("failed to load messages: {e}"),
        }
        Self::with_greeting(DEFAULT_GREETING)
    }

    /// Serialize the log as a JSON array of messages.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.messages)
    }

    /// All messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages (always at least one).
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Always `false`; present for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Largest id in the log.
    #[must_use]
    pub fn max_id(&self) -> i64 {
        self.messages.iter().map(|m| m.id).max().unwrap_or(0)
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}

/// Mints message ids from the wall clock in milliseconds, bumped past the
/// previous id so that two messages minted in the same millisecond never
/// collide.
#[derive(Debug, Clone)]
pub struct MessageIds {
    last: i64,
}

impl MessageIds {
    /// Continue after the largest id already in `log`.
    #[must_use]
    pub fn after(log: &ConversationLog) -> Self {
        Self { last: log.max_id() }
    }

    /// Next id.
    pub fn next_id(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis();
        self.last = now.max(self.last.saturating_add(1));
        self.last
    }
}
