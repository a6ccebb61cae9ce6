//! Remote chat and speech services.
//!
//! The conversation only sees the two traits here. [`ChatSession`] is the
//! conversational memory of the chat model; it is owned by the caller, so
//! dropping it is the only way to make the model forget earlier turns.

pub mod gemini;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use gemini::{GeminiChat, GeminiSpeech};

/// Who authored a turn in a [`ChatSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// The human.
    User,
    /// The chat model.
    Model,
}

/// One exchanged utterance kept in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTurn {
    /// Author of the utterance.
    pub role: TurnRole,
    /// Utterance text.
    pub text: String,
}

/// Conversational memory for one chat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSession {
    system_instruction: String,
    turns: Vec<SessionTurn>,
}

impl ChatSession {
    /// Start an empty session with the given system instruction.
    pub fn new(system_instruction: impl Into<String>) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            turns: Vec::new(),
        }
    }

    /// The system instruction sent with every request.
    #[must_use]
    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    /// Completed turns, oldest first.
    #[must_use]
    pub fn turns(&self) -> &[SessionTurn] {
        &self.turns
    }

    /// Record a completed exchange.
    pub fn record_exchange(&mut self, user_text: &str, reply: &str) {
        self.turns.push(SessionTurn {
            role: TurnRole::User,
            text: user_text.to_owned(),
        });
        self.turns.push(SessionTurn {
            role: TurnRole::Model,
            text: reply.to_owned(),
        });
    }

    /// Number of completed exchanges.
    #[must_use]
    pub fn exchanges(&self) -> usize {
        self.turns.len() / 2
    }
}

/// A remote conversational model.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Create a fresh session context.
    fn open_session(&self) -> ChatSession;

    /// Send `user_text` within `session` and return the reply text.
    ///
    /// On success the exchange is recorded in `session`; on failure the
    /// session is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns a remote call error if the request fails or carries no reply.
    async fn send_turn(&self, user_text: &str, session: &mut ChatSession) -> Result<String>;
}

/// A remote text-to-speech model.
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Synthesize `text` into base64-encoded raw PCM.
    ///
    /// `Ok(None)` means the service produced no audio, which is not an error.
    ///
    /// # Errors
    ///
    /// Returns a remote call error if the request fails.
    async fn synthesize(&self, text: &str) -> Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_exchange_appends_user_then_model() {
        let mut session = ChatSession::new("be brief");
        session.record_exchange("hi", "hello");
        session.record_exchange("2+2?", "4");

        assert_eq!(session.exchanges(), 2);
        let roles: Vec<TurnRole> = session.turns().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![TurnRole::User, TurnRole::Model, TurnRole::User, TurnRole::Model]
        );
        assert_eq!(session.turns()[3].text, "4");
        assert_eq!(session.system_instruction(), "be brief");
    }
}
