//! Lucero: a terminal chat client that can speak its replies.
//!
//! Each turn sends the user's text to a remote chat model, appends the reply
//! to a persisted conversation log and, when speech is enabled, asks a remote
//! speech model for raw PCM which is decoded and played on the speakers.
//!
//! # Architecture
//!
//! - **Conversation**: the turn state machine owning the message log
//! - **Remote**: chat and speech services (Gemini over `reqwest`)
//! - **Audio**: PCM decoding, single-session playback, `cpal` output
//! - **Store**: string-keyed persistence for the log

pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod paths;
pub mod remote;
pub mod store;

pub use config::LuceroConfig;
pub use conversation::{
    Conversation, ConversationDeps, ConversationSettings, Message, Sender, TurnOutcome, TurnState,
};
pub use error::{ChatError, Result};
