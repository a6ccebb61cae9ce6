//! Conversation state machine.
//!
//! Owns the message log and drives one turn at a time:
//!
//! ```text
//! Idle --submit--> AwaitingReply --reply--> AwaitingSpeech --audio--> Idle
//!                                   \------(speech off / empty)-----> Idle
//! ```
//!
//! All operations take `&self`. The internal lock is never held across an
//! `.await`, so [`Conversation::clear`] and [`Conversation::toggle_speech`]
//! stay responsive while a turn waits on the network. A turn that is
//! overtaken by `clear` finishes as [`TurnOutcome::Discarded`] and never
//! writes into the reset log.

pub mod log;

pub use log::{CLEARED_GREETING, ConversationLog, DEFAULT_GREETING, Message, MessageIds, Sender};

use crate::audio::pcm::{self, AudioBuffer};
use crate::audio::playback::PlaybackController;
use crate::config::LuceroConfig;
use crate::error::{ChatError, Result};
use crate::remote::{ChatService, ChatSession, SpeechService};
use crate::store::KeyValueStore;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Reply shown when the chat service cannot be reached.
pub const FALLBACK_REPLY: &str = "Oops! Something went wrong on my end. I can't connect to my brain right now. \
Please try again in a moment.";

/// Where the current turn is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Ready for a new submission.
    Idle,
    /// Waiting on the chat service.
    AwaitingReply,
    /// Waiting on the speech service.
    AwaitingSpeech,
}

/// How a submitted turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The reply was appended to the log.
    Completed {
        /// The bot message appended for this turn.
        reply: Message,
        /// Whether the reply started playing.
        spoke: bool,
    },
    /// The conversation was cleared while the turn was in flight.
    Discarded,
}

/// Collaborators the conversation drives.
#[derive(Clone)]
pub struct ConversationDeps {
    /// Remote chat model.
    pub chat: Arc<dyn ChatService>,
    /// Remote speech model.
    pub speech: Arc<dyn SpeechService>,
    /// Audio playback.
    pub playback: Arc<PlaybackController>,
    /// Where the log is persisted.
    pub store: Arc<dyn KeyValueStore>,
}

/// Conversation tunables.
#[derive(Debug, Clone)]
pub struct ConversationSettings {
    /// Store key for the log.
    pub history_key: String,
    /// Declared sample rate of speech payloads.
    pub sample_rate: u32,
    /// Declared channel count of speech payloads.
    pub channels: u16,
    /// Whether replies are spoken initially.
    pub speech_enabled: bool,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self::from_config(&LuceroConfig::default())
    }
}

impl ConversationSettings {
    /// Settings taken from the application config.
    #[must_use]
    pub fn from_config(config: &LuceroConfig) -> Self {
        Self {
            history_key: config.storage.history_key.clone(),
            sample_rate: config.audio.sample_rate,
            channels: config.audio.channels,
            speech_enabled: config.tts.enabled,
        }
    }
}

struct Inner {
    log: ConversationLog,
    ids: MessageIds,
    state: TurnState,
    speech_enabled: bool,
    session: Option<ChatSession>,
    /// Bumped by every submit and every clear; a turn only touches the
    /// conversation while this still equals the value it started with.
    turn: u64,
}

impl Inner {
    fn append(&mut self, sender: Sender, text: String) -> Message {
        let message = Message {
            id: self.ids.next_id(),
            text,
            sender,
        };
        self.log.push(message.clone());
        message
    }
}

/// The conversation state machine.
pub struct Conversation {
    deps: ConversationDeps,
    settings: ConversationSettings,
    inner: Mutex<Inner>,
}

impl Conversation {
    /// Create a conversation, restoring the log from the store if present.
    #[must_use]
    pub fn new(deps: ConversationDeps, settings: ConversationSettings) -> Self {
        let log = ConversationLog::load(deps.store.as_ref(), &settings.history_key);
        info!(
            "conversation ready: {} messages, speech {}",
            log.len(),
            if settings.speech_enabled { "on" } else { "off" }
        );
        let inner = Inner {
            ids: MessageIds::after(&log),
            log,
            state: TurnState::Idle,
            speech_enabled: settings.speech_enabled,
            session: None,
            turn: 0,
        };
        Self {
            deps,
            settings,
            inner: Mutex::new(inner),
        }
    }

    /// Run one turn: append `text`, fetch and append the reply, then speak it.
    ///
    /// Service failures never surface here: a failed chat call appends
    /// [`FALLBACK_REPLY`] and a failed speech call just skips audio.
    ///
    /// # Errors
    ///
    /// [`ChatError::EmptyMessage`] for blank input, and
    /// [`ChatError::TurnInProgress`] when not [`TurnState::Idle`]. The log is
    /// unchanged and no service is called in either case.
    pub async fn submit(&self, text: &str) -> Result<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let (turn, mut session) = {
            let mut inner = self.lock();
            if inner.state != TurnState::Idle {
                debug!("rejecting submit while {:?}", inner.state);
                return Err(ChatError::TurnInProgress);
            }
            self.deps.playback.stop();
            inner.turn += 1;
            inner.state = TurnState::AwaitingReply;
            inner.append(Sender::User, text.to_owned());
            self.persist(&inner.log);
            let session = inner
                .session
                .take()
                .unwrap_or_else(|| self.deps.chat.open_session());
            (inner.turn, session)
        };
        let _guard = TurnGuard { conversation: self, turn };

        let reply_text = match self.deps.chat.send_turn(text, &mut session).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("error getting AI response: {e}");
                FALLBACK_REPLY.to_owned()
            }
        };

        let reply = {
            let mut inner = self.lock();
            if inner.turn != turn {
                debug!("turn {turn} overtaken by clear, dropping reply");
                return Ok(TurnOutcome::Discarded);
            }
            inner.session = Some(session);
            let reply = inner.append(Sender::Bot, reply_text);
            self.persist(&inner.log);

            if !inner.speech_enabled || reply.text.is_empty() {
                inner.state = TurnState::Idle;
                return Ok(TurnOutcome::Completed {
                    reply,
                    spoke: false,
                });
            }
            inner.state = TurnState::AwaitingSpeech;
            reply
        };

        let audio = match self.deps.speech.synthesize(&reply.text).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!("error generating speech: {e}");
                None
            }
        };

        let buffer = {
            let mut inner = self.lock();
            if inner.turn != turn {
                debug!("turn {turn} overtaken by clear, dropping speech");
                return Ok(TurnOutcome::Discarded);
            }
            let buffer = match audio {
                Some(_) if !inner.speech_enabled => {
                    debug!("speech switched off while synthesizing, dropping audio");
                    None
                }
                Some(base64) => self.decode_speech(&base64),
                None => None,
            };
            let Some(buffer) = buffer else {
                inner.state = TurnState::Idle;
                return Ok(TurnOutcome::Completed {
                    reply,
                    spoke: false,
                });
            };
            buffer
        };

        // Opening the output device can block, so it runs off the runtime
        // with the conversation unlocked.
        let playback = Arc::clone(&self.deps.playback);
        let session = match tokio::task::spawn_blocking(move || playback.play(buffer)).await {
            Ok(session) => session,
            Err(e) => {
                warn!("playback task failed: {e}");
                None
            }
        };

        // A clear or a switch to silence may have landed while the output
        // was starting; it could not stop a session that was not yet active.
        let mut inner = self.lock();
        let current = inner.turn == turn;
        let spoke = match session {
            Some(session) if !current || !inner.speech_enabled => {
                debug!("speech interrupted while starting, stopping {session}");
                self.deps.playback.stop_session(session);
                false
            }
            Some(_) => true,
            None => false,
        };
        if !current {
            return Ok(TurnOutcome::Discarded);
        }
        inner.state = TurnState::Idle;
        Ok(TurnOutcome::Completed { reply, spoke })
    }

    /// Reset to a single greeting and forget the chat session.
    ///
    /// Valid in any state. A turn still in flight is abandoned.
    pub fn clear(&self) {
        let mut inner = self.lock();
        self.deps.playback.stop();
        inner.session = None;
        inner.turn += 1;
        inner.state = TurnState::Idle;
        inner.log = ConversationLog::with_greeting(CLEARED_GREETING);
        inner.ids = MessageIds::after(&inner.log);
        self.persist(&inner.log);
        info!("conversation cleared");
    }

    /// Flip whether replies are spoken. Turning speech off stops playback.
    ///
    /// Returns the new setting.
    pub fn toggle_speech(&self) -> bool {
        let mut inner = self.lock();
        let enabled = !inner.speech_enabled;
        self.apply_speech_enabled(&mut inner, enabled);
        enabled
    }

    /// Set whether replies are spoken. Turning speech off stops playback.
    pub fn set_speech_enabled(&self, enabled: bool) {
        let mut inner = self.lock();
        self.apply_speech_enabled(&mut inner, enabled);
    }

    /// Whether replies are spoken.
    #[must_use]
    pub fn is_speech_enabled(&self) -> bool {
        self.lock().speech_enabled
    }

    /// Snapshot of the log, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.lock().log.messages().to_vec()
    }

    /// Current turn state.
    #[must_use]
    pub fn state(&self) -> TurnState {
        self.lock().state
    }

    /// Whether a turn is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state() != TurnState::Idle
    }

    /// The playback controller driven by this conversation.
    #[must_use]
    pub fn playback(&self) -> &PlaybackController {
        &self.deps.playback
    }

    fn apply_speech_enabled(&self, inner: &mut Inner, enabled: bool) {
        if inner.speech_enabled && !enabled {
            self.deps.playback.stop();
        }
        if inner.speech_enabled != enabled {
            info!("speech {}", if enabled { "enabled" } else { "disabled" });
        }
        inner.speech_enabled = enabled;
    }

    fn decode_speech(&self, base64: &str) -> Option<AudioBuffer> {
        match pcm::decode_pcm_base64(base64, self.settings.sample_rate, self.settings.channels) {
            Ok(buffer) if buffer.is_empty() => {
                debug!("speech payload holds no samples");
                None
            }
            Ok(buffer) => {
                debug!("decoded {:.1?} of speech", buffer.duration());
                Some(buffer)
            }
            Err(e) => {
                warn!("skipping speech: {e}");
                None
            }
        }
    }

    fn persist(&self, log: &ConversationLog) {
        let result = log
            .to_json()
            .map_err(|e| ChatError::Persistence(e.to_string()))
            .and_then(|json| self.deps.store.set(&self.settings.history_key, &json));
        if let Err(e) = result {
            warn!("failed to save messages: {e}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Returns the machine to `Idle` if a turn's future is dropped mid-flight.
struct TurnGuard<'a> {
    conversation: &'a Conversation,
    turn: u64,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.conversation.lock();
        if inner.turn == self.turn && inner.state != TurnState::Idle {
            warn!("turn {} abandoned, returning to idle", self.turn);
            inner.state = TurnState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::audio::pcm::AudioBuffer;
    use crate::audio::playback::{AudioOutput, CompletionCallback, OutputHandle, SessionId};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use base64::Engine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoChat {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ChatService for EchoChat {
        fn open_session(&self) -> ChatSession {
            ChatSession::new("test")
        }

        async fn send_turn(&self, user_text: &str, session: &mut ChatSession) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ChatError::Remote("offline".into()));
            }
            let reply = format!("echo {user_text} ({} before)", session.exchanges());
            session.record_exchange(user_text, &reply);
            Ok(reply)
        }
    }

    struct FixedSpeech(Option<String>);

    #[async_trait]
    impl SpeechService for FixedSpeech {
        async fn synthesize(&self, _text: &str) -> Result<Option<String>> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct CountingOutput {
        buffers: Mutex<Vec<(u32, u16, usize)>>,
    }

    struct SilentHandle;

    impl OutputHandle for SilentHandle {
        fn stop(&mut self) {}
    }

    impl AudioOutput for CountingOutput {
        fn start(
            &self,
            _session: SessionId,
            buffer: &AudioBuffer,
            _on_complete: CompletionCallback,
        ) -> Result<Box<dyn OutputHandle>> {
            self.buffers.lock().unwrap().push((
                buffer.sample_rate(),
                buffer.channel_count(),
                buffer.samples_per_channel(),
            ));
            Ok(Box::new(SilentHandle))
        }
    }

    fn pcm_payload(samples: usize) -> String {
        base64::engine::general_purpose::STANDARD.encode(vec![0x10u8; samples * 2])
    }

    fn conversation(
        fail_chat: bool,
        speech: Option<String>,
    ) -> (Conversation, Arc<CountingOutput>, Arc<MemoryStore>) {
        let output = Arc::new(CountingOutput::default());
        let store = Arc::new(MemoryStore::new());
        let deps = ConversationDeps {
            chat: Arc::new(EchoChat {
                calls: AtomicUsize::new(0),
                fail: fail_chat,
            }),
            speech: Arc::new(FixedSpeech(speech)),
            playback: Arc::new(PlaybackController::new(output.clone())),
            store: store.clone(),
        };
        (
            Conversation::new(deps, ConversationSettings::default()),
            output,
            store,
        )
    }

    #[tokio::test]
    async fn turn_appends_user_then_bot_and_speaks() {
        let (conv, output, _) = conversation(false, Some(pcm_payload(240)));
        let outcome = conv.submit("  What is 2+2?  ").await.unwrap();

        let TurnOutcome::Completed { reply, spoke } = outcome else {
            unreachable!("turn was not cleared");
        };
        assert!(spoke);
        assert_eq!(reply.text, "echo What is 2+2? (0 before)");

        let log = conv.messages();
        assert_eq!(log.len(), 3);
        assert_eq!(log[1].text, "What is 2+2?");
        assert_eq!(log[1].sender, Sender::User);
        assert_eq!(log[2], reply);
        assert!(log.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(*output.buffers.lock().unwrap(), vec![(24_000, 1, 240)]);
        assert_eq!(conv.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn session_carries_across_turns_and_resets_on_clear() {
        let (conv, _, _) = conversation(false, None);
        conv.submit("one").await.unwrap();
        let TurnOutcome::Completed { reply, .. } = conv.submit("two").await.unwrap() else {
            unreachable!();
        };
        assert_eq!(reply.text, "echo two (1 before)");

        conv.clear();
        let TurnOutcome::Completed { reply, .. } = conv.submit("three").await.unwrap() else {
            unreachable!();
        };
        assert_eq!(reply.text, "echo three (0 before)");
    }

    #[tokio::test]
    async fn chat_failure_appends_fallback_reply() {
        let (conv, output, _) = conversation(true, Some(pcm_payload(10)));
        let TurnOutcome::Completed { reply, spoke } = conv.submit("hi").await.unwrap() else {
            unreachable!();
        };
        assert_eq!(reply.text, FALLBACK_REPLY);
        assert!(spoke);
        assert_eq!(output.buffers.lock().unwrap().len(), 1);
        assert_eq!(conv.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn speech_disabled_skips_synthesis() {
        let (conv, output, _) = conversation(false, Some(pcm_payload(10)));
        assert!(!conv.toggle_speech());
        let TurnOutcome::Completed { spoke, .. } = conv.submit("hi").await.unwrap() else {
            unreachable!();
        };
        assert!(!spoke);
        assert!(output.buffers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_audio_is_skipped() {
        let (conv, output, _) = conversation(false, Some("%%% not base64 %%%".into()));
        let TurnOutcome::Completed { spoke, .. } = conv.submit("hi").await.unwrap() else {
            unreachable!();
        };
        assert!(!spoke);
        assert!(output.buffers.lock().unwrap().is_empty());
        assert_eq!(conv.messages().len(), 3);
    }

    #[tokio::test]
    async fn blank_submit_is_rejected() {
        let (conv, _, _) = conversation(false, None);
        assert!(matches!(conv.submit("   ").await, Err(ChatError::EmptyMessage)));
        assert_eq!(conv.messages().len(), 1);
    }

    #[tokio::test]
    async fn every_mutation_is_persisted() {
        let (conv, _, store) = conversation(false, None);
        conv.submit("hi").await.unwrap();

        let saved = store.get("chatMessages").unwrap().unwrap();
        let messages: Vec<Message> = serde_json::from_str(&saved).unwrap();
        assert_eq!(messages, conv.messages());

        conv.clear();
        let saved = store.get("chatMessages").unwrap().unwrap();
        let messages: Vec<Message> = serde_json::from_str(&saved).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, CLEARED_GREETING);
    }

    #[test]
    fn clear_is_idempotent() {
        let (conv, _, _) = conversation(false, None);
        conv.clear();
        let first = conv.messages();
        conv.clear();
        assert_eq!(conv.messages(), first);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].sender, Sender::Bot);
        assert_eq!(conv.state(), TurnState::Idle);
    }

    #[test]
    fn set_speech_enabled_is_idempotent() {
        let (conv, _, _) = conversation(false, None);
        conv.set_speech_enabled(true);
        assert!(conv.is_speech_enabled());
        conv.set_speech_enabled(false);
        conv.set_speech_enabled(false);
        assert!(!conv.is_speech_enabled());
    }
}
