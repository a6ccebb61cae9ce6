//! Single-session audio playback with preemption.
//!
//! [`PlaybackController`] owns the one active playback session. Starting a
//! new utterance always stops the previous one first; there is no queue and
//! no crossfade. The platform side sits behind [`AudioOutput`] so the
//! controller can be driven by cpal in the binary and by fakes in tests.

use crate::audio::pcm::AudioBuffer;
use crate::error::Result;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info};

/// Identity of one playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

#[cfg(test)]
impl From<u64> for SessionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Invoked once by the output when a session has played all of its samples.
///
/// Never invoked for a session that was stopped.
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Platform audio output.
pub trait AudioOutput: Send + Sync {
    /// Begin playing `buffer` as `session`.
    ///
    /// # Errors
    ///
    /// Returns a playback error if the device or stream cannot be started.
    fn start(
        &self,
        session: SessionId,
        buffer: &AudioBuffer,
        on_complete: CompletionCallback,
    ) -> Result<Box<dyn OutputHandle>>;
}

/// Handle to a sounding session.
pub trait OutputHandle: Send {
    /// Silence the session and release its stream.
    fn stop(&mut self);
}

struct ActiveSession {
    id: SessionId,
    handle: Box<dyn OutputHandle>,
}

/// Owns the single active playback session.
pub struct PlaybackController {
    output: Arc<dyn AudioOutput>,
    active: Arc<Mutex<Option<ActiveSession>>>,
    next_session: AtomicU64,
}

impl PlaybackController {
    /// Create a controller over the given output.
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self {
            output,
            active: Arc::new(Mutex::new(None)),
            next_session: AtomicU64::new(1),
        }
    }

    /// Play `buffer`, preempting whatever is currently playing.
    ///
    /// Output failures are logged and swallowed; the caller continues as if
    /// the buffer had been silent. Returns the session that became active,
    /// or `None` when nothing is sounding.
    pub fn play(&self, buffer: AudioBuffer) -> Option<SessionId> {
        self.stop();

        if buffer.is_empty() {
            debug!("empty audio buffer, nothing to play");
            return None;
        }

        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let finished = Arc::new(AtomicBool::new(false));
        let on_complete =
            completion_for(Arc::downgrade(&self.active), id, Arc::clone(&finished));

        let handle = match self.output.start(id, &buffer, on_complete) {
            Ok(handle) => handle,
            Err(e) => {
                error!("failed to play audio: {e}");
                return None;
            }
        };
        info!(
            "playback {id} started: {} samples at {}Hz",
            buffer.samples_per_channel(),
            buffer.sample_rate()
        );

        let mut active = lock(&self.active);
        // The completion may have fired before we got the lock; it could not
        // clear a marker that was not there yet, so don't register one.
        if finished.load(Ordering::SeqCst) {
            debug!("playback {id} finished before registration");
            return None;
        }
        if let Some(mut displaced) = active.replace(ActiveSession { id, handle }) {
            displaced.handle.stop();
        }
        Some(id)
    }

    /// Stop session `id` if it is still the active one.
    pub fn stop_session(&self, id: SessionId) {
        let taken = {
            let mut active = lock(&self.active);
            if active.as_ref().is_some_and(|s| s.id == id) {
                active.take()
            } else {
                None
            }
        };
        if let Some(mut session) = taken {
            debug!("stopping playback {id}");
            session.handle.stop();
        }
    }

    /// Stop the active session, if any. Safe to call at any time.
    pub fn stop(&self) {
        let taken = lock(&self.active).take();
        if let Some(mut session) = taken {
            debug!("stopping playback {}", session.id);
            session.handle.stop();
        }
    }

    /// Whether a session is currently sounding.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// The currently active session.
    #[must_use]
    pub fn active_session(&self) -> Option<SessionId> {
        lock(&self.active).as_ref().map(|s| s.id)
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(active: &Mutex<Option<ActiveSession>>) -> MutexGuard<'_, Option<ActiveSession>> {
    active.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Build the completion callback for session `id`.
///
/// Clears the active marker only when it still belongs to `id`; a session
/// that was preempted or stopped in the meantime is left alone.
fn completion_for(
    active: std::sync::Weak<Mutex<Option<ActiveSession>>>,
    id: SessionId,
    finished: Arc<AtomicBool>,
) -> CompletionCallback {
    Box::new(move || {
        finished.store(true, Ordering::SeqCst);
        let Some(active) = active.upgrade() else {
            return;
        };
        let cleared = {
            let mut guard = lock(&active);
            if guard.as_ref().is_some_and(|s| s.id == id) {
                guard.take()
            } else {
                None
            }
        };
        if cleared.is_some() {
            debug!("playback {id} finished");
        }
    })
}
