//! PCM decoding and single-session playback via cpal.

pub mod cpal_output;
pub mod pcm;
pub mod playback;

pub use cpal_output::CpalOutput;
pub use pcm::AudioBuffer;
pub use playback::{AudioOutput, OutputHandle, PlaybackController, SessionId};
