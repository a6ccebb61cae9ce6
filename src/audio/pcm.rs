//! Base64 raw PCM decoding.
//!
//! The TTS service returns headerless 16-bit little-endian PCM wrapped in
//! base64. Sample rate and channel count are declared by the caller; nothing
//! is inferred from the byte stream.

use crate::error::Result;
use base64::Engine;
use std::time::Duration;

/// Divisor mapping the signed 16-bit range onto [-1.0, 1.0).
const I16_SCALE: f32 = 32_768.0;

/// A decoded, normalized audio buffer.
///
/// Every channel holds the same number of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Create a buffer of `channel_count` empty channels.
    #[must_use]
    pub fn empty(sample_rate: u32, channel_count: u16) -> Self {
        Self {
            sample_rate,
            channels: vec![Vec::new(); usize::from(channel_count.max(1))],
        }
    }

    /// Sample rate in Hz.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of channels.
    #[must_use]
    pub fn channel_count(&self) -> u16 {
        u16::try_from(self.channels.len()).unwrap_or(u16::MAX)
    }

    /// Number of samples in each channel.
    #[must_use]
    pub fn samples_per_channel(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Samples of one channel, or `None` if out of range.
    #[must_use]
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Whether the buffer holds no samples at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples_per_channel() == 0
    }

    /// Playback length at the buffer's sample rate.
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples_per_channel() as f64 / f64::from(self.sample_rate))
    }

    /// Frame-interleaved samples, the layout output devices expect.
    #[must_use]
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.samples_per_channel();
        let mut out = Vec::with_capacity(frames * self.channels.len());
        for frame in 0..frames {
            for channel in &self.channels {
                out.push(channel[frame]);
            }
        }
        out
    }
}

/// Decode a standard base64 string into raw bytes.
///
/// # Errors
///
/// Returns [`ChatError::Decode`](crate::error::ChatError::Decode) if the input is not valid base64.
pub fn decode_base64_to_bytes(base64: &str) -> Result<Vec<u8>> {
    Ok(base64::engine::general_purpose::STANDARD.decode(base64.trim())?)
}

/// Convert packed little-endian `i16` PCM into a normalized [`AudioBuffer`].
///
/// Samples are dealt round-robin across `channel_count` channels. A trailing
/// odd byte or incomplete frame is dropped. A `channel_count` of zero is
/// treated as mono.
#[must_use]
pub fn bytes_to_audio_buffer(bytes: &[u8], sample_rate: u32, channel_count: u16) -> AudioBuffer {
    let channel_count = usize::from(channel_count.max(1));
    let frames = bytes.len() / 2 / channel_count;
    let mut channels = vec![Vec::with_capacity(frames); channel_count];

    let frame_bytes = 2 * channel_count;
    for frame in bytes.chunks_exact(frame_bytes) {
        for (channel, pair) in channels.iter_mut().zip(frame.chunks_exact(2)) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            channel.push(f32::from(sample) / I16_SCALE);
        }
    }

    AudioBuffer {
        sample_rate,
        channels,
    }
}

/// Decode a base64 PCM payload straight into an [`AudioBuffer`].
///
/// # Errors
///
/// Returns a decode error if the payload is not valid base64.
pub fn decode_pcm_base64(base64: &str, sample_rate: u32, channel_count: u16) -> Result<AudioBuffer> {
    let bytes = decode_base64_to_bytes(base64)?;
    Ok(bytes_to_audio_buffer(&bytes, sample_rate, channel_count))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::error::ChatError;

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn mono_samples_are_normalized() {
        let bytes = pcm_bytes(&[0, i16::MAX, i16::MIN, -16_384]);
        let buffer = bytes_to_audio_buffer(&bytes, 24_000, 1);

        assert_eq!(buffer.sample_rate(), 24_000);
        assert_eq!(buffer.channel_count(), 1);
        let samples = buffer.channel(0).unwrap();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0], 0.0);
        assert!((samples[1] - 32_767.0 / 32_768.0).abs() < f32::EPSILON);
        assert_eq!(samples[2], -1.0);
        assert_eq!(samples[3], -0.5);
        assert!(samples.iter().all(|s| (-1.0..1.0).contains(s)));
    }

    #[test]
    fn stereo_samples_interleave_round_robin() {
        let bytes = pcm_bytes(&[100, -100, 200, -200, 300, -300]);
        let buffer = bytes_to_audio_buffer(&bytes, 24_000, 2);

        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.samples_per_channel(), 3);
        let left: Vec<i16> = buffer
            .channel(0)
            .unwrap()
            .iter()
            .map(|s| (s * I16_SCALE) as i16)
            .collect();
        let right: Vec<i16> = buffer
            .channel(1)
            .unwrap()
            .iter()
            .map(|s| (s * I16_SCALE) as i16)
            .collect();
        assert_eq!(left, vec![100, 200, 300]);
        assert_eq!(right, vec![-100, -200, -300]);
    }

    #[test]
    fn trailing_odd_byte_is_truncated() {
        let mut bytes = pcm_bytes(&[1, 2, 3]);
        bytes.push(0x7f);
        let buffer = bytes_to_audio_buffer(&bytes, 24_000, 1);
        assert_eq!(buffer.samples_per_channel(), 3);
    }

    #[test]
    fn partial_frame_is_truncated() {
        // Five samples across two channels: the fifth has no partner.
        let bytes = pcm_bytes(&[1, 2, 3, 4, 5]);
        let buffer = bytes_to_audio_buffer(&bytes, 24_000, 2);
        assert_eq!(buffer.samples_per_channel(), 2);
        assert_eq!(buffer.channel(1).unwrap().len(), 2);
    }

    #[test]
    fn per_channel_length_is_floor_of_frames() {
        for len in 0..32 {
            let bytes = vec![0u8; len];
            for channels in 1..=3u16 {
                let buffer = bytes_to_audio_buffer(&bytes, 24_000, channels);
                assert_eq!(
                    buffer.samples_per_channel(),
                    len / 2 / usize::from(channels),
                    "len={len} channels={channels}"
                );
            }
        }
    }

    #[test]
    fn empty_input_yields_empty_buffer() {
        let buffer = bytes_to_audio_buffer(&[], 24_000, 1);
        assert!(buffer.is_empty());
        assert_eq!(buffer.channel_count(), 1);
        assert_eq!(buffer.duration(), Duration::ZERO);
        assert!(buffer.interleaved().is_empty());
    }

    #[test]
    fn zero_channel_count_is_treated_as_mono() {
        let buffer = bytes_to_audio_buffer(&pcm_bytes(&[7, 8]), 24_000, 0);
        assert_eq!(buffer.channel_count(), 1);
        assert_eq!(buffer.samples_per_channel(), 2);
    }

    #[test]
    fn requantized_samples_match_source_within_one_unit() {
        let source: Vec<i16> = (-40..40).map(|i| (i * 811) as i16).chain([i16::MIN, i16::MAX]).collect();
        let encoded = base64::engine::general_purpose::STANDARD.encode(pcm_bytes(&source));

        let buffer = decode_pcm_base64(&encoded, 24_000, 1).unwrap();
        let restored: Vec<i16> = buffer
            .channel(0)
            .unwrap()
            .iter()
            .map(|s| (s * I16_SCALE).round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16)
            .collect();

        assert_eq!(restored.len(), source.len());
        for (a, b) in source.iter().zip(&restored) {
            assert!((i32::from(*a) - i32::from(*b)).abs() <= 1, "{a} vs {b}");
        }
    }

    #[test]
    fn interleaved_restores_frame_order() {
        let bytes = pcm_bytes(&[1, 2, 3, 4]);
        let buffer = bytes_to_audio_buffer(&bytes, 24_000, 2);
        let back: Vec<i16> = buffer
            .interleaved()
            .iter()
            .map(|s| (s * I16_SCALE) as i16)
            .collect();
        assert_eq!(back, vec![1, 2, 3, 4]);
    }

    #[test]
    fn duration_follows_sample_rate() {
        let bytes = vec![0u8; 48_000];
        let buffer = bytes_to_audio_buffer(&bytes, 24_000, 1);
        assert_eq!(buffer.duration(), Duration::from_secs(1));
    }

    #[test]
    fn invalid_base64_is_a_decode_error() {
        let err = decode_base64_to_bytes("not base64 at all!").unwrap_err();
        assert!(matches!(err, ChatError::Decode(_)));
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let bytes = decode_base64_to_bytes("  AAE=\n").unwrap();
        assert_eq!(bytes, vec![0x00, 0x01]);
    }

    #[test]
    fn empty_base64_is_empty_bytes() {
        assert!(decode_base64_to_bytes("").unwrap().is_empty());
    }
}
