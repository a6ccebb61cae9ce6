//! Audio output to the system speakers via cpal.
//!
//! `cpal::Stream` is not `Send` on every platform, so the device and the
//! sounding stream live on one dedicated audio thread, spawned the first
//! time something is played and kept for the life of the process. The
//! [`PlaybackController`](crate::audio::playback::PlaybackController) talks
//! to it over a command channel.

use crate::audio::pcm::AudioBuffer;
use crate::audio::playback::{AudioOutput, CompletionCallback, OutputHandle, SessionId};
use crate::config::AudioConfig;
use crate::error::{ChatError, Result};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info};

/// How often the audio thread checks whether the current buffer drained.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long `start` waits for the audio thread to confirm a stream.
const START_TIMEOUT: Duration = Duration::from_secs(3);

enum AudioCommand {
    Play {
        session: SessionId,
        samples: Vec<f32>,
        channels: u16,
        on_complete: CompletionCallback,
        ack: Sender<Result<()>>,
    },
    Stop {
        session: SessionId,
    },
}

/// cpal-backed [`AudioOutput`].
pub struct CpalOutput {
    config: AudioConfig,
    worker: Mutex<Option<Sender<AudioCommand>>>,
    ack_timeout: Duration,
}

impl CpalOutput {
    /// Create an output for the configured device and sample rate.
    ///
    /// No device is opened until the first buffer is played.
    #[must_use]
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            config: config.clone(),
            worker: Mutex::new(None),
            ack_timeout: START_TIMEOUT,
        }
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| ChatError::Playback(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }

    /// Sender to the audio thread, spawning it on first use.
    fn worker(&self) -> Result<Sender<AudioCommand>> {
        let mut worker = self
            .worker
            .lock()
            .map_err(|e| ChatError::Playback(format!("audio worker lock poisoned: {e}")))?;
        if let Some(tx) = worker.as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let config = self.config.clone();
        std::thread::Builder::new()
            .name("lucero-audio".into())
            .spawn(move || run_audio_thread(&config, &rx, &ready_tx))?;

        ready_rx
            .recv_timeout(START_TIMEOUT)
            .map_err(|_| ChatError::Playback("audio thread did not start".into()))??;

        *worker = Some(tx.clone());
        Ok(tx)
    }
}

impl AudioOutput for CpalOutput {
    fn start(
        &self,
        session: SessionId,
        buffer: &AudioBuffer,
        on_complete: CompletionCallback,
    ) -> Result<Box<dyn OutputHandle>> {
        if buffer.sample_rate() != self.config.sample_rate {
            return Err(ChatError::Playback(format!(
                "buffer is {}Hz but the output runs at {}Hz",
                buffer.sample_rate(),
                self.config.sample_rate
            )));
        }

        let tx = self.worker()?;
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        tx.send(AudioCommand::Play {
            session,
            samples: buffer.interleaved(),
            channels: buffer.channel_count(),
            on_complete,
            ack: ack_tx,
        })
        .map_err(|_| ChatError::Playback("audio thread has exited".into()))?;

        match ack_rx.recv_timeout(self.ack_timeout) {
            Ok(started) => started?,
            Err(_) => {
                // Cancel the queued play so it never sounds unowned.
                let _ = tx.send(AudioCommand::Stop { session });
                return Err(ChatError::Playback(
                    "audio thread did not acknowledge playback".into(),
                ));
            }
        }

        Ok(Box::new(CpalHandle { session, tx }))
    }
}

struct CpalHandle {
    session: SessionId,
    tx: Sender<AudioCommand>,
}

impl OutputHandle for CpalHandle {
    fn stop(&mut self) {
        let _ = self.tx.send(AudioCommand::Stop {
            session: self.session,
        });
    }
}

/// Internal buffer for tracking playback progress.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

/// The stream currently owned by the audio thread.
struct Sounding<S> {
    session: SessionId,
    buffer: Arc<Mutex<PlaybackBuffer>>,
    on_complete: CompletionCallback,
    stream: S,
}

impl<S> Sounding<S> {
    fn is_finished(&self) -> bool {
        self.buffer.lock().map(|b| b.finished).unwrap_or(true)
    }
}

fn open_device(config: &AudioConfig) -> Result<cpal::Device> {
    let host = cpal::default_host();

    let device = if let Some(ref name) = config.output_device {
        host.output_devices()
            .map_err(|e| ChatError::Playback(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| ChatError::Playback(format!("output device '{name}' not found")))?
    } else {
        host.default_output_device()
            .ok_or_else(|| ChatError::Playback("no default output device".into()))?
    };

    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using output device: {device_name}");
    Ok(device)
}

fn run_audio_thread(
    config: &AudioConfig,
    rx: &Receiver<AudioCommand>,
    ready: &Sender<Result<()>>,
) {
    let device = match open_device(config) {
        Ok(d) => {
            let _ = ready.send(Ok(()));
            d
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    serve_commands(rx, |channels, samples| {
        build_stream(&device, config.sample_rate, channels, samples)
    });
}

/// Audio thread command loop over streams made by `build`.
fn serve_commands<S>(
    rx: &Receiver<AudioCommand>,
    mut build: impl FnMut(u16, Vec<f32>) -> Result<(S, Arc<Mutex<PlaybackBuffer>>)>,
) {
    let mut current: Option<Sounding<S>> = None;

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(AudioCommand::Play {
                session,
                samples,
                channels,
                on_complete,
                ack,
            }) => {
                // Dropping the previous stream silences it.
                current = None;
                match build(channels, samples) {
                    Ok((stream, buffer)) => {
                        current = Some(Sounding {
                            session,
                            buffer,
                            on_complete,
                            stream,
                        });
                        let _ = ack.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = ack.send(Err(e));
                    }
                }
            }
            Ok(AudioCommand::Stop { session }) => {
                if current.as_ref().is_some_and(|c| c.session == session) {
                    debug!("audio thread stopping {session}");
                    current = None;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if let Some(done) = current.take_if(|c| c.is_finished()) {
            let Sounding {
                session,
                on_complete,
                stream,
                ..
            } = done;
            drop(stream);
            debug!("audio thread finished {session}");
            on_complete();
        }
    }

    debug!("audio thread exiting");
}

fn build_stream(
    device: &cpal::Device,
    sample_rate: u32,
    channels: u16,
    samples: Vec<f32>,
) -> Result<(cpal::Stream, Arc<Mutex<PlaybackBuffer>>)> {
    let stream_config = StreamConfig {
        channels,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let buffer = Arc::new(Mutex::new(PlaybackBuffer {
        samples,
        position: 0,
        finished: false,
    }));
    let buffer_clone = Arc::clone(&buffer);

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut buf = match buffer_clone.lock() {
                    Ok(b) => b,
                    Err(_) => return,
                };

                for sample in data.iter_mut() {
                    if buf.position < buf.samples.len() {
                        *sample = buf.samples[buf.position];
                        buf.position += 1;
                    } else {
                        *sample = 0.0;
                        buf.finished = true;
                    }
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| ChatError::Playback(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| ChatError::Playback(format!("failed to start output stream: {e}")))?;

    Ok((stream, buffer))
}
