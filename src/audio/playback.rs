//! Desktop playback through cpal
//!
//! The cpal output stream is not `Send`, so it lives on its own thread for
//! the lifetime of an audio stream. Decoded units are pushed into a
//! [`SampleRing`](crate::audio::buffer::SampleRing) that the output callback
//! drains.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};

use crate::audio::buffer::{create_shared_ring, SharedSampleRing};
use crate::audio::device::{get_default_output_device, get_device_by_id, AudioDevice};
use crate::audio::renderer::{AudioRenderer, CAPABILITY_DIRECT_SUBMIT};
use crate::error::AudioError;

/// Decoded units of headroom kept in the sample ring
const RING_UNITS: usize = 16;

struct PlaybackSession {
    ring: SharedSampleRing,
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

/// Renderer playing decoded audio on a cpal output device
pub struct CpalRenderer {
    device_id: Option<String>,
    direct_submit: bool,
    session: Mutex<Option<PlaybackSession>>,
}

impl CpalRenderer {
    /// Play on the device with `device_id`, or the default output device
    pub fn new(device_id: Option<String>, direct_submit: bool) -> Self {
        Self {
            device_id,
            direct_submit,
            session: Mutex::new(None),
        }
    }

    fn open_device(&self) -> Result<AudioDevice, AudioError> {
        match &self.device_id {
            Some(id) => get_device_by_id(id),
            None => get_default_output_device(),
        }
    }

    fn open(&self, channels: u16, frame_size: usize, sample_rate: u32) -> Result<PlaybackSession, AudioError> {
        let device = self.open_device()?;
        if !device.supports(channels, sample_rate) {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} does not play {} channels at {} Hz",
                device.name, channels, sample_rate
            )));
        }

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring = create_shared_ring(frame_size * RING_UNITS);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let output = ring.clone();
        let name = device.name.clone();

        let thread = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();

                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        output.pop_samples_f32(data);
                    },
                    |err| tracing::error!("Playback stream error: {}", err),
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Returns once the sender is dropped; the stream stops with it
                let _ = stop_rx.recv();
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!("Playback started on {}", name);
                Ok(PlaybackSession {
                    ring,
                    stop_tx,
                    thread,
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::StreamError("playback thread exited".to_string()))
            }
        }
    }

    /// Samples currently buffered for output
    pub fn buffered_samples(&self) -> usize {
        self.session
            .lock()
            .as_ref()
            .map_or(0, |session| session.ring.len())
    }

    /// Output callbacks that ran short of samples
    pub fn underruns(&self) -> usize {
        self.session
            .lock()
            .as_ref()
            .map_or(0, |session| session.ring.underrun_count())
    }
}

impl AudioRenderer for CpalRenderer {
    fn capabilities(&self) -> u32 {
        if self.direct_submit {
            CAPABILITY_DIRECT_SUBMIT
        } else {
            0
        }
    }

    fn stream_initialized(&self, channel_count: u16, channel_mask: u32, frame_size: usize, sample_rate: u32) -> bool {
        tracing::debug!(
            "Initializing playback: {} channels (mask {:#x}), {} samples per unit, {} Hz",
            channel_count,
            channel_mask,
            frame_size,
            sample_rate
        );

        match self.open(channel_count, frame_size, sample_rate) {
            Ok(session) => {
                *self.session.lock() = Some(session);
                true
            }
            Err(e) => {
                tracing::error!("Failed to start playback: {}", e);
                false
            }
        }
    }

    fn play_decoded_audio(&self, samples: &[i16]) {
        if let Some(session) = self.session.lock().as_ref() {
            if session.ring.push_samples(samples) < samples.len() {
                tracing::debug!("Playback ring full, dropped samples");
            }
        }
    }

    fn stream_closing(&self) {
        if let Some(session) = self.session.lock().take() {
            drop(session.stop_tx);
            if session.thread.join().is_err() {
                tracing::error!("Playback thread panicked");
            }
            tracing::info!(
                "Playback stopped ({} underruns, {} overflows)",
                session.ring.underrun_count(),
                session.ring.overflow_count()
            );
        }
    }
}
