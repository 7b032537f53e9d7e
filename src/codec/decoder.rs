//! Opus decoder wrapper
//!
//! Provides Opus decoding with packet loss concealment.

use opus::{Channels, Decoder};

use crate::codec::AudioDecoder;
use crate::error::CodecError;

/// Opus decoder wrapper
pub struct OpusDecoder {
    decoder: Decoder,
    sample_rate: u32,
    channels: u16,
    frame_size: usize,
    /// Frames decoded
    frames_decoded: u64,
    /// Frames lost (PLC used)
    frames_lost: u64,
    /// Total samples produced
    samples_produced: u64,
}

impl OpusDecoder {
    /// Create a new Opus decoder producing `frame_size` samples per channel per unit
    pub fn new(sample_rate: u32, channels: u16, frame_size: usize) -> Result<Self, CodecError> {
        let opus_channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => return Err(CodecError::UnsupportedChannelCount(channels)),
        };

        let decoder = Decoder::new(sample_rate, opus_channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            decoder,
            sample_rate,
            channels,
            frame_size,
            frames_decoded: 0,
            frames_lost: 0,
            samples_produced: 0,
        })
    }

    /// Reset decoder state
    pub fn reset(&mut self) -> Result<(), CodecError> {
        self.decoder
            .reset_state()
            .map_err(|e| CodecError::DecoderInit(e.to_string()))
    }

    /// Get sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get frame size in samples (per channel)
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_lost: self.frames_lost,
            samples_produced: self.samples_produced,
            loss_rate: if self.frames_decoded + self.frames_lost > 0 {
                self.frames_lost as f32 / (self.frames_decoded + self.frames_lost) as f32
            } else {
                0.0
            },
        }
    }

    /// Reset statistics
    pub fn reset_stats(&mut self) {
        self.frames_decoded = 0;
        self.frames_lost = 0;
        self.samples_produced = 0;
    }

    fn unit_len(&self) -> usize {
        self.frame_size * self.channels as usize
    }
}

impl AudioDecoder for OpusDecoder {
    fn channel_count(&self) -> u16 {
        self.channels
    }

    fn max_output_samples(&self) -> usize {
        self.unit_len()
    }

    fn decode(&mut self, payload: &[u8], out: &mut [i16]) -> Result<usize, CodecError> {
        let per_channel = self
            .decoder
            .decode(payload, out, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        let total_samples = per_channel * self.channels as usize;
        self.frames_decoded += 1;
        self.samples_produced += total_samples as u64;
        Ok(total_samples)
    }

    fn conceal_loss(&mut self, out: &mut [i16]) -> Result<usize, CodecError> {
        // PLC length is taken from the output size, so limit it to one unit
        let len = self.unit_len().min(out.len());
        let per_channel = self
            .decoder
            .decode(&[], &mut out[..len], false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        let total_samples = per_channel * self.channels as usize;
        self.frames_lost += 1;
        self.samples_produced += total_samples as u64;
        Ok(total_samples)
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_lost: u64,
    pub samples_produced: u64,
    pub loss_rate: f32,
}
