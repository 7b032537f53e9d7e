//! Audio depacketizer
//!
//! Takes in-order RTP packets from the receive loop, decodes their payloads
//! and publishes the PCM either straight to a direct-submit renderer or to a
//! pool-backed queue read by the decode thread.

use std::sync::Arc;

use crate::audio::renderer::AudioRenderer;
use crate::audio::stats::StreamStats;
use crate::buffer::{new_pool, BufferDescriptor, BufferFactory, BufferPool, PoolKind, SampleBufferDescriptor};
use crate::codec::AudioDecoder;
use crate::constants::AUDIO_PAYLOAD_TYPE;
use crate::error::PoolError;
use crate::rtp::{distance, is_before, RtpPacket, SequencedPacket};

/// Allocates decoded-unit buffers and restores their full window on free
struct SampleBufferFactory {
    samples: usize,
}

impl BufferFactory<SampleBufferDescriptor> for SampleBufferFactory {
    fn create_free_buffer(&self) -> SampleBufferDescriptor {
        BufferDescriptor::whole(vec![0i16; self.samples].into_boxed_slice())
    }

    fn cleanup_object(&self, unit: &mut SampleBufferDescriptor) {
        let capacity = unit.capacity();
        unit.set_window(0, capacity);
    }
}

/// Decodes RTP audio payloads into pooled PCM buffers
pub struct AudioDepacketizer {
    decoder: Box<dyn AudioDecoder>,
    direct_renderer: Option<Arc<dyn AudioRenderer>>,
    decoded_units: Box<dyn BufferPool<SampleBufferDescriptor>>,
    last_sequence: Option<u16>,
    payload_type: u8,
    stats: Arc<StreamStats>,
}

impl AudioDepacketizer {
    /// Create a depacketizer.
    ///
    /// With a direct renderer a single buffer is used and every unit is
    /// played on the calling thread; otherwise up to `unit_limit` decoded
    /// units wait for [`get_next_decoded_data`](Self::get_next_decoded_data).
    pub fn new(
        decoder: Box<dyn AudioDecoder>,
        direct_renderer: Option<Arc<dyn AudioRenderer>>,
        pool_kind: PoolKind,
        unit_limit: usize,
        stats: Arc<StreamStats>,
    ) -> Self {
        let capacity = if direct_renderer.is_some() { 1 } else { unit_limit };
        let factory = SampleBufferFactory {
            samples: decoder.max_output_samples(),
        };

        Self {
            decoder,
            direct_renderer,
            decoded_units: new_pool(pool_kind, capacity, factory),
            last_sequence: None,
            payload_type: AUDIO_PAYLOAD_TYPE,
            stats,
        }
    }

    /// Decode one in-order packet
    pub fn decode_input_data(&mut self, packet: &RtpPacket) {
        if packet.packet_type() != self.payload_type {
            self.stats.non_audio_discarded();
            return;
        }

        let seq = packet.sequence_number();
        if let Some(last) = self.last_sequence {
            let expected = last.wrapping_add(1);
            if seq != expected {
                tracing::warn!("Received OOS audio data (expected {}, got {})", expected, seq);

                if is_before(seq, expected, false) {
                    self.stats.out_of_sequence_dropped();
                    return;
                }

                // Packets were lost ahead of this one
                let missed = distance(expected, seq) as u16;
                tracing::debug!("{} audio packets missing before {}", missed, seq);
                self.stats.packets_missed(missed as u64);
                self.decode_unit(None);
            }
        }
        self.last_sequence = Some(seq);

        let payload = packet.payload();
        self.decode_unit(Some(payload.as_slice()));
    }

    fn decode_unit(&mut self, payload: Option<&[u8]>) {
        let Some(mut unit) = self.acquire_unit() else {
            return;
        };

        let result = match payload {
            Some(data) => self.decoder.decode(data, unit.backing_mut()),
            None => self.decoder.conceal_loss(unit.backing_mut()),
        };

        match result {
            Ok(samples) if samples > 0 => {
                unit.set_window(0, samples);
                if payload.is_some() {
                    self.stats.unit_decoded();
                } else {
                    self.stats.loss_concealed();
                }

                match &self.direct_renderer {
                    Some(renderer) => {
                        renderer.play_decoded_audio(unit.as_slice());
                        self.stats.unit_played();
                        self.decoded_units.free_populated(unit);
                    }
                    None => self.decoded_units.add_populated(unit),
                }
            }
            Ok(_) => self.decoded_units.free_populated(unit),
            Err(e) => {
                tracing::warn!("Audio decode failed: {}", e);
                self.stats.decode_error();
                self.decoded_units.free_populated(unit);
            }
        }
    }

    fn acquire_unit(&mut self) -> Option<SampleBufferDescriptor> {
        if let Some(unit) = self.decoded_units.poll_free() {
            return Some(unit);
        }

        tracing::warn!("Audio player too slow! Forced to drop decoded samples");
        let dropped = self.decoded_units.populated_count();
        self.decoded_units.clear_populated();
        self.stats.units_dropped(dropped as u64);

        match self.decoded_units.poll_free() {
            Some(unit) => Some(unit),
            None => {
                tracing::error!("Audio player is leaking buffers!");
                self.stats.units_dropped(1);
                None
            }
        }
    }

    /// Wait for the next decoded unit
    pub fn get_next_decoded_data(&self) -> Result<SampleBufferDescriptor, PoolError> {
        self.decoded_units.take_populated()
    }

    /// Return a unit obtained from [`get_next_decoded_data`](Self::get_next_decoded_data)
    pub fn free_decoded_data(&self, unit: SampleBufferDescriptor) {
        self.decoded_units.free_populated(unit);
    }

    /// Handle to the decoded-unit queue for another thread
    pub fn decoded_queue(&self) -> Result<DecodedAudioQueue, PoolError> {
        Ok(DecodedAudioQueue {
            pool: self.decoded_units.share()?,
        })
    }

    /// Sequence number of the last packet decoded
    pub fn last_sequence(&self) -> Option<u16> {
        self.last_sequence
    }

    pub fn channel_count(&self) -> u16 {
        self.decoder.channel_count()
    }

    /// Interleaved samples in one full unit
    pub fn unit_samples(&self) -> usize {
        self.decoder.max_output_samples()
    }

    /// Decoded units waiting for the consumer
    pub fn pending_units(&self) -> usize {
        self.decoded_units.populated_count()
    }
}

/// Consumer side of the decoded-unit queue
pub struct DecodedAudioQueue {
    pool: Box<dyn BufferPool<SampleBufferDescriptor>>,
}

impl DecodedAudioQueue {
    /// Block until a decoded unit is available or the queue is closed
    pub fn get_next_decoded_data(&self) -> Result<SampleBufferDescriptor, PoolError> {
        self.pool.take_populated()
    }

    pub fn free_decoded_data(&self, unit: SampleBufferDescriptor) {
        self.pool.free_populated(unit);
    }

    /// Wake the consumer and make further waits fail
    pub fn close(&self) {
        self.pool.close();
    }
}
