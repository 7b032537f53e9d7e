//! Audio decoding
//!
//! The pipeline talks to decoders through [`AudioDecoder`]; [`OpusDecoder`]
//! is the implementation used for the host's audio stream.

pub mod decoder;

pub use decoder::{DecoderStats, OpusDecoder};

use crate::error::CodecError;

/// Decoder for one audio stream.
///
/// Output is interleaved PCM16. Both decode calls return the number of
/// interleaved samples written to `out`.
pub trait AudioDecoder: Send {
    /// Channels in the decoded output
    fn channel_count(&self) -> u16;

    /// Interleaved samples a single unit can decode to
    fn max_output_samples(&self) -> usize;

    /// Decode one payload into `out`
    fn decode(&mut self, payload: &[u8], out: &mut [i16]) -> Result<usize, CodecError>;

    /// Produce concealment samples for one lost unit
    fn conceal_loss(&mut self, out: &mut [i16]) -> Result<usize, CodecError>;
}
