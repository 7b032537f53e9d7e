//! Contracts between the audio stream and its collaborators

use crate::error::Error;

/// Renderer can play samples on the receive thread; no decode thread is started
pub const CAPABILITY_DIRECT_SUBMIT: u32 = 0x1;

/// Playback sink for decoded audio
pub trait AudioRenderer: Send + Sync {
    /// Bitmask of `CAPABILITY_*` flags
    fn capabilities(&self) -> u32 {
        0
    }

    /// Prepare for a stream; returning false aborts stream start.
    ///
    /// `frame_size` is the number of interleaved samples in one decoded unit.
    fn stream_initialized(
        &self,
        channel_count: u16,
        channel_mask: u32,
        frame_size: usize,
        sample_rate: u32,
    ) -> bool;

    /// Play one unit of interleaved PCM16
    fn play_decoded_audio(&self, samples: &[i16]);

    /// Called once after every stage has stopped
    fn stream_closing(&self);
}

/// Receives the single fatal error that ends a stream
pub trait ConnectionListener: Send + Sync {
    fn connection_terminated(&self, cause: &Error);
}

/// Listener that only logs the failure
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl ConnectionListener for LoggingListener {
    fn connection_terminated(&self, cause: &Error) {
        tracing::error!("Connection terminated: {}", cause);
    }
}
