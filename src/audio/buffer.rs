//! Lock-free sample ring between the decode stage and the output callback
//!
//! Single-producer single-consumer: the stream pushes decoded PCM16 and the
//! playback callback drains it, converting to f32 on the way out.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Lock-free ring of interleaved PCM16 samples
pub struct SampleRing {
    queue: ArrayQueue<i16>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl SampleRing {
    /// Create a ring holding up to `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push samples, dropping whatever does not fit.
    /// Returns the number of samples stored.
    pub fn push_samples(&self, samples: &[i16]) -> usize {
        for (stored, &sample) in samples.iter().enumerate() {
            if self.queue.push(sample).is_err() {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                return stored;
            }
        }
        samples.len()
    }

    /// Fill `out` with samples, padding with silence on underrun.
    /// Returns the number of real samples written.
    pub fn pop_samples(&self, out: &mut [i16]) -> usize {
        self.drain_into(out, |sample| sample, 0)
    }

    /// Like [`pop_samples`](Self::pop_samples) but converts to f32 in -1.0..1.0
    pub fn pop_samples_f32(&self, out: &mut [f32]) -> usize {
        self.drain_into(out, |sample| sample as f32 / 32768.0, 0.0)
    }

    fn drain_into<T: Copy>(&self, out: &mut [T], convert: impl Fn(i16) -> T, silence: T) -> usize {
        let mut written = 0;
        for slot in out.iter_mut() {
            match self.queue.pop() {
                Some(sample) => {
                    *slot = convert(sample);
                    written += 1;
                }
                None => *slot = silence,
            }
        }

        if written < out.len() {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        written
    }

    /// Drop every buffered sample
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Get current buffer length
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Get buffer capacity
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Get overflow count
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Get underrun count
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        self.overflow_count.store(0, Ordering::Relaxed);
        self.underrun_count.store(0, Ordering::Relaxed);
    }

    /// Get fill level as percentage
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

/// Thread-safe handle to a sample ring
pub type SharedSampleRing = Arc<SampleRing>;

/// Create a new shared sample ring
pub fn create_shared_ring(capacity: usize) -> SharedSampleRing {
    Arc::new(SampleRing::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_basic() {
        let ring = SampleRing::new(8);

        assert_eq!(ring.push_samples(&[1, 2, 3]), 3);
        assert_eq!(ring.len(), 3);

        let mut out = [0i16; 2];
        assert_eq!(ring.pop_samples(&mut out), 2);
        assert_eq!(out, [1, 2]);
        assert_eq!(ring.underrun_count(), 0);
    }

    #[test]
    fn test_overflow_drops_tail() {
        let ring = SampleRing::new(4);
        assert_eq!(ring.push_samples(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(ring.overflow_count(), 1);
        assert!(ring.len() == ring.capacity());
    }

    #[test]
    fn test_underrun_pads_silence() {
        let ring = SampleRing::new(4);
        ring.push_samples(&[16384]);

        let mut out = [9.0f32; 3];
        assert_eq!(ring.pop_samples_f32(&mut out), 1);
        assert_eq!(out, [0.5, 0.0, 0.0]);
        assert_eq!(ring.underrun_count(), 1);

        ring.reset_stats();
        assert_eq!(ring.underrun_count(), 0);
    }
}
