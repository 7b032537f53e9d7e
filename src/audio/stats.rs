//! Pipeline counters shared between the stream's threads

use std::sync::atomic::{AtomicU64, Ordering};

use crate::rtp::ReorderStats;

/// Live counters, updated by the stage threads
#[derive(Debug, Default)]
pub struct StreamStats {
    datagrams_received: AtomicU64,
    non_audio_discarded: AtomicU64,
    runts_discarded: AtomicU64,
    oversized_discarded: AtomicU64,
    out_of_sequence_dropped: AtomicU64,
    packets_missed: AtomicU64,
    units_decoded: AtomicU64,
    losses_concealed: AtomicU64,
    units_dropped: AtomicU64,
    decode_errors: AtomicU64,
    units_played: AtomicU64,
    keepalives_sent: AtomicU64,

    // Mirrored from the reorder queue by the receive thread
    reorder_immediate: AtomicU64,
    reorder_queued: AtomicU64,
    reorder_rejected: AtomicU64,
    reorder_forced_by_time: AtomicU64,
    reorder_forced_by_size: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatsSnapshot {
    pub datagrams_received: u64,
    pub non_audio_discarded: u64,
    pub runts_discarded: u64,
    /// Datagrams longer than the configured maximum packet size
    pub oversized_discarded: u64,
    pub out_of_sequence_dropped: u64,
    /// Sequence numbers skipped over by in-order delivery
    pub packets_missed: u64,
    pub units_decoded: u64,
    pub losses_concealed: u64,
    pub units_dropped: u64,
    pub decode_errors: u64,
    pub units_played: u64,
    pub keepalives_sent: u64,
    pub reorder: ReorderStats,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn datagram_received(&self) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn non_audio_discarded(&self) {
        self.non_audio_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn runt_discarded(&self) {
        self.runts_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn oversized_discarded(&self) {
        self.oversized_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn out_of_sequence_dropped(&self) {
        self.out_of_sequence_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn packets_missed(&self, count: u64) {
        self.packets_missed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn unit_decoded(&self) {
        self.units_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn loss_concealed(&self) {
        self.losses_concealed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn units_dropped(&self, count: u64) {
        self.units_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unit_played(&self) {
        self.units_played.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn keepalive_sent(&self) {
        self.keepalives_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reorder(&self, stats: ReorderStats) {
        self.reorder_immediate
            .store(stats.handled_immediately, Ordering::Relaxed);
        self.reorder_queued.store(stats.queued, Ordering::Relaxed);
        self.reorder_rejected.store(stats.rejected, Ordering::Relaxed);
        self.reorder_forced_by_time
            .store(stats.forced_by_time, Ordering::Relaxed);
        self.reorder_forced_by_size
            .store(stats.forced_by_size, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            non_audio_discarded: self.non_audio_discarded.load(Ordering::Relaxed),
            runts_discarded: self.runts_discarded.load(Ordering::Relaxed),
            oversized_discarded: self.oversized_discarded.load(Ordering::Relaxed),
            out_of_sequence_dropped: self.out_of_sequence_dropped.load(Ordering::Relaxed),
            packets_missed: self.packets_missed.load(Ordering::Relaxed),
            units_decoded: self.units_decoded.load(Ordering::Relaxed),
            losses_concealed: self.losses_concealed.load(Ordering::Relaxed),
            units_dropped: self.units_dropped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            units_played: self.units_played.load(Ordering::Relaxed),
            keepalives_sent: self.keepalives_sent.load(Ordering::Relaxed),
            reorder: ReorderStats {
                handled_immediately: self.reorder_immediate.load(Ordering::Relaxed),
                queued: self.reorder_queued.load(Ordering::Relaxed),
                rejected: self.reorder_rejected.load(Ordering::Relaxed),
                forced_by_time: self.reorder_forced_by_time.load(Ordering::Relaxed),
                forced_by_size: self.reorder_forced_by_size.load(Ordering::Relaxed),
            },
        }
    }
}

impl StreamStatsSnapshot {
    /// Fraction of decoded output that came from loss concealment
    pub fn loss_rate(&self) -> f32 {
        let total = self.units_decoded + self.losses_concealed;
        if total == 0 {
            0.0
        } else {
            self.losses_concealed as f32 / total as f32
        }
    }
}
