//! Bounded, time-windowed RTP reorder queue
//!
//! Restores sequence order for packets that arrive slightly out of order over
//! UDP. In-order packets pass straight through with no added latency. Packets
//! that arrive ahead of a hole are parked until the hole is filled, or until
//! the queue's time or size limit forces it to give up on the missing packet
//! and skip ahead. A lost packet therefore costs at most `max_queue_time` of
//! extra latency and never stalls playback.
//!
//! The queue is single-threaded; it is owned by the receive loop.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::ReorderConfig;
use crate::rtp::packet::SequencedPacket;
use crate::rtp::sequence::is_before;

/// Outcome of [`RtpReorderQueue::add_packet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// The packet is the next expected one and nothing is queued; process it now
    HandleImmediately,
    /// The packet was queued and nothing can be dequeued yet
    QueuedNothingReady,
    /// The packet was queued and [`RtpReorderQueue::get_queued_packet`] will return data
    QueuedPacketsReady,
    /// Stale or duplicate packet; it was not queued
    Rejected,
}

impl QueueStatus {
    /// True if the queue took its own reference to the packet
    pub fn is_queued(self) -> bool {
        matches!(self, Self::QueuedNothingReady | Self::QueuedPacketsReady)
    }
}

/// Counters kept by the reorder queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReorderStats {
    pub handled_immediately: u64,
    pub queued: u64,
    pub rejected: u64,
    pub forced_by_time: u64,
    pub forced_by_size: u64,
}

struct QueueEntry<P> {
    packet: P,
    sequence_number: u16,
    queue_time: Instant,
}

/// Reorder queue over any reference-counted sequenced packet
pub struct RtpReorderQueue<P> {
    max_size: usize,
    max_queue_time: Duration,
    queue: VecDeque<QueueEntry<P>>,
    next_sequence: Option<u16>,
    oldest_queued: Option<Instant>,
    stats: ReorderStats,
}

impl<P: SequencedPacket> RtpReorderQueue<P> {
    /// Create a queue holding at most `max_size` packets for at most `max_queue_time`
    pub fn new(max_size: usize, max_queue_time: Duration) -> Self {
        assert!(max_size >= 2, "reorder queue needs room for at least 2 packets");

        Self {
            max_size,
            max_queue_time,
            queue: VecDeque::with_capacity(max_size),
            next_sequence: None,
            oldest_queued: None,
            stats: ReorderStats::default(),
        }
    }

    /// Create a queue from the reorder section of the configuration
    pub fn from_config(config: &ReorderConfig) -> Self {
        Self::new(config.max_size, Duration::from_millis(config.max_queue_time_ms))
    }

    /// Offer a packet to the queue at the current time
    pub fn add_packet(&mut self, packet: &P) -> QueueStatus {
        self.add_packet_at(packet, Instant::now())
    }

    /// Offer a packet to the queue as if it arrived at `now`.
    ///
    /// When the returned status is one of the `Queued*` variants the queue
    /// holds its own reference to the packet, so the caller must not reuse
    /// the packet's storage.
    pub fn add_packet_at(&mut self, packet: &P, now: Instant) -> QueueStatus {
        let seq = packet.sequence_number();

        if let Some(next) = self.next_sequence {
            if is_before(seq, next, false) {
                // Behind our current position: already delivered or skipped
                self.stats.rejected += 1;
                return QueueStatus::Rejected;
            }
        }

        if self.queue.is_empty() {
            // Fast path: exact match with an empty queue
            if self.next_sequence.map_or(true, |next| next == seq) {
                self.next_sequence = Some(seq.wrapping_add(1));
                self.stats.handled_immediately += 1;
                return QueueStatus::HandleImmediately;
            }

            return if self.queue_packet(false, packet, now) {
                QueueStatus::QueuedNothingReady
            } else {
                self.stats.rejected += 1;
                QueueStatus::Rejected
            };
        }

        let forced = self.validate_queue_constraints(now);

        if forced.is_none() && self.queue.is_empty() {
            self.next_sequence = Some(seq.wrapping_add(1));
            self.stats.handled_immediately += 1;
            return QueueStatus::HandleImmediately;
        }

        if self.next_sequence == Some(seq) {
            // Fills the hole we were waiting on
            if self.queue_packet(true, packet, now) {
                return QueueStatus::QueuedPacketsReady;
            }
        } else if self.queue_packet(false, packet, now) {
            // Constraint validation may have moved us onto a queued packet
            return if forced.is_some() {
                QueueStatus::QueuedPacketsReady
            } else {
                QueueStatus::QueuedNothingReady
            };
        }

        self.stats.rejected += 1;
        QueueStatus::Rejected
    }

    /// Remove and return the next in-order packet, if it is queued.
    ///
    /// The returned packet carries the queue's reference; the caller releases
    /// it when done. Keep calling until `None` is returned, since handing out
    /// one packet may make the following one available.
    pub fn get_queued_packet(&mut self) -> Option<P> {
        let position = self.next_sequence.and_then(|next| {
            self.queue
                .iter()
                .position(|entry| entry.sequence_number == next)
        });

        match position.and_then(|index| self.queue.remove(index)) {
            Some(entry) => {
                self.next_sequence = Some(entry.sequence_number.wrapping_add(1));
                // The oldest time is refreshed once the caller drains to None
                Some(entry.packet)
            }
            None => {
                self.update_oldest_queued();
                None
            }
        }
    }

    fn queue_packet(&mut self, head: bool, packet: &P, now: Instant) -> bool {
        let seq = packet.sequence_number();

        if let Some(next) = self.next_sequence {
            if is_before(seq, next, false) {
                return false;
            }
        }

        if self.queue.iter().any(|entry| entry.sequence_number == seq) {
            return false;
        }

        if self.oldest_queued.is_none() {
            self.oldest_queued = Some(now);
        }

        let entry = QueueEntry {
            packet: packet.add_ref(),
            sequence_number: seq,
            queue_time: now,
        };

        if head {
            self.queue.push_front(entry);
        } else {
            self.queue.push_back(entry);
        }

        self.stats.queued += 1;
        true
    }

    fn update_oldest_queued(&mut self) {
        self.oldest_queued = self.queue.iter().map(|entry| entry.queue_time).min();
    }

    /// Point `next_sequence` at the lowest queued sequence number
    fn select_lowest_sequence(&mut self) -> Option<u16> {
        let mut lowest = self.queue.front()?.sequence_number;

        for entry in &self.queue {
            if is_before(entry.sequence_number, lowest, true) {
                lowest = entry.sequence_number;
            }
        }

        self.next_sequence = Some(lowest);
        Some(lowest)
    }

    /// Give up on missing packets if the queue is too old or too full.
    ///
    /// Returns the sequence number that became dequeuable, if any.
    fn validate_queue_constraints(&mut self, now: Instant) -> Option<u16> {
        if self.queue.is_empty() {
            return None;
        }

        let waited = self
            .oldest_queued
            .map(|oldest| now.saturating_duration_since(oldest))
            .unwrap_or_default();

        if waited > self.max_queue_time {
            tracing::debug!("Returning RTP packet queued for too long: {:?}", waited);
            self.stats.forced_by_time += 1;
        } else if self.queue.len() >= self.max_size - 1 {
            // One below max because the current packet is about to be queued
            tracing::debug!("Returning RTP packet after queue overgrowth");
            self.stats.forced_by_size += 1;
        } else {
            return None;
        }

        self.select_lowest_sequence()
    }

    /// Number of queued packets
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Sequence number the queue wants next, if one has been seen
    pub fn expected_sequence(&self) -> Option<u16> {
        self.next_sequence
    }

    /// Enqueue time of the oldest queued packet
    pub fn oldest_queued(&self) -> Option<Instant> {
        self.oldest_queued
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn max_queue_time(&self) -> Duration {
        self.max_queue_time
    }

    pub fn stats(&self) -> ReorderStats {
        self.stats
    }
}

impl<P: SequencedPacket> Default for RtpReorderQueue<P> {
    fn default() -> Self {
        Self::from_config(&ReorderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::arena::PacketArena;
    use crate::rtp::packet::tests::datagram;
    use crate::rtp::packet::RtpPacket;

    fn packet(arena: &PacketArena, seq: u16) -> RtpPacket {
        RtpPacket::parse(datagram(arena, 97, seq, &[])).unwrap()
    }

    fn drain(queue: &mut RtpReorderQueue<RtpPacket>) -> Vec<u16> {
        let mut out = Vec::new();
        while let Some(p) = queue.get_queued_packet() {
            out.push(p.sequence_number());
            p.release();
        }
        out
    }

    #[test]
    fn test_fills_hole() {
        let arena = PacketArena::new(8, 32);
        let mut queue = RtpReorderQueue::default();
        let now = Instant::now();

        assert_eq!(queue.add_packet_at(&packet(&arena, 0), now), QueueStatus::HandleImmediately);
        assert_eq!(queue.add_packet_at(&packet(&arena, 1), now), QueueStatus::HandleImmediately);
        assert_eq!(queue.add_packet_at(&packet(&arena, 3), now), QueueStatus::QueuedNothingReady);
        assert_eq!(queue.add_packet_at(&packet(&arena, 2), now), QueueStatus::QueuedPacketsReady);

        assert_eq!(drain(&mut queue), vec![2, 3]);
        assert!(queue.get_queued_packet().is_none());
        assert_eq!(queue.expected_sequence(), Some(4));
        assert_eq!(arena.free_slots(), 8);
    }

    #[test]
    fn test_rejects_duplicates() {
        let arena = PacketArena::new(8, 32);
        let mut queue = RtpReorderQueue::default();
        let now = Instant::now();

        queue.add_packet_at(&packet(&arena, 0), now);
        assert_eq!(queue.add_packet_at(&packet(&arena, 5), now), QueueStatus::QueuedNothingReady);
        assert_eq!(queue.add_packet_at(&packet(&arena, 5), now), QueueStatus::Rejected);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.stats().rejected, 1);
    }

    #[test]
    fn test_rejects_stale() {
        let arena = PacketArena::new(8, 32);
        let mut queue = RtpReorderQueue::default();
        let now = Instant::now();

        for seq in 0..10 {
            assert_eq!(queue.add_packet_at(&packet(&arena, seq), now), QueueStatus::HandleImmediately);
        }
        assert_eq!(queue.add_packet_at(&packet(&arena, 3), now), QueueStatus::Rejected);
        assert_eq!(queue.add_packet_at(&packet(&arena, 9), now), QueueStatus::Rejected);

        // Still rejected while something is queued
        assert_eq!(queue.add_packet_at(&packet(&arena, 12), now), QueueStatus::QueuedNothingReady);
        assert_eq!(queue.add_packet_at(&packet(&arena, 9), now), QueueStatus::Rejected);
    }

    #[test]
    fn test_wraparound() {
        let arena = PacketArena::new(8, 32);
        let mut queue = RtpReorderQueue::default();
        let now = Instant::now();

        assert_eq!(queue.add_packet_at(&packet(&arena, 65534), now), QueueStatus::HandleImmediately);
        assert_eq!(queue.add_packet_at(&packet(&arena, 65535), now), QueueStatus::HandleImmediately);
        assert_eq!(queue.add_packet_at(&packet(&arena, 1), now), QueueStatus::QueuedNothingReady);
        assert_eq!(queue.add_packet_at(&packet(&arena, 0), now), QueueStatus::QueuedPacketsReady);
        assert_eq!(drain(&mut queue), vec![0, 1]);

        assert_eq!(queue.add_packet_at(&packet(&arena, 65535), now), QueueStatus::Rejected);
    }

    #[test]
    fn test_time_limit_skips_lost_packet() {
        let arena = PacketArena::new(8, 32);
        let mut queue = RtpReorderQueue::new(16, Duration::from_millis(40));
        let start = Instant::now();

        queue.add_packet_at(&packet(&arena, 0), start);
        assert_eq!(queue.add_packet_at(&packet(&arena, 2), start), QueueStatus::QueuedNothingReady);
        assert_eq!(
            queue.add_packet_at(&packet(&arena, 3), start + Duration::from_millis(20)),
            QueueStatus::QueuedNothingReady
        );
        assert_eq!(
            queue.add_packet_at(&packet(&arena, 4), start + Duration::from_millis(41)),
            QueueStatus::QueuedPacketsReady
        );

        // Packet 1 is given up on
        assert_eq!(drain(&mut queue), vec![2, 3, 4]);
        assert_eq!(queue.stats().forced_by_time, 1);
        assert!(queue.oldest_queued().is_none());
    }

    #[test]
    fn test_size_limit_skips_lost_packet() {
        let arena = PacketArena::new(8, 32);
        let mut queue = RtpReorderQueue::new(4, Duration::from_secs(10));
        let now = Instant::now();

        queue.add_packet_at(&packet(&arena, 0), now);
        for seq in 2..5 {
            assert_eq!(queue.add_packet_at(&packet(&arena, seq), now), QueueStatus::QueuedNothingReady);
        }
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.add_packet_at(&packet(&arena, 5), now), QueueStatus::QueuedPacketsReady);
        assert_eq!(drain(&mut queue), vec![2, 3, 4, 5]);
        assert_eq!(queue.stats().forced_by_size, 1);
    }

    #[test]
    fn test_queue_holds_reference() {
        let arena = PacketArena::new(4, 32);
        let mut queue = RtpReorderQueue::default();
        let now = Instant::now();

        queue.add_packet_at(&packet(&arena, 0), now);
        let early = packet(&arena, 2);
        assert!(queue.add_packet_at(&early, now).is_queued());
        assert_eq!(early.ref_count(), 2);

        drop(early);
        assert_eq!(arena.in_use(), 1);

        drop(queue);
        assert_eq!(arena.in_use(), 0);
    }

    #[test]
    fn test_packet_behind_forced_position_is_rejected() {
        let arena = PacketArena::new(8, 32);
        let mut queue = RtpReorderQueue::new(16, Duration::from_millis(40));
        let start = Instant::now();

        queue.add_packet_at(&packet(&arena, 0), start);
        queue.add_packet_at(&packet(&arena, 5), start);

        // Time limit moves the queue onto 5, so the late 3 can't be queued
        let late = start + Duration::from_millis(50);
        assert_eq!(queue.add_packet_at(&packet(&arena, 3), late), QueueStatus::Rejected);
        assert_eq!(drain(&mut queue), vec![5]);
    }
}
