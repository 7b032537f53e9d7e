//! Property tests for packet ordering and buffer accounting

use proptest::prelude::*;
use std::time::{Duration, Instant};

use stream_transport_core::buffer::{new_pool, BufferPool, PoolKind};
use stream_transport_core::rtp::{is_before, PacketArena, QueueStatus, RtpPacket, RtpReorderQueue, SequencedPacket};

const SLOT_SIZE: usize = 64;

fn packet(arena: &PacketArena, seq: u16) -> RtpPacket {
    let mut buf = arena.acquire().expect("free arena slot");
    {
        let mut data = buf.get_mut().expect("exclusive slot");
        data[..12].fill(0);
        data[0] = 0x80;
        data[1] = 97;
        data[2..4].copy_from_slice(&seq.to_be_bytes());
        data[12] = seq as u8;
    }
    buf.set_len(13);
    RtpPacket::parse(buf).expect("full RTP header")
}

/// Offer one packet and collect everything it releases, in order
fn offer(queue: &mut RtpReorderQueue<RtpPacket>, packet: &RtpPacket, now: Instant, delivered: &mut Vec<u16>) {
    match queue.add_packet_at(packet, now) {
        QueueStatus::HandleImmediately => delivered.push(packet.sequence_number()),
        QueueStatus::QueuedPacketsReady => {
            while let Some(next) = queue.get_queued_packet() {
                delivered.push(next.sequence_number());
            }
        }
        QueueStatus::QueuedNothingReady | QueueStatus::Rejected => {}
    }
}

proptest! {
    #[test]
    fn permutation_is_delivered_in_order(
        base in any::<u16>(),
        rest in Just((1u16..24).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        let arena = PacketArena::new(32, SLOT_SIZE);
        let mut queue = RtpReorderQueue::new(32, Duration::from_secs(60));
        let now = Instant::now();
        let mut delivered = Vec::new();

        for offset in std::iter::once(0).chain(rest) {
            let packet = packet(&arena, base.wrapping_add(offset));
            offer(&mut queue, &packet, now, &mut delivered);
        }

        let expected: Vec<u16> = (0u16..24).map(|offset| base.wrapping_add(offset)).collect();
        prop_assert_eq!(delivered, expected);
        prop_assert!(queue.is_empty());
        prop_assert_eq!(arena.in_use(), 0);
    }

    #[test]
    fn delivery_is_monotonic_and_bounded(
        base in any::<u16>(),
        max_size in 2usize..8,
        arrivals in prop::collection::vec((0u16..64, 0u64..20), 1..200),
    ) {
        let arena = PacketArena::new(max_size + 2, SLOT_SIZE);
        let mut queue = RtpReorderQueue::new(max_size, Duration::from_millis(40));
        let start = Instant::now();
        let mut elapsed = 0;
        let mut delivered = Vec::new();

        for (offset, gap_ms) in arrivals {
            elapsed += gap_ms;
            let packet = packet(&arena, base.wrapping_add(offset));
            offer(&mut queue, &packet, start + Duration::from_millis(elapsed), &mut delivered);
            drop(packet);

            prop_assert!(queue.len() <= max_size);
            prop_assert_eq!(arena.in_use(), queue.len());
        }

        for pair in delivered.windows(2) {
            prop_assert!(is_before(pair[0], pair[1], false), "{} delivered before {}", pair[0], pair[1]);
        }

        drop(queue);
        prop_assert_eq!(arena.free_slots(), arena.capacity());
    }

    #[test]
    fn pool_conserves_objects(
        atomic in any::<bool>(),
        capacity in 1usize..8,
        ops in prop::collection::vec(0u8..4, 0..100),
    ) {
        let kind = if atomic { PoolKind::Atomic } else { PoolKind::Unsynchronized };
        let pool: Box<dyn BufferPool<Vec<u8>>> = new_pool(kind, capacity, || vec![0u8; 4]);
        let mut filling = Vec::new();
        let mut consuming = Vec::new();

        for op in ops {
            match op {
                0 => filling.extend(pool.poll_free()),
                1 => {
                    if let Some(object) = filling.pop() {
                        pool.add_populated(object);
                    }
                }
                2 => consuming.extend(pool.poll_populated()),
                _ => {
                    if let Some(object) = consuming.pop() {
                        pool.free_populated(object);
                    }
                }
            }

            let held = filling.len() + consuming.len();
            prop_assert_eq!(pool.free_count() + pool.populated_count() + held, capacity);
            prop_assert_eq!(pool.checked_out(), held);
        }
    }
}
