use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::{Duration, Instant};

use stream_transport_core::rtp::{PacketArena, QueueStatus, RtpPacket, RtpReorderQueue, SequencedPacket};

const BATCH: u16 = 256;

fn packet(arena: &PacketArena, seq: u16) -> RtpPacket {
    let mut buf = arena.acquire().expect("free arena slot");
    {
        let mut data = buf.get_mut().expect("exclusive slot");
        data[..12].fill(0);
        data[1] = 97;
        data[2..4].copy_from_slice(&seq.to_be_bytes());
    }
    buf.set_len(12 + 64);
    RtpPacket::parse(buf).expect("full RTP header")
}

/// Arrival order where every `stride`-th pair of packets is swapped
fn arrival_order(stride: u16) -> Vec<u16> {
    let mut order: Vec<u16> = (0..BATCH).collect();
    if stride > 0 {
        for chunk in order.chunks_mut(stride as usize) {
            if chunk.len() >= 2 {
                chunk.swap(0, 1);
            }
        }
    }
    order
}

fn run_batch(order: &[u16], now: Instant) -> usize {
    let arena = PacketArena::new(18, 128);
    let mut queue = RtpReorderQueue::new(16, Duration::from_millis(40));
    let mut delivered = 0;

    for &seq in order {
        let packet = packet(&arena, seq);
        match queue.add_packet_at(&packet, now) {
            QueueStatus::HandleImmediately => delivered += 1,
            QueueStatus::QueuedPacketsReady => {
                while let Some(next) = queue.get_queued_packet() {
                    black_box(next.sequence_number());
                    delivered += 1;
                }
            }
            _ => {}
        }
    }
    delivered
}

fn bench_reorder(c: &mut Criterion) {
    let mut group = c.benchmark_group("reorder_queue");
    let now = Instant::now();

    for (name, stride) in [("in_order", 0u16), ("swap_every_4", 4), ("swap_every_2", 2)] {
        let order = arrival_order(stride);
        group.bench_with_input(BenchmarkId::new("batch", name), &order, |b, order| {
            b.iter(|| run_batch(black_box(order), now))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reorder);
criterion_main!(benches);
