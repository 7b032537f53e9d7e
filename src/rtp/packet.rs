//! RTP envelope parsing over arena-backed datagrams

use std::cell::Ref;

use crate::buffer::BufferDescriptor;
use crate::constants::RTP_HEADER_SIZE;
use crate::rtp::arena::PacketBuf;

/// A sequence-numbered packet whose storage is shared by reference count.
///
/// Holders that keep a packet beyond the current call (the reorder queue)
/// take their own reference with [`add_ref`](Self::add_ref) and give it up
/// with [`release`](Self::release); the storage is recycled when the count
/// reaches zero.
pub trait SequencedPacket {
    /// RTP payload type tag
    fn packet_type(&self) -> u8;

    /// 16-bit wrapping sequence number
    fn sequence_number(&self) -> u16;

    /// Take an additional reference to the same packet
    fn add_ref(&self) -> Self
    where
        Self: Sized;

    /// Drop this reference, returning the remaining count
    fn release(self) -> usize
    where
        Self: Sized;

    /// Number of live references
    fn ref_count(&self) -> usize;
}

/// Zero-copy view of an RTP payload still sitting in its network buffer
pub type PayloadDescriptor<'a> = BufferDescriptor<Ref<'a, [u8]>>;

/// RTP packet parsed in place from an arena slot
#[derive(Debug, Clone)]
pub struct RtpPacket {
    buf: PacketBuf,
    packet_type: u8,
    sequence_number: u16,
}

impl RtpPacket {
    /// Parse the fixed RTP header of the datagram held by `buf`.
    ///
    /// Datagrams shorter than the header are handed back unchanged.
    pub fn parse(buf: PacketBuf) -> Result<Self, PacketBuf> {
        if buf.len() < RTP_HEADER_SIZE {
            return Err(buf);
        }

        // First byte carries version/flags we don't use
        let (packet_type, sequence_number) = {
            let bytes = buf.bytes();
            (bytes[1], u16::from_be_bytes([bytes[2], bytes[3]]))
        };

        Ok(Self {
            buf,
            packet_type,
            sequence_number,
        })
    }

    /// RTP timestamp field
    pub fn timestamp(&self) -> u32 {
        let bytes = self.buf.bytes();
        u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]])
    }

    /// Payload following the RTP header
    pub fn payload(&self) -> PayloadDescriptor<'_> {
        let len = self.buf.len();
        BufferDescriptor::new(self.buf.bytes(), RTP_HEADER_SIZE, len - RTP_HEADER_SIZE)
    }

    /// Length of the whole datagram
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Give back the underlying buffer handle
    pub fn into_buffer(self) -> PacketBuf {
        self.buf
    }
}

impl SequencedPacket for RtpPacket {
    fn packet_type(&self) -> u8 {
        self.packet_type
    }

    fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    fn add_ref(&self) -> Self {
        self.clone()
    }

    fn release(self) -> usize {
        self.buf.release()
    }

    fn ref_count(&self) -> usize {
        self.buf.ref_count()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rtp::arena::PacketArena;

    /// Build an RTP datagram in a fresh arena slot
    pub(crate) fn datagram(arena: &PacketArena, packet_type: u8, seq: u16, payload: &[u8]) -> PacketBuf {
        let mut buf = arena.acquire().expect("arena slot");
        let len = RTP_HEADER_SIZE + payload.len();
        {
            let mut data = buf.get_mut().expect("exclusive slot");
            data[0] = 0x80;
            data[1] = packet_type;
            data[2..4].copy_from_slice(&seq.to_be_bytes());
            data[4..8].copy_from_slice(&1234u32.to_be_bytes());
            data[8..12].copy_from_slice(&0xdead_beefu32.to_be_bytes());
            data[RTP_HEADER_SIZE..len].copy_from_slice(payload);
        }
        buf.set_len(len);
        buf
    }

    #[test]
    fn test_parse_header() {
        let arena = PacketArena::new(1, 64);
        let packet = RtpPacket::parse(datagram(&arena, 97, 0xbeef, &[1, 2, 3])).unwrap();

        assert_eq!(packet.packet_type(), 97);
        assert_eq!(packet.sequence_number(), 0xbeef);
        assert_eq!(packet.timestamp(), 1234);
        assert_eq!(packet.payload().as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_runt_is_returned() {
        let arena = PacketArena::new(1, 64);
        let mut buf = arena.acquire().unwrap();
        buf.set_len(5);
        let buf = RtpPacket::parse(buf).unwrap_err();
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_references_share_slot() {
        let arena = PacketArena::new(2, 64);
        let packet = RtpPacket::parse(datagram(&arena, 97, 1, &[])).unwrap();
        let queued = packet.add_ref();
        assert_eq!(packet.ref_count(), 2);

        assert_eq!(packet.release(), 1);
        assert_eq!(arena.free_slots(), 1);
        assert_eq!(queued.release(), 0);
        assert_eq!(arena.free_slots(), 2);
    }
}
