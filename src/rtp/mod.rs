//! RTP receive path
//!
//! Datagrams land in [`arena`] slots, get parsed into [`RtpPacket`]s and are
//! put back in sequence order by the [`RtpReorderQueue`].

pub mod arena;
pub mod packet;
pub mod reorder;
pub mod sequence;

pub use arena::{PacketArena, PacketBuf};
pub use packet::{PayloadDescriptor, RtpPacket, SequencedPacket};
pub use reorder::{QueueStatus, ReorderStats, RtpReorderQueue};
pub use sequence::{distance, is_before};
