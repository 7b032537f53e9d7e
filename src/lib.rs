//! # Stream Transport Core
//!
//! Client-side media transport for low-latency game streaming: receives
//! RTP-framed Opus audio over UDP, restores packet order, decodes and hands
//! PCM to a playback sink, and frames outbound input events.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              STREAMING HOST                              │
//! └───────────┬──────────────────────────────────────────────▲───────────────┘
//!             │ RTP/UDP :48000                       PING    │    input/TCP :35043
//!             ▼                                     (500ms)  │        ▲
//! ┌──────────────────────────────────────────────────────────┼────────┼──────┐
//! │  AudioStream                                             │        │      │
//! │  ┌────────────────────────────────┐   ┌─────────────────┴──┐     │      │
//! │  │ Receive Thread                 │   │ Keep-alive Thread  │     │      │
//! │  │  PacketArena slots             │   └────────────────────┘     │      │
//! │  │        │                       │                              │      │
//! │  │        ▼                       │                              │      │
//! │  │  RtpReorderQueue               │                              │      │
//! │  │        │                       │                              │      │
//! │  │        ▼                       │                              │      │
//! │  │  AudioDepacketizer ── Opus ────┼──► direct-submit sink        │      │
//! │  │        │                       │                              │      │
//! │  └────────┼───────────────────────┘                              │      │
//! │           ▼                                                      │      │
//! │  BufferPool (populated list)                                     │      │
//! │           │                                                      │      │
//! │           ▼                                                      │      │
//! │  ┌────────────────────┐     ┌──────────────┐                     │      │
//! │  │ Decode Thread      │───► │ AudioRenderer│                     │      │
//! │  └────────────────────┘     └──────────────┘                     │      │
//! │                                                                  │      │
//! │  InputStream: events ──► packet framing ──► sender thread ───────┘      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod input;
pub mod network;
pub mod rtp;

pub use error::{Error, Result};

/// Protocol and pipeline constants
pub mod constants {
    /// RTP payload type carrying audio
    pub const AUDIO_PAYLOAD_TYPE: u8 = 97;

    /// Fixed RTP header length
    pub const RTP_HEADER_SIZE: usize = 12;

    /// Host's audio media port
    pub const DEFAULT_AUDIO_PORT: u16 = 48000;

    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Front left | front right
    pub const DEFAULT_CHANNEL_MASK: u32 = 0x3;

    /// Samples per channel in one 5 ms frame at 48 kHz
    pub const SAMPLES_PER_CHANNEL: usize = 240;

    /// Receive buffer requested on the audio socket
    pub const RECV_BUFFER_SIZE: usize = 64 * 1024;

    /// Largest audio datagram we accept
    pub const MAX_AUDIO_PACKET_SIZE: usize = 250;

    /// Keep-alive datagram sent to the audio port
    pub const KEEPALIVE_PAYLOAD: [u8; 4] = *b"PING";

    /// Keep-alive cadence
    pub const KEEPALIVE_INTERVAL_MS: u64 = 500;

    /// Decoded units buffered for the decode stage
    pub const DECODED_UNIT_LIMIT: usize = 30;

    /// Reorder queue packet limit
    pub const REORDER_MAX_SIZE: usize = 16;

    /// Reorder queue time limit
    pub const REORDER_MAX_QUEUE_TIME_MS: u64 = 40;

    /// Host's input port
    pub const DEFAULT_INPUT_PORT: u16 = 35043;

    /// Input channel connect timeout
    pub const INPUT_CONNECT_TIMEOUT_MS: u64 = 3000;

    /// Longest a single input write may block before the channel is dropped
    pub const INPUT_WRITE_TIMEOUT_MS: u64 = 3000;

    /// Host generation assumed when none was negotiated
    pub const DEFAULT_SERVER_GENERATION: u32 = 7;
}
