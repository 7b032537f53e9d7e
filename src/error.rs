//! Error types for the media transport core

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Buffer pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Playback device errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannelCount(u16),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket setup failed: {0}")]
    SocketSetup(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// Buffer pool capability errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("Blocking is unsupported on this buffer pool")]
    BlockingUnsupported,

    #[error("Buffer pool cannot be shared across threads")]
    NotShareable,

    #[error("Buffer pool is closed")]
    Closed,
}

/// Stream lifecycle errors
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Invalid stream state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Channel count mismatch: stream negotiated {negotiated}, decoder produces {decoder}")]
    ChannelMismatch { negotiated: u16, decoder: u16 },

    #[error("Packet arena exhausted ({0} slots in use)")]
    ArenaExhausted(usize),

    #[error("Failed to spawn stage thread: {0}")]
    ThreadSpawn(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
