//! Application configuration
//!
//! Loaded from a TOML file, either at an explicit path or at
//! `config.toml` in the platform config directory. Missing files and
//! missing fields fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::buffer::PoolKind;
use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub audio: AudioConfig,
    pub reorder: ReorderConfig,
    pub input: InputConfig,
    pub playback: PlaybackConfig,
}

/// Media socket settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Address of the streaming host
    pub host: IpAddr,
    /// Host's audio media port
    pub audio_port: u16,
    /// Socket receive buffer size in bytes
    pub recv_buffer_size: usize,
    /// Largest datagram accepted on the audio socket
    pub max_packet_size: usize,
    /// Interval between keep-alive datagrams
    pub keepalive_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            audio_port: DEFAULT_AUDIO_PORT,
            recv_buffer_size: RECV_BUFFER_SIZE,
            max_packet_size: MAX_AUDIO_PACKET_SIZE,
            keepalive_interval_ms: KEEPALIVE_INTERVAL_MS,
        }
    }
}

/// Negotiated audio parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub channel_count: u16,
    pub channel_mask: u32,
    pub sample_rate: u32,
    /// Samples per channel in one decoded unit
    pub samples_per_frame: usize,
    /// Decoded units that may wait for the decode stage
    pub decoded_unit_limit: usize,
    /// Pool implementation; unset picks one from the sink's capabilities
    pub pool_kind: Option<PoolKind>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            channel_count: DEFAULT_CHANNELS,
            channel_mask: DEFAULT_CHANNEL_MASK,
            sample_rate: DEFAULT_SAMPLE_RATE,
            samples_per_frame: SAMPLES_PER_CHANNEL,
            decoded_unit_limit: DECODED_UNIT_LIMIT,
            pool_kind: None,
        }
    }
}

/// Reorder queue limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReorderConfig {
    /// Packets held before the queue skips a hole
    pub max_size: usize,
    /// Time the oldest packet may wait before the queue skips a hole
    pub max_queue_time_ms: u64,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            max_size: REORDER_MAX_SIZE,
            max_queue_time_ms: REORDER_MAX_QUEUE_TIME_MS,
        }
    }
}

/// Outbound input channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub port: u16,
    /// Negotiated host generation, selects packet header variants
    pub server_generation: u32,
    /// Merge queued mouse moves into one packet
    pub coalesce_mouse_moves: bool,
    /// Merge queued gamepad states that keep buttons and axis directions
    pub batch_controller_input: bool,
    pub connect_timeout_ms: u64,
    /// A write blocked this long ends the channel; 0 waits forever
    pub write_timeout_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_INPUT_PORT,
            server_generation: DEFAULT_SERVER_GENERATION,
            coalesce_mouse_moves: true,
            batch_controller_input: true,
            connect_timeout_ms: INPUT_CONNECT_TIMEOUT_MS,
            write_timeout_ms: INPUT_WRITE_TIMEOUT_MS,
        }
    }
}

/// Local playback sink
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output device id as listed by the receiver; default device if unset
    pub device: Option<String>,
    /// Play decoded audio directly on the receive thread
    pub direct_submit: bool,
}

impl AppConfig {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "stream-transport-core")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, or from the default location if `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !required && !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&text)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.reorder.max_size < 2 {
            return Err(Error::Config("reorder.max_size must be at least 2".into()));
        }
        if self.audio.channel_count == 0 {
            return Err(Error::Config("audio.channel_count must be non-zero".into()));
        }
        if self.audio.samples_per_frame == 0 || self.audio.decoded_unit_limit == 0 {
            return Err(Error::Config(
                "audio.samples_per_frame and audio.decoded_unit_limit must be non-zero".into(),
            ));
        }
        if self.stream.max_packet_size <= RTP_HEADER_SIZE {
            return Err(Error::Config(format!(
                "stream.max_packet_size must exceed the {}-byte RTP header",
                RTP_HEADER_SIZE
            )));
        }
        if self.stream.keepalive_interval_ms == 0 {
            return Err(Error::Config("stream.keepalive_interval_ms must be non-zero".into()));
        }
        Ok(())
    }
}
