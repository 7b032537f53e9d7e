//! Audio subsystem module

pub mod buffer;
pub mod depacketizer;
#[cfg(feature = "playback")]
pub mod device;
#[cfg(feature = "playback")]
pub mod playback;
pub mod renderer;
pub mod stats;
pub mod stream;

pub use buffer::{create_shared_ring, SampleRing, SharedSampleRing};
pub use depacketizer::{AudioDepacketizer, DecodedAudioQueue};
#[cfg(feature = "playback")]
pub use device::{get_device_by_id, list_devices, AudioDevice, AudioDeviceInfo};
#[cfg(feature = "playback")]
pub use playback::CpalRenderer;
pub use renderer::{AudioRenderer, ConnectionListener, LoggingListener, CAPABILITY_DIRECT_SUBMIT};
pub use stats::{StreamStats, StreamStatsSnapshot};
pub use stream::{AbortHandle, AudioStream, StreamState};
