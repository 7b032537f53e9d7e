//! Network plumbing for the media and input channels

pub mod udp;

pub use udp::{create_media_socket, shutdown_socket};
