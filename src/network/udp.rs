//! Media socket setup and teardown

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, UdpSocket};
use std::time::Duration;

use crate::error::NetworkError;

/// Create the unconnected UDP socket used for a media stream.
///
/// The socket is bound to an ephemeral port in the same address family as
/// `host` with the requested receive buffer. `poll_interval` bounds how long a
/// receive blocks before the caller gets a chance to check for shutdown.
pub fn create_media_socket(
    host: IpAddr,
    recv_buffer_size: usize,
    poll_interval: Duration,
) -> Result<UdpSocket, NetworkError> {
    let (domain, unspecified) = match host {
        IpAddr::V4(_) => (Domain::IPV4, IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        IpAddr::V6(_) => (Domain::IPV6, IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::SocketSetup(e.to_string()))?;

    // The OS may clamp the size; a smaller buffer is not fatal
    if let Err(e) = socket.set_recv_buffer_size(recv_buffer_size) {
        tracing::warn!("Failed to set receive buffer to {} bytes: {}", recv_buffer_size, e);
    }

    socket
        .bind(&SocketAddr::new(unspecified, 0).into())
        .map_err(|e| NetworkError::SocketSetup(e.to_string()))?;

    socket
        .set_read_timeout(Some(poll_interval))
        .map_err(|e| NetworkError::SocketSetup(e.to_string()))?;

    Ok(socket.into())
}

/// Shut the socket down so a thread blocked in receive returns
pub fn shutdown_socket(socket: &UdpSocket) {
    match SockRef::from(socket).shutdown(Shutdown::Both) {
        Ok(()) => {}
        // Unconnected UDP sockets report this even though receivers are woken
        Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
        Err(e) => tracing::debug!("Socket shutdown failed: {}", e),
    }
}

/// Receive errors that only mean "nothing arrived yet"
pub fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Receive errors caused by an ICMP reply to an earlier send
pub fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}
