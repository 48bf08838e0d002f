//! Listening socket setup.
//!
//! If the configured port cannot be bound because it is taken (or
//! privileged), the next port is tried, up to the end of the 16-bit range.

use mio::net::TcpListener;
use std::io;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

/// Bind a non-blocking listener on `host`, starting at `port`.
///
/// Port 0 asks the OS for an ephemeral port and is never retried.
pub fn bind(host: IpAddr, port: u16) -> io::Result<TcpListener> {
    let mut port = port;
    loop {
        match create_listener(SocketAddr::new(host, port)) {
            Ok(listener) => return Ok(TcpListener::from_std(listener)),
            Err(e) if port != 0 && port < u16::MAX && is_retryable(&e) => {
                debug!(port, error = %e, "Bind failed, trying next port");
                port += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::AddrInUse | io::ErrorKind::PermissionDenied
    )
}

/// Create a TCP listener with SO_REUSEADDR so restarts don't trip on
/// sockets lingering in TIME_WAIT.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
