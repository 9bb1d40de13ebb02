//! Transport socket acquisition
//!
//! `acquire_transport_socket` is the only raw socket call; everything else
//! goes through `tokio::net::TcpSocket`.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};

use tokio::net::{TcpListener, TcpSocket};

use spipe_core::SocketpipeError;

/// Only one rendezvous connection is ever expected
pub const RENDEZVOUS_BACKLOG: u32 = 1;

/// Obtain a fresh socket usable as a stream transport.
///
/// The descriptor is close-on-exec so that only children that are
/// explicitly handed the connection ever see it.
pub fn acquire_transport_socket(
    family: libc::c_int,
    ty: libc::c_int,
    protocol: libc::c_int,
) -> io::Result<OwnedFd> {
    // Safety: socket(2) has no memory-safety preconditions.
    let raw = unsafe { libc::socket(family, ty, protocol) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // Safety: raw is a freshly created descriptor we exclusively own.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    // Safety: fd is open for the duration of the call.
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// An unconnected, non-blocking TCP socket for `addr`'s family with
/// keep-alive enabled.
pub fn stream_socket(addr: &SocketAddr) -> Result<TcpSocket, SocketpipeError> {
    let family = if addr.is_ipv4() {
        libc::AF_INET
    } else {
        libc::AF_INET6
    };
    let fd = acquire_transport_socket(family, libc::SOCK_STREAM, 0)
        .map_err(|e| SocketpipeError::socket("socket allocation", e))?;

    let socket = std::net::TcpStream::from(fd);
    socket
        .set_nonblocking(true)
        .map_err(|e| SocketpipeError::socket("fcntl(O_NONBLOCK)", e))?;
    let socket = TcpSocket::from_std_stream(socket);
    set_keepalive(&socket)?;
    Ok(socket)
}

/// Bind an ephemeral port on the IPv4 wildcard address and listen with a
/// backlog of one.
///
/// Accepted connections inherit SO_KEEPALIVE from the listener. Must be
/// called from within a tokio runtime.
pub fn listen_ephemeral() -> Result<TcpListener, SocketpipeError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    let socket = stream_socket(&addr)?;
    socket
        .bind(addr)
        .map_err(|e| SocketpipeError::socket("bind to local address", e))?;
    socket
        .listen(RENDEZVOUS_BACKLOG)
        .map_err(|e| SocketpipeError::socket("listen", e))
}

/// Turn on SO_KEEPALIVE so a silently vanished peer is eventually noticed
/// on an idle channel.
pub fn set_keepalive(socket: &TcpSocket) -> Result<(), SocketpipeError> {
    socket
        .set_keepalive(true)
        .map_err(|e| SocketpipeError::socket("setsockopt(SO_KEEPALIVE)", e))
}

/// Read back SO_KEEPALIVE from any TCP socket descriptor
pub fn keepalive_enabled<S: AsFd>(socket: &S) -> io::Result<bool> {
    let dup = socket.as_fd().try_clone_to_owned()?;
    TcpSocket::from_std_stream(std::net::TcpStream::from(dup)).keepalive()
}
