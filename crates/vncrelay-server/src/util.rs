//! Socket helpers for listeners and upstream connections.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream, lookup_host};
use vncrelay_config::TcpConfig;
use vncrelay_core::TargetEndpoint;

/// Create a TCP listener with custom backlog.
///
/// Must be called from within a Tokio runtime.
pub fn create_listener(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;
    TcpListener::from_std(std::net::TcpListener::from(socket))
}

/// Apply TCP_NODELAY and keepalive to an established stream.
pub fn apply_stream_options(stream: &TcpStream, tcp: &TcpConfig) -> io::Result<()> {
    stream.set_nodelay(tcp.no_delay)?;
    if tcp.keepalive_secs > 0 {
        let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(tcp.keepalive_secs));
        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }
    Ok(())
}

/// Connect to target with optional socket buffer configuration.
pub async fn connect_with_buffers(
    target: SocketAddr,
    send_buf: usize,
    recv_buf: usize,
) -> io::Result<TcpStream> {
    let socket = if target.is_ipv4() {
        tokio::net::TcpSocket::new_v4()?
    } else {
        tokio::net::TcpSocket::new_v6()?
    };
    if send_buf > 0 {
        socket.set_send_buffer_size(send_buf.min(u32::MAX as usize) as u32)?;
    }
    if recv_buf > 0 {
        socket.set_recv_buffer_size(recv_buf.min(u32::MAX as usize) as u32)?;
    }
    socket.connect(target).await
}

/// Resolve `target` and connect to the first address that accepts.
///
/// DNS failures surface as connect errors of this call.
pub async fn connect_upstream(target: &TargetEndpoint, tcp: &TcpConfig) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in lookup_host((target.host(), target.port())).await? {
        match connect_with_buffers(addr, tcp.send_buffer, tcp.recv_buffer).await {
            Ok(stream) => {
                apply_stream_options(&stream, tcp)?;
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{target} resolved to no addresses"),
        )
    }))
}
