//! TCP socket tuning shared by the server, proxy and client.
//!
//! Game traffic is many small packets, so Nagle is off by default and idle
//! peers are detected with keepalive probes.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};

/// Options applied to every accepted or dialed stream.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Set `TCP_NODELAY`. Default: true.
    pub tcp_nodelay: bool,
    /// Default: true.
    pub keepalive: bool,
    /// Idle time before the first probe. Default: 30s.
    pub keepalive_idle: Duration,
    /// Default: 10s.
    pub keepalive_interval: Duration,
    /// Set `SO_REUSEADDR` on listeners so a restarted server can rebind at
    /// once. Off on Windows, where it means something else.
    pub reuse_addr: bool,
    /// Listen backlog. Default: 128.
    pub backlog: i32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive: true,
            keepalive_idle: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(10),
            reuse_addr: !cfg!(target_os = "windows"),
            backlog: 128,
        }
    }
}

/// Apply `config` to a connected stream.
pub fn configure_stream(stream: &TcpStream, config: &SocketConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    if config.keepalive {
        let keepalive = TcpKeepalive::new()
            .with_time(config.keepalive_idle)
            .with_interval(config.keepalive_interval);
        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }

    Ok(())
}

/// Bind a listener on `addr`. IPv6 listeners accept IPv4 peers too.
pub fn bind_listener(addr: SocketAddr, config: &SocketConfig) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    if config.reuse_addr {
        socket.set_reuse_address(true)?;
    }
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(config.backlog)?;

    TcpListener::from_std(socket.into())
}
