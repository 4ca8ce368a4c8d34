//! Turning `config.ron` sections into runtime settings.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use smo_config::{ClientSection, ProxySection, ServerSection};
use smo_net::{ClientConfig, ProxyConfig, ReconnectConfig, ServerConfig};

/// Resolve `host:port` to the first address it names.
fn resolve(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("{host}:{port} did not resolve"),
        )
    })
}

/// `host:port` text, bracketing bare IPv6 literals.
fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

pub fn server_config(section: &ServerSection) -> std::io::Result<ServerConfig> {
    Ok(ServerConfig {
        bind_addr: resolve(&section.address, section.port)?,
        max_players: section.max_players,
        ..ServerConfig::default()
    })
}

pub fn proxy_config(section: &ProxySection) -> std::io::Result<ProxyConfig> {
    Ok(ProxyConfig {
        host_addr: resolve(&section.host_address, section.host_port)?,
        server_addr: join_host_port(&section.server_address, section.server_port),
        ..ProxyConfig::default()
    })
}

pub fn client_config(section: &ClientSection) -> ClientConfig {
    ClientConfig {
        server_addr: join_host_port(&section.server_address, section.server_port),
        name: section.name.clone(),
        client_id: section.client_id,
        try_reconnecting: section.try_reconnecting,
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(section.reconnect_initial_ms),
            max_delay: Duration::from_millis(section.reconnect_max_ms),
            max_attempts: section.reconnect_max_attempts,
            ..ReconnectConfig::default()
        },
        ..ClientConfig::default()
    }
}
