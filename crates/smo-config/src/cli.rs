//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use smo_protocol::ClientId;

use crate::Config;

/// `smo` command line. Flags override values loaded from `config.ron`.
#[derive(Parser, Debug)]
#[command(name = "smo", about = "SMO multiplayer server, proxy and client")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Log filter (error, warn, info, debug, trace, or an EnvFilter directive).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Config directory (overrides the platform default).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Turn the per-packet log on or off.
    #[arg(long, global = true)]
    pub log_packets: Option<bool>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a dedicated server.
    Server(ServerArgs),
    /// Relay game clients to an upstream server.
    Proxy(ProxyArgs),
    /// Join a server as a headless player.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct ServerArgs {
    /// Address to bind.
    #[arg(long)]
    pub address: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub max_players: Option<u16>,
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct ProxyArgs {
    /// Address game clients connect to.
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub host_port: Option<u16>,

    /// Upstream server address.
    #[arg(long)]
    pub server: Option<String>,

    #[arg(long)]
    pub server_port: Option<u16>,
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct ClientArgs {
    /// Server address.
    #[arg(long)]
    pub server: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    /// Player name.
    #[arg(long)]
    pub name: Option<String>,

    /// Player id, as 8-4-4-4-12 hex.
    #[arg(long)]
    pub client_id: Option<ClientId>,

    /// Exit instead of reconnecting when the connection drops.
    #[arg(long)]
    pub no_reconnect: bool,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        if let Some(log_packets) = args.log_packets {
            self.debug.log_packets = log_packets;
        }

        match &args.command {
            Command::Server(server) => {
                if let Some(ref address) = server.address {
                    self.server.address = address.clone();
                }
                if let Some(port) = server.port {
                    self.server.port = port;
                }
                if let Some(max_players) = server.max_players {
                    self.server.max_players = max_players;
                }
            }
            Command::Proxy(proxy) => {
                if let Some(ref host) = proxy.host {
                    self.proxy.host_address = host.clone();
                }
                if let Some(port) = proxy.host_port {
                    self.proxy.host_port = port;
                }
                if let Some(ref server) = proxy.server {
                    self.proxy.server_address = server.clone();
                }
                if let Some(port) = proxy.server_port {
                    self.proxy.server_port = port;
                }
            }
            Command::Client(client) => {
                if let Some(ref server) = client.server {
                    self.client.server_address = server.clone();
                }
                if let Some(port) = client.port {
                    self.client.server_port = port;
                }
                if let Some(ref name) = client.name {
                    self.client.name = name.clone();
                }
                if let Some(client_id) = client.client_id {
                    self.client.client_id = client_id;
                }
                if client.no_reconnect {
                    self.client.try_reconnecting = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(command: Command) -> CliArgs {
        CliArgs {
            command,
            log_level: None,
            config: None,
            log_packets: None,
        }
    }

    #[test]
    fn test_server_override() {
        let mut config = Config::default();
        config.apply_cli_overrides(&args(Command::Server(ServerArgs {
            max_players: Some(2),
            ..Default::default()
        })));
        assert_eq!(config.server.max_players, 2);
        assert_eq!(config.server.port, 1027);
        assert_eq!(config.proxy, Config::default().proxy);
    }

    #[test]
    fn test_client_override() {
        let mut config = Config::default();
        let id: ClientId = "3c7f2b0d-6a0e-4f5e-b1a4-9d2c8e7f6a50".parse().unwrap();
        config.apply_cli_overrides(&args(Command::Client(ClientArgs {
            name: Some("Luigi".into()),
            client_id: Some(id),
            no_reconnect: true,
            ..Default::default()
        })));
        assert_eq!(config.client.name, "Luigi");
        assert_eq!(config.client.client_id, id);
        assert!(!config.client.try_reconnecting);
    }

    #[test]
    fn test_no_override() {
        let mut config = Config::default();
        config.apply_cli_overrides(&args(Command::Proxy(ProxyArgs::default())));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_command_line() {
        let parsed = CliArgs::try_parse_from([
            "smo",
            "proxy",
            "--server",
            "smo.example.net",
            "--server-port",
            "1028",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(parsed.log_level.as_deref(), Some("debug"));

        let mut config = Config::default();
        config.apply_cli_overrides(&parsed);
        assert_eq!(config.proxy.server_address, "smo.example.net");
        assert_eq!(config.proxy.server_port, 1028);
        assert_eq!(config.debug.log_level, "debug");
    }

    #[test]
    fn test_bad_client_id_rejected() {
        let parsed = CliArgs::try_parse_from(["smo", "client", "--client-id", "xyz"]);
        assert!(parsed.is_err());
    }
}
