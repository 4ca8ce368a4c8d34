//! `smo`: run a server, a relay proxy, or a headless client.
//!
//! Run with: `cargo run -p smo-cli -- server --max-players 4`

mod convert;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use smo_config::{CliArgs, Command, Config};
use smo_net::{
    Client, Direction, PacketFilter, Proxy, ProxySource, Server, ServerClient, Verdict, handler,
};
use smo_protocol::{ClientId, Packet};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("smo")
    });

    let stored = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    let mut config = stored.clone();
    config.apply_cli_overrides(&args);

    smo_log::init_logging(
        Some(&config_dir.join("logs")),
        cfg!(debug_assertions),
        Some(&config),
    );

    let result = match args.command {
        Command::Server(_) => run_server(&config).await,
        Command::Proxy(_) => run_proxy(&config).await,
        Command::Client(_) => run_client(&mut config, stored, &config_dir).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Call `stop` on Ctrl-C.
fn stop_on_ctrl_c(stop: impl FnOnce() + Send + 'static) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, shutting down");
                stop();
            }
            Err(e) => warn!("Ctrl-C handler unavailable: {e}"),
        }
    });
}

async fn run_server(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::new(convert::server_config(&config.server)?);

    if config.debug.log_packets {
        server.dispatcher().register(
            PacketFilter::Any,
            Direction::Incoming,
            handler(|client: ServerClient, packet: Arc<Packet>| async move {
                info!("{} {packet}", client.session().id());
                Ok(())
            }),
        );
    }
    server.set_command_handler(|client: ServerClient, command: String| async move {
        info!("{} sent command {command:?}", client.session().id());
        Ok(())
    });

    let stopper = server.clone();
    stop_on_ctrl_c(move || stopper.shutdown());
    server.run().await?;
    Ok(())
}

async fn run_proxy(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let proxy = Proxy::new(convert::proxy_config(&config.proxy)?);

    if config.debug.log_packets {
        proxy.dispatcher().register(
            PacketFilter::Any,
            Direction::Incoming,
            handler(|source: ProxySource, packet: Arc<Packet>| async move {
                info!("{:?} {packet}", source.side());
                Ok(Verdict::Forward)
            }),
        );
    }

    let stopper = proxy.clone();
    stop_on_ctrl_c(move || stopper.shutdown());
    proxy.run().await?;
    Ok(())
}

async fn run_client(
    config: &mut Config,
    mut stored: Config,
    config_dir: &std::path::Path,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.client.client_id.is_nil() {
        let client_id = ClientId::new_v4();
        info!("Generated client id {client_id}");
        config.client.client_id = client_id;
        stored.client.client_id = client_id;
        if let Err(e) = stored.save(config_dir) {
            warn!("Could not persist client id: {e}");
        }
    }

    let client = Client::new(convert::client_config(&config.client));

    if config.debug.log_packets {
        for direction in [Direction::Incoming, Direction::Outgoing] {
            client.on(PacketFilter::Any, direction, move |_, packet| async move {
                info!("{direction:?} {packet}");
                Ok(())
            });
        }
    }

    let stopper = client.clone();
    stop_on_ctrl_c(move || stopper.shutdown());
    client.run().await?;
    Ok(())
}
