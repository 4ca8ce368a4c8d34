//! Game-client side of the handshake.
//!
//! [`Client::run`] dials the server, waits for `Init`, answers with
//! `PlayerConnect` and then dispatches everything the server sends. When the
//! connection drops it redials with backoff, announcing itself as a
//! reconnect. The lifecycle is published through a [`watch`] channel.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use smo_protocol::{ClientId, ConnectionType, Packet, PacketBody, PacketKind, PlayerConnect};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::dispatch::{DispatchMode, Direction, Dispatcher, ListenerId, PacketFilter, handler};
use crate::reconnect::{ReconnectConfig, ReconnectError, ReconnectState, dial};
use crate::socket::SocketConfig;
use crate::{ConnectionError, DEFAULT_PORT, HandlerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dialing the server, possibly between backoff delays.
    Connecting,
    /// Stream open, waiting for the server's `Init`.
    AwaitingInit,
    /// `PlayerConnect` sent; normal traffic.
    Connected,
    /// The stream ended. Followed by `Connecting` or `Stopped`.
    ConnectionLost,
    /// Not running.
    Stopped,
}

/// Observable [`ConnectionState`].
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Starts out [`ConnectionState::Stopped`].
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Stopped);
        Self { tx }
    }

    pub fn set(&self, state: ConnectionState) {
        self.tx.send_replace(state);
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port`. Default: `127.0.0.1:1027`.
    pub server_addr: String,
    /// Player name sent in `PlayerConnect`.
    pub name: String,
    /// Identity stamped on every packet this client creates.
    pub client_id: ClientId,
    /// Redial after the connection drops. Default: true.
    pub try_reconnecting: bool,
    pub reconnect: ReconnectConfig,
    pub socket: SocketConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            name: String::from("Mario"),
            client_id: ClientId::NIL,
            try_reconnecting: true,
            reconnect: ReconnectConfig::default(),
            socket: SocketConfig::default(),
        }
    }
}

struct ClientInner {
    config: ClientConfig,
    dispatcher: Dispatcher<Client, ()>,
    connection: RwLock<Option<Arc<Connection>>>,
    sequential: AtomicBool,
    connection_type: Mutex<ConnectionType>,
    state: ConnectionStateWatch,
    cancel: CancellationToken,
}

/// Handle to a client. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let client = Self {
            inner: Arc::new(ClientInner {
                config,
                dispatcher: Dispatcher::new(),
                connection: RwLock::new(None),
                sequential: AtomicBool::new(true),
                connection_type: Mutex::new(ConnectionType::Init),
                state: ConnectionStateWatch::new(),
                cancel: CancellationToken::new(),
            }),
        };

        client.inner.dispatcher.register(
            PacketKind::Init,
            Direction::Incoming,
            handler(|client: Client, _packet: Arc<Packet>| async move { client.on_init().await }),
        );
        client
    }

    pub fn dispatcher(&self) -> &Dispatcher<Client, ()> {
        &self.inner.dispatcher
    }

    /// Shorthand for registering an async closure on the dispatcher.
    pub fn on<F, Fut>(&self, filter: impl Into<PacketFilter>, direction: Direction, f: F) -> ListenerId
    where
        F: Fn(Client, Arc<Packet>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.inner.dispatcher.register(filter, direction, handler(f))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> &ConnectionStateWatch {
        &self.inner.state
    }

    /// The live connection, if any.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.inner.connection.read().clone()
    }

    pub fn create_packet(&self, body: impl Into<PacketBody>) -> Packet {
        Packet::new(self.inner.config.client_id, body)
    }

    fn dispatch_mode(&self) -> DispatchMode {
        if self.inner.sequential.load(Ordering::Acquire) {
            DispatchMode::Sequential
        } else {
            DispatchMode::Concurrent
        }
    }

    /// Send `packet`, then run the outgoing listeners for it.
    pub async fn write_packet(&self, packet: Packet) -> Result<(), ConnectionError> {
        let connection = self.connection().ok_or(ConnectionError::NotConnected)?;
        connection.write_packet(&packet).await?;

        self.inner
            .dispatcher
            .dispatch(
                self.clone(),
                Arc::new(packet),
                Direction::Outgoing,
                self.dispatch_mode(),
            )
            .await;
        Ok(())
    }

    async fn on_init(&self) -> Result<(), HandlerError> {
        self.inner.sequential.store(false, Ordering::Release);

        let connection_type = *self.inner.connection_type.lock();
        let connect = self.create_packet(PlayerConnect::new(
            connection_type,
            self.inner.config.name.clone(),
        ));
        self.write_packet(connect).await?;

        *self.inner.connection_type.lock() = ConnectionType::Reconnect;
        self.inner.state.set(ConnectionState::Connected);
        tracing::info!(
            "Joined as {:?} ({connection_type:?})",
            self.inner.config.name
        );
        Ok(())
    }

    /// Connect and serve until [`shutdown`](Self::shutdown), or until the
    /// connection drops with reconnecting disabled.
    pub async fn run(&self) -> Result<(), ReconnectError> {
        let result = self.run_loop().await;
        self.inner.state.set(ConnectionState::Stopped);
        result
    }

    async fn run_loop(&self) -> Result<(), ReconnectError> {
        let config = &self.inner.config;
        let cancel = &self.inner.cancel;
        let mut backoff = ReconnectState::new(config.reconnect.clone());

        loop {
            self.inner.state.set(ConnectionState::Connecting);
            let stream = match dial(&config.server_addr, &mut backoff, cancel).await {
                Ok(stream) => stream,
                Err(ReconnectError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            };

            let joined = match Connection::from_tcp(stream, &config.socket) {
                Ok(connection) => self.serve(Arc::new(connection)).await,
                Err(e) => {
                    tracing::warn!("Could not set up connection: {e}");
                    false
                }
            };

            if cancel.is_cancelled() {
                return Ok(());
            }
            self.inner.state.set(ConnectionState::ConnectionLost);
            tracing::warn!("Lost connection to {}", config.server_addr);
            if !config.try_reconnecting {
                return Ok(());
            }

            // A server that hangs up before the handshake completes is
            // redialed with backoff, not in a tight loop.
            if joined {
                backoff.reset();
            } else {
                let delay = backoff
                    .next_delay()
                    .ok_or_else(|| ReconnectError::MaxAttemptsExhausted(backoff.attempts()))?;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    /// Read and dispatch until the stream ends. Returns whether the handshake
    /// completed on this connection.
    async fn serve(&self, connection: Arc<Connection>) -> bool {
        connection.set_client_id(self.inner.config.client_id);
        self.inner.sequential.store(true, Ordering::Release);
        *self.inner.connection.write() = Some(Arc::clone(&connection));
        self.inner.state.set(ConnectionState::AwaitingInit);
        tracing::info!("Connected to {connection}");

        loop {
            let packet = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                packet = connection.read_packet() => packet,
            };
            let Some(packet) = packet else { break };

            self.inner
                .dispatcher
                .dispatch(
                    self.clone(),
                    Arc::new(packet),
                    Direction::Incoming,
                    self.dispatch_mode(),
                )
                .await;
        }

        *self.inner.connection.write() = None;
        connection.wait_closed().await;
        self.inner.state.current() == ConnectionState::Connected
    }

    /// Stop [`run`](Self::run) and close the live connection.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        if let Some(connection) = self.connection() {
            connection.close();
        }
    }
}
