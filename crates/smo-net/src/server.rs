//! Star-topology session server.
//!
//! Each accepted stream becomes a [`Session`]. The server greets it with
//! `Init`, then feeds every packet it sends through the dispatcher. The
//! built-in listener chain relays packets to the other connected sessions,
//! admits players on `PlayerConnect` and replays the existing players to a
//! newcomer.
//!
//! Lock order is `sessions` then a session's `state`. Neither lock is held
//! across an await.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use smo_protocol::{
    ClientId, ConnectionType, Init, Packet, PacketBody, PacketKind, PlayerConnect, PlayerDisconnect,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::task::TaskTracker;

use crate::connection::{Connection, ConnectionId, IdGenerator};
use crate::dispatch::{
    DispatchMode, Direction, Dispatcher, HandlerFuture, ListenerChain, PacketFilter, handler,
};
use crate::socket::{SocketConfig, bind_listener};
use crate::{ConnectionError, DEFAULT_PORT, HandlerError};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Default: `0.0.0.0:1027`.
    pub bind_addr: SocketAddr,
    /// Connected players allowed at once. Also advertised in `Init`. Default: 8.
    pub max_players: u16,
    pub socket: SocketConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_players: 8,
            socket: SocketConfig::default(),
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    name: Option<String>,
    game_info: Option<Arc<Packet>>,
    costume_info: Option<Arc<Packet>>,
}

/// One client of the server. Connected once admitted with a name.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    connection: Connection,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn client_id(&self) -> ClientId {
        self.connection.client_id()
    }

    pub fn name(&self) -> Option<String> {
        self.state.lock().name.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().name.is_some()
    }

    /// Last `GameInfo` this session sent.
    pub fn game_info(&self) -> Option<Arc<Packet>> {
        self.state.lock().game_info.clone()
    }

    /// Last `CostumeInfo` this session sent.
    pub fn costume_info(&self) -> Option<Arc<Packet>> {
        self.state.lock().costume_info.clone()
    }
}

/// Listener context: the session a packet came from, plus server access.
#[derive(Clone)]
pub struct ServerClient {
    server: Arc<ServerInner>,
    session: Arc<Session>,
}

impl ServerClient {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn client_id(&self) -> ClientId {
        self.session.client_id()
    }

    pub fn create_packet(&self, body: impl Into<PacketBody>) -> Packet {
        self.session.connection.create_packet(body)
    }

    /// Write to this session only.
    pub async fn send(&self, packet: &Packet) -> Result<(), ConnectionError> {
        self.session.connection.write_packet(packet).await
    }

    /// Write to every other connected session. Failures on individual peers
    /// are logged and do not stop the broadcast.
    pub async fn broadcast(&self, packet: &Packet) {
        for peer in self.server.connected_peers(self.session.id) {
            if let Err(e) = peer.connection.write_packet(packet).await {
                tracing::debug!("Broadcast to {} failed: {e}", peer.id);
            }
        }
    }

    /// Drop this session. The read loop ends and cleanup runs.
    pub fn close(&self) {
        self.session.connection.close();
    }
}

/// Callback for `ServerCommand` packets.
pub type CommandHandler = Arc<dyn Fn(ServerClient, String) -> HandlerFuture<()> + Send + Sync>;

struct ServerInner {
    config: ServerConfig,
    dispatcher: Dispatcher<ServerClient, ()>,
    sessions: Mutex<BTreeMap<ConnectionId, Arc<Session>>>,
    ids: IdGenerator,
    command_handler: RwLock<Option<CommandHandler>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: TaskTracker,
}

/// The session server. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let server = Self {
            inner: Arc::new(ServerInner {
                config,
                dispatcher: Dispatcher::new(),
                sessions: Mutex::new(BTreeMap::new()),
                ids: IdGenerator::new(),
                command_handler: RwLock::new(None),
                shutdown_tx,
                tasks: TaskTracker::new(),
            }),
        };

        server.inner.dispatcher.register_chain(
            Direction::Incoming,
            ListenerChain::new(PacketFilter::Any, handler(relay))
                .with_override(PacketKind::PlayerConnect, handler(on_player_connect))
                .with_override(PacketKind::GameInfo, handler(on_game_info))
                .with_override(PacketKind::CostumeInfo, handler(on_costume_info))
                .with_override(PacketKind::ServerCommand, handler(on_server_command))
                .with_override(
                    PacketKind::ShineCollect,
                    handler(|_: ServerClient, _: Arc<Packet>| async { Ok(()) }),
                ),
        );
        server
    }

    /// Register extra listeners here, e.g. a packet log.
    pub fn dispatcher(&self) -> &Dispatcher<ServerClient, ()> {
        &self.inner.dispatcher
    }

    pub fn set_command_handler<F, Fut>(&self, f: F)
    where
        F: Fn(ServerClient, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let f: CommandHandler = Arc::new(move |client, command| Box::pin(f(client, command)));
        *self.inner.command_handler.write() = Some(f);
    }

    pub fn max_players(&self) -> u16 {
        self.inner.config.max_players
    }

    /// Snapshot of admitted sessions, in accept order.
    pub fn connected_sessions(&self) -> Vec<Arc<Session>> {
        self.inner
            .sessions
            .lock()
            .values()
            .filter(|s| s.is_connected())
            .cloned()
            .collect()
    }

    /// All open sessions, admitted or not.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub async fn run(&self) -> std::io::Result<()> {
        let listener = bind_listener(self.inner.config.bind_addr, &self.inner.config.socket)?;
        tracing::info!(
            "Server listening on {} (max {} players)",
            self.inner.config.bind_addr,
            self.inner.config.max_players
        );
        self.run_with_listener(listener).await
    }

    pub async fn run_with_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Accept failed: {e}");
                            continue;
                        }
                    };
                    let inner = Arc::clone(&self.inner);
                    self.inner.tasks.spawn(async move {
                        if let Err(e) = inner.serve(stream).await {
                            tracing::warn!("Session for {peer} failed: {e}");
                        }
                    });
                }
                _ = shutdown_rx.wait_for(|stop| *stop) => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        let sessions: Vec<_> = self.inner.sessions.lock().values().cloned().collect();
        for session in sessions {
            session.connection.close();
        }
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Stop accepting and close every session. [`run`](Self::run) returns
    /// once every session task has finished.
    pub fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
    }
}

impl ServerInner {
    async fn serve(self: Arc<Self>, stream: TcpStream) -> std::io::Result<()> {
        let session = Arc::new(Session {
            id: self.ids.next_id(),
            connection: Connection::from_tcp(stream, &self.config.socket)?,
            state: Mutex::new(SessionState::default()),
        });
        self.sessions.lock().insert(session.id, Arc::clone(&session));
        if *self.shutdown_tx.borrow() {
            session.connection.close();
        }
        tracing::info!("{} accepted from {}", session.id, session.connection);

        let client = ServerClient {
            server: Arc::clone(&self),
            session: Arc::clone(&session),
        };

        let init = session.connection.create_packet(Init {
            max_players: self.config.max_players,
        });
        match session.connection.write_packet(&init).await {
            Ok(()) => {
                while let Some(packet) = session.connection.read_packet().await {
                    let mode = if session.is_connected() {
                        DispatchMode::Concurrent
                    } else {
                        DispatchMode::Sequential
                    };
                    self.dispatcher
                        .dispatch(client.clone(), Arc::new(packet), Direction::Incoming, mode)
                        .await;
                }
            }
            Err(e) => tracing::debug!("{}: could not send Init: {e}", session.id),
        }

        self.on_disconnect(&session).await;
        session.connection.wait_closed().await;
        Ok(())
    }

    fn connected_peers(&self, except: ConnectionId) -> Vec<Arc<Session>> {
        self.sessions
            .lock()
            .values()
            .filter(|s| s.id != except && s.is_connected())
            .cloned()
            .collect()
    }

    /// Admit `session` under `name` if there is room. Returns the peers that
    /// were connected at that moment.
    fn admit(&self, session: &Session, client_id: ClientId, name: &str) -> Option<Vec<Arc<Session>>> {
        let sessions = self.sessions.lock();
        let peers: Vec<_> = sessions
            .values()
            .filter(|s| s.id != session.id && s.is_connected())
            .cloned()
            .collect();
        if peers.len() >= usize::from(self.config.max_players) {
            return None;
        }

        session.connection.set_client_id(client_id);
        session.state.lock().name = Some(name.to_owned());
        Some(peers)
    }

    async fn on_disconnect(&self, session: &Session) {
        let removed = self.sessions.lock().remove(&session.id).is_some();
        if !removed {
            return;
        }
        tracing::info!("{} disconnected", session.id);

        if session.is_connected() {
            let packet = session.connection.create_packet(PlayerDisconnect);
            for peer in self.connected_peers(session.id) {
                if let Err(e) = peer.connection.write_packet(&packet).await {
                    tracing::debug!("Disconnect notice to {} failed: {e}", peer.id);
                }
            }
        }
    }
}

async fn relay(client: ServerClient, packet: Arc<Packet>) -> Result<(), HandlerError> {
    client.broadcast(&packet).await;
    Ok(())
}

async fn on_player_connect(client: ServerClient, packet: Arc<Packet>) -> Result<(), HandlerError> {
    let PacketBody::PlayerConnect(connect) = &packet.body else {
        return Ok(());
    };

    let Some(peers) = client
        .server
        .admit(&client.session, packet.client_id, &connect.name)
    else {
        tracing::warn!(
            "{} rejected: server full ({} players)",
            client.session.id,
            client.server.config.max_players
        );
        client.close();
        return Ok(());
    };
    tracing::info!(
        "{} joined as {:?} ({})",
        client.session.id,
        connect.name,
        packet.client_id
    );

    for peer in peers {
        if let Some(game_info) = peer.game_info() {
            client.send(&game_info).await?;
        }

        let Some(name) = peer.name() else { continue };
        let announce = Packet::new(
            peer.client_id(),
            PlayerConnect {
                connection_type: ConnectionType::Init,
                max_players: client.server.config.max_players,
                name,
            },
        );
        client.send(&announce).await?;

        if let Some(costume_info) = peer.costume_info() {
            client.send(&costume_info).await?;
        }
    }
    Ok(())
}

async fn on_game_info(client: ServerClient, packet: Arc<Packet>) -> Result<(), HandlerError> {
    client.session.state.lock().game_info = Some(Arc::clone(&packet));
    client.broadcast(&packet).await;
    Ok(())
}

async fn on_costume_info(client: ServerClient, packet: Arc<Packet>) -> Result<(), HandlerError> {
    client.session.state.lock().costume_info = Some(Arc::clone(&packet));
    client.broadcast(&packet).await;
    Ok(())
}

async fn on_server_command(client: ServerClient, packet: Arc<Packet>) -> Result<(), HandlerError> {
    let PacketBody::ServerCommand(command) = &packet.body else {
        return Ok(());
    };
    let callback = client.server.command_handler.read().clone();
    match callback {
        Some(callback) => callback(client, command.command.clone()).await,
        None => {
            tracing::debug!("Ignoring command {:?}", command.command);
            Ok(())
        }
    }
}
