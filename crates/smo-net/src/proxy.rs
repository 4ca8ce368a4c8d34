//! Transparent relay between game clients and an upstream server.
//!
//! Every accepted client gets its own upstream connection; the two form a
//! [`ProxyPair`]. Packets read from either side are shown to the registered
//! listeners and then written to the other side unless some listener voted
//! [`Verdict::Suppress`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use smo_protocol::{ClientId, Packet, PacketKind};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::task::TaskTracker;

use crate::connection::{Connection, ConnectionId, IdGenerator};
use crate::dispatch::{DispatchMode, Direction, Dispatcher, handler};
use crate::socket::{SocketConfig, bind_listener};
use crate::{ConnectionError, DEFAULT_PORT};

/// A listener's vote on whether the packet continues to the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    Suppress,
}

/// One end of a [`ProxyPair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The game client that connected to the proxy.
    Client,
    /// The upstream server the proxy dialed.
    Server,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Where game clients connect. Default: `0.0.0.0:1027`.
    pub host_addr: SocketAddr,
    /// Upstream server, as `host:port`.
    pub server_addr: String,
    pub socket: SocketConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            server_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            socket: SocketConfig::default(),
        }
    }
}

/// A downstream client connection and its dedicated upstream connection.
///
/// The pair shares one closing state: closing either side closes both. The
/// tracked client id lives on the upstream connection.
#[derive(Debug)]
pub struct ProxyPair {
    id: ConnectionId,
    client: Connection,
    server: Connection,
}

impl ProxyPair {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn connection(&self, side: Side) -> &Connection {
        match side {
            Side::Client => &self.client,
            Side::Server => &self.server,
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.server.client_id()
    }

    pub fn set_client_id(&self, client_id: ClientId) {
        self.server.set_client_id(client_id);
    }

    pub fn close(&self) {
        self.client.close();
        self.server.close();
    }

    pub fn is_closing(&self) -> bool {
        self.client.is_closing() || self.server.is_closing()
    }

    pub async fn wait_closed(&self) {
        self.client.wait_closed().await;
        self.server.wait_closed().await;
    }
}

/// Listener context: the pair plus the side the packet was read from.
#[derive(Debug, Clone)]
pub struct ProxySource {
    pair: Arc<ProxyPair>,
    side: Side,
}

impl ProxySource {
    pub fn side(&self) -> Side {
        self.side
    }

    pub fn pair(&self) -> &Arc<ProxyPair> {
        &self.pair
    }

    /// Connection the packet arrived on.
    pub fn source(&self) -> &Connection {
        self.pair.connection(self.side)
    }

    /// Connection the packet is headed for.
    pub fn destination(&self) -> &Connection {
        self.pair.connection(self.side.opposite())
    }

    pub fn client_id(&self) -> ClientId {
        self.pair.client_id()
    }

    pub fn set_client_id(&self, client_id: ClientId) {
        self.pair.set_client_id(client_id);
    }

    /// Send a packet back to where this one came from.
    pub async fn reply(&self, packet: &Packet) -> Result<(), ConnectionError> {
        self.source().write_packet(packet).await
    }

    /// Write a packet to either side, outside the normal relay path.
    pub async fn inject(&self, side: Side, packet: &Packet) -> Result<(), ConnectionError> {
        self.pair.connection(side).write_packet(packet).await
    }
}

struct ProxyInner {
    config: ProxyConfig,
    dispatcher: Dispatcher<ProxySource, Verdict>,
    pairs: Mutex<HashMap<ConnectionId, Arc<ProxyPair>>>,
    ids: IdGenerator,
    shutdown_tx: watch::Sender<bool>,
    tasks: TaskTracker,
}

/// The relay. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl Proxy {
    pub fn new(config: ProxyConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let proxy = Self {
            inner: Arc::new(ProxyInner {
                config,
                dispatcher: Dispatcher::new(),
                pairs: Mutex::new(HashMap::new()),
                ids: IdGenerator::new(),
                shutdown_tx,
                tasks: TaskTracker::new(),
            }),
        };

        proxy.inner.dispatcher.register(
            PacketKind::PlayerConnect,
            Direction::Incoming,
            handler(|source: ProxySource, packet: Arc<Packet>| async move {
                source.set_client_id(packet.client_id);
                Ok(Verdict::Forward)
            }),
        );
        proxy
    }

    /// Register listeners here. They run concurrently for each packet.
    pub fn dispatcher(&self) -> &Dispatcher<ProxySource, Verdict> {
        &self.inner.dispatcher
    }

    /// Snapshot of the live pairs.
    pub fn clients(&self) -> Vec<Arc<ProxyPair>> {
        self.inner.pairs.lock().values().cloned().collect()
    }

    /// Bind the configured host address and serve until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = bind_listener(self.inner.config.host_addr, &self.inner.config.socket)?;
        tracing::info!(
            "Proxy listening on {}, relaying to {}",
            self.inner.config.host_addr,
            self.inner.config.server_addr
        );
        self.run_with_listener(listener).await
    }

    /// Serve on an already bound listener.
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
                        if let Err(e) = inner.serve_client(stream).await {
                            tracing::warn!("Could not proxy {peer}: {e}");
                        }
                    });
                }
                _ = shutdown_rx.wait_for(|stop| *stop) => {
                    tracing::info!("Proxy shutting down");
                    break;
                }
            }
        }

        for pair in self.clients() {
            pair.close();
        }
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        tracing::info!("Proxy stopped");
        Ok(())
    }

    /// Stop accepting and close every pair. [`run`](Self::run) returns once
    /// every pair has been torn down.
    pub fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
    }
}

impl ProxyInner {
    async fn serve_client(self: Arc<Self>, stream: TcpStream) -> std::io::Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let upstream = tokio::select! {
            upstream = TcpStream::connect(&self.config.server_addr) => upstream?,
            _ = shutdown_rx.wait_for(|stop| *stop) => return Ok(()),
        };
        let pair = Arc::new(ProxyPair {
            id: self.ids.next_id(),
            client: Connection::from_tcp(stream, &self.config.socket)?,
            server: Connection::from_tcp(upstream, &self.config.socket)?,
        });

        self.pairs.lock().insert(pair.id, Arc::clone(&pair));
        if *self.shutdown_tx.borrow() {
            pair.close();
        }
        tracing::info!("{} {} <-> {} opened", pair.id, pair.client, pair.server);

        tokio::join!(
            self.relay(Arc::clone(&pair), Side::Client),
            self.relay(Arc::clone(&pair), Side::Server),
        );

        pair.wait_closed().await;
        self.pairs.lock().remove(&pair.id);
        tracing::info!("{} closed", pair.id);
        Ok(())
    }

    async fn relay(&self, pair: Arc<ProxyPair>, side: Side) {
        let source = ProxySource { pair, side };

        while let Some(packet) = source.source().read_packet().await {
            let packet = Arc::new(packet);
            let verdicts = self
                .dispatcher
                .dispatch(
                    source.clone(),
                    Arc::clone(&packet),
                    Direction::Incoming,
                    DispatchMode::Concurrent,
                )
                .await;

            if verdicts.contains(&Verdict::Suppress) {
                tracing::debug!("{side:?} {} suppressed", packet.kind().name());
                continue;
            }
            if let Err(e) = source.destination().write_packet(&packet).await {
                tracing::debug!("Relay to {:?} stopped: {e}", side.opposite());
                break;
            }
        }

        source.pair.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smo_protocol::{CappyInfo, Header, PlayerConnect, TagInfo, TagUpdateType};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::task::JoinHandle;

    struct Harness {
        proxy: Proxy,
        runner: JoinHandle<()>,
        downstream: Connection,
        upstream: Connection,
    }

    async fn start() -> Harness {
        let (proxy, runner, downstream, upstream) = start_raw().await;
        Harness {
            proxy,
            runner,
            downstream: Connection::new(downstream),
            upstream: Connection::new(upstream),
        }
    }

    async fn start_raw() -> (Proxy, JoinHandle<()>, TcpStream, TcpStream) {
        let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = Proxy::new(ProxyConfig {
            host_addr: "127.0.0.1:0".parse().unwrap(),
            server_addr: upstream_listener.local_addr().unwrap().to_string(),
            socket: SocketConfig::default(),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let runner = proxy.clone();
        let runner = tokio::spawn(async move { runner.run_with_listener(listener).await.unwrap() });

        let downstream = TcpStream::connect(addr).await.unwrap();
        let (upstream, _) = upstream_listener.accept().await.unwrap();
        (proxy, runner, downstream, upstream)
    }

    fn player() -> ClientId {
        "5f2a9a4e-1c11-4d42-8a5e-0f6b9c0e7d21".parse().unwrap()
    }

    #[tokio::test]
    async fn test_relays_both_directions_and_tracks_client_id() {
        let h = start().await;

        let connect = Packet::new(player(), PlayerConnect::new(Default::default(), "Mario"));
        h.downstream.write_packet(&connect).await.unwrap();
        assert_eq!(h.upstream.read_packet().await, Some(connect));

        let clients = h.proxy.clients();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].client_id(), player());

        let reply = Packet::new(ClientId::NIL, smo_protocol::Init { max_players: 8 });
        h.upstream.write_packet(&reply).await.unwrap();
        assert_eq!(h.downstream.read_packet().await, Some(reply));
    }

    #[tokio::test]
    async fn test_forwarded_bytes_are_unmodified() {
        let (_proxy, _runner, mut downstream, mut upstream) = start_raw().await;

        let mut sent = Vec::new();
        sent.extend(
            Packet::new(player(), PlayerConnect::new(Default::default(), "Mario"))
                .encode()
                .unwrap(),
        );
        sent.extend(
            Packet::new(
                player(),
                CappyInfo {
                    position: [1.5, -2.0, 300.25],
                    visible: true,
                    anim_name: "CappySpin".into(),
                    ..Default::default()
                },
            )
            .encode()
            .unwrap(),
        );
        let payload = [0xde, 0xad, 0xbe, 0xef, 0x00, 0x7f];
        let unknown = Header {
            client_id: player(),
            type_id: 99,
            size: payload.len() as i16,
        };
        sent.extend_from_slice(&unknown.to_bytes());
        sent.extend_from_slice(&payload);

        downstream.write_all(&sent).await.unwrap();
        let mut received = vec![0u8; sent.len()];
        tokio::time::timeout(Duration::from_secs(1), upstream.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn test_any_suppress_vote_drops_packet() {
        let h = start().await;
        h.proxy.dispatcher().register(
            PacketKind::TagInfo,
            Direction::Incoming,
            handler(|_, _| async { Ok(Verdict::Suppress) }),
        );
        h.proxy.dispatcher().register(
            PacketKind::TagInfo,
            Direction::Incoming,
            handler(|_, _| async { Ok(Verdict::Forward) }),
        );

        let tag = Packet::new(
            player(),
            TagInfo {
                update_type: TagUpdateType::STATE,
                is_it: true,
                ..Default::default()
            },
        );
        let marker = Packet::new(player(), smo_protocol::PlayerDisconnect);
        h.downstream.write_packet(&tag).await.unwrap();
        h.downstream.write_packet(&marker).await.unwrap();

        assert_eq!(h.upstream.read_packet().await, Some(marker));
    }

    #[tokio::test]
    async fn test_listener_can_inject() {
        let h = start().await;
        h.proxy.dispatcher().register(
            PacketKind::ShineCollect,
            Direction::Incoming,
            handler(|source: ProxySource, packet: Arc<Packet>| async move {
                let echo = Packet::new(source.client_id(), packet.body.clone());
                source.inject(Side::Client, &echo).await?;
                Ok(Verdict::Suppress)
            }),
        );

        let shine = Packet::new(
            player(),
            smo_protocol::ShineCollect {
                shine_id: 42,
                is_grand: false,
            },
        );
        h.downstream.write_packet(&shine).await.unwrap();
        let echoed = h.downstream.read_packet().await.unwrap();
        assert_eq!(echoed.body, shine.body);
    }

    #[tokio::test]
    async fn test_closing_one_side_closes_pair() {
        let h = start().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.proxy.clients().len(), 1);

        h.upstream.wait_closed().await;
        drop(h.upstream);

        assert_eq!(h.downstream.read_packet().await, None);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.proxy.clients().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_pairs() {
        let h = start().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        h.proxy.shutdown();
        let ended = tokio::time::timeout(Duration::from_secs(1), h.downstream.read_packet()).await;
        assert_eq!(ended.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_returns_after_pairs_torn_down() {
        let h = start().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.proxy.clients().len(), 1);

        h.proxy.shutdown();
        tokio::time::timeout(Duration::from_secs(1), h.runner)
            .await
            .unwrap()
            .unwrap();
        assert!(h.proxy.clients().is_empty());
    }
}
