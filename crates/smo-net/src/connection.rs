//! One framed packet stream over a duplex byte transport.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use smo_protocol::{ClientId, Packet, PacketBody};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::ConnectionError;
use crate::framing::{FrameError, read_frame, write_frame};
use crate::socket::{SocketConfig, configure_stream};

/// Process-local handle for a connection, used as an arena key and in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out increasing [`ConnectionId`]s starting at 1.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Any byte stream a [`Connection`] can own.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Transport for T {}

type BoxedTransport = Box<dyn Transport>;

/// A packet connection.
///
/// Reads and writes go through separate locks, so one task can sit in
/// [`read_packet`](Self::read_packet) while others write. Whole packets are
/// written under the write lock and never interleave.
///
/// The connection carries a mutable [`ClientId`] tag that
/// [`create_packet`](Self::create_packet) stamps on outgoing packets.
pub struct Connection {
    reader: Mutex<ReadHalf<BoxedTransport>>,
    writer: Mutex<WriteHalf<BoxedTransport>>,
    client_id: parking_lot::Mutex<ClientId>,
    closing: CancellationToken,
    peer: Option<SocketAddr>,
}

impl Connection {
    pub fn new(stream: impl Transport) -> Self {
        let boxed: BoxedTransport = Box::new(stream);
        let (reader, writer) = tokio::io::split(boxed);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            client_id: parking_lot::Mutex::new(ClientId::NIL),
            closing: CancellationToken::new(),
            peer: None,
        }
    }

    /// Wrap a TCP stream after applying `config` to it.
    pub fn from_tcp(stream: TcpStream, config: &SocketConfig) -> std::io::Result<Self> {
        configure_stream(&stream, config)?;
        let peer = stream.peer_addr().ok();
        Ok(Self {
            peer,
            ..Self::new(stream)
        })
    }

    /// Remote address, when the transport is TCP.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn client_id(&self) -> ClientId {
        *self.client_id.lock()
    }

    pub fn set_client_id(&self, client_id: ClientId) {
        *self.client_id.lock() = client_id;
    }

    /// Build a packet tagged with this connection's client id.
    pub fn create_packet(&self, body: impl Into<PacketBody>) -> Packet {
        Packet::new(self.client_id(), body)
    }

    /// Read the next packet.
    ///
    /// Returns `None` at end of stream: peer EOF, a transport error, a body
    /// cut short, an unusable header, or [`close`](Self::close). Any of these
    /// also closes the connection. A body that arrives in full but fails to
    /// decode is logged and skipped.
    pub async fn read_packet(&self) -> Option<Packet> {
        let mut reader = tokio::select! {
            biased;
            _ = self.closing.cancelled() => return None,
            reader = self.reader.lock() => reader,
        };

        loop {
            let result = tokio::select! {
                biased;
                _ = self.closing.cancelled() => return None,
                result = read_frame(&mut *reader) => result,
            };

            match result {
                Ok(packet) => return Some(packet),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!("{self}: dropping packet: {e}");
                }
                Err(FrameError::ConnectionClosed) => {
                    tracing::debug!("{self}: end of stream");
                    self.close();
                    return None;
                }
                Err(e) => {
                    tracing::warn!("{self}: read failed: {e}");
                    self.close();
                    return None;
                }
            }
        }
    }

    /// Stream of incoming packets. Ends where [`read_packet`](Self::read_packet)
    /// would return `None`.
    pub fn packets(&self) -> Packets<'_> {
        Packets { connection: self }
    }

    /// Encode and write one packet.
    ///
    /// A [`close`](Self::close) abandons a write still waiting for the lock
    /// or for the peer to drain, returning [`ConnectionError::Closed`].
    pub async fn write_packet(&self, packet: &Packet) -> Result<(), ConnectionError> {
        let mut writer = tokio::select! {
            biased;
            _ = self.closing.cancelled() => return Err(ConnectionError::Closed),
            writer = self.writer.lock() => writer,
        };

        let result = tokio::select! {
            biased;
            _ = self.closing.cancelled() => return Err(ConnectionError::Closed),
            result = write_frame(&mut *writer, packet) => result,
        };
        if let Err(ConnectionError::Io(e)) = &result {
            tracing::debug!("{self}: write failed: {e}");
            self.close();
        }
        result
    }

    /// Mark the connection closing and wake any pending read. Idempotent.
    pub fn close(&self) {
        self.closing.cancel();
    }

    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Close, then shut down the write half. Pending writes are abandoned.
    pub async fn wait_closed(&self) {
        self.close();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::trace!("{self}: shutdown: {e}");
        }
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.closing.cancelled().await;
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peer {
            Some(peer) => write!(f, "{peer}"),
            None => f.write_str("<stream>"),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("client_id", &self.client_id())
            .field("closing", &self.is_closing())
            .finish()
    }
}

/// Async iterator returned by [`Connection::packets`].
pub struct Packets<'a> {
    connection: &'a Connection,
}

impl Packets<'_> {
    pub async fn next(&mut self) -> Option<Packet> {
        self.connection.read_packet().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smo_protocol::{CostumeInfo, GameInfo, Header, Init, PacketKind, PlayerDisconnect};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, duplex};

    fn id() -> ClientId {
        "d0e4c5a8-0b52-4a6f-9a53-4ce4c2ae0f11".parse().unwrap()
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (a, b) = duplex(4096);
        let (a, b) = (Connection::new(a), Connection::new(b));

        a.set_client_id(id());
        let packet = a.create_packet(Init { max_players: 4 });
        assert_eq!(packet.client_id, id());

        a.write_packet(&packet).await.unwrap();
        assert_eq!(b.read_packet().await, Some(packet));
    }

    #[tokio::test]
    async fn test_peer_eof_ends_stream_and_closes() {
        let (a, b) = duplex(4096);
        let b = Connection::new(b);
        drop(a);

        assert_eq!(b.read_packet().await, None);
        assert!(b.is_closing());
    }

    #[tokio::test]
    async fn test_close_wakes_pending_read() {
        let (_a, b) = duplex(4096);
        let b = Arc::new(Connection::new(b));

        let reader = Arc::clone(&b);
        let pending = tokio::spawn(async move { reader.read_packet().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        b.close();
        b.close();
        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (_a, b) = duplex(4096);
        let b = Connection::new(b);
        b.close();

        let err = b
            .write_packet(&Packet::new(id(), PlayerDisconnect))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Closed));
    }

    #[tokio::test]
    async fn test_close_abandons_stalled_write() {
        let (_peer, b) = duplex(8);
        let b = Arc::new(Connection::new(b));

        let writer = Arc::clone(&b);
        let pending = tokio::spawn(async move {
            writer
                .write_packet(&Packet::new(id(), GameInfo::default()))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        b.close();
        tokio::time::timeout(Duration::from_secs(1), b.wait_closed())
            .await
            .expect("wait_closed hung behind a stalled write");
        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_skipped() {
        let (mut raw, b) = duplex(4096);
        let b = Connection::new(b);

        let header = Header {
            client_id: id(),
            type_id: PacketKind::TagInfo.id(),
            size: 5,
        };
        raw.write_all(&header.to_bytes()).await.unwrap();
        raw.write_all(&[0x80, 0, 0, 0, 0]).await.unwrap();
        let good = Packet::new(
            id(),
            CostumeInfo {
                body_model: "Mario".into(),
                cap_model: "Mario".into(),
            },
        );
        raw.write_all(&good.encode().unwrap()).await.unwrap();

        assert_eq!(b.read_packet().await, Some(good));
        assert!(!b.is_closing());
    }

    #[tokio::test]
    async fn test_packets_stream_until_eof() {
        let (a, b) = duplex(4096);
        let (a, b) = (Connection::new(a), Connection::new(b));

        for max_players in 1..=3 {
            a.write_packet(&Packet::new(id(), Init { max_players }))
                .await
                .unwrap();
        }
        a.wait_closed().await;
        drop(a);

        let mut seen = Vec::new();
        let mut packets = b.packets();
        while let Some(packet) = packets.next().await {
            seen.push(packet);
        }
        assert_eq!(seen.len(), 3);
        assert!(b.is_closing());
    }

    #[tokio::test]
    async fn test_concurrent_writes_do_not_interleave() {
        let (a, mut raw) = duplex(1 << 16);
        let a = Arc::new(Connection::new(a));

        let mut tasks = Vec::new();
        for n in 0..16u16 {
            let a = Arc::clone(&a);
            tasks.push(tokio::spawn(async move {
                a.write_packet(&Packet::new(id(), Init { max_players: n }))
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut bytes = vec![0u8; 16 * 22];
        raw.read_exact(&mut bytes).await.unwrap();
        let mut offset = 0;
        let mut seen = Vec::new();
        while offset < bytes.len() {
            let (packet, used) = Packet::decode_frame(&bytes[offset..]).unwrap();
            seen.push(packet);
            offset += used;
        }
        assert_eq!(seen.len(), 16);
    }

    #[test]
    fn test_connection_ids_increase() {
        let ids = IdGenerator::new();
        let first = ids.next_id();
        let second = ids.next_id();
        assert_eq!(first, ConnectionId(1));
        assert_eq!(second.0, first.0 + 1);
    }
}
