//! Networking for the SMO multiplayer protocol.
//!
//! * [`Connection`] frames [`Packet`](smo_protocol::Packet)s over a byte stream.
//! * [`Dispatcher`] routes packets to async listeners.
//! * [`Server`] runs a star of sessions, [`Proxy`] relays client/server pairs,
//!   and [`Client`] performs the joining handshake with reconnects.

pub mod client;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod framing;
pub mod proxy;
pub mod reconnect;
pub mod server;
pub mod socket;

/// Port the game and servers use unless configured otherwise.
pub const DEFAULT_PORT: u16 = 1027;

pub use client::{Client, ClientConfig, ConnectionState, ConnectionStateWatch};
pub use connection::{Connection, ConnectionId, IdGenerator, Packets, Transport};
pub use dispatch::{
    DispatchMode, Direction, Dispatcher, Handler, HandlerFuture, ListenerChain, ListenerId,
    PacketFilter, handler,
};
pub use error::{ConnectionError, HandlerError};
pub use framing::{FrameError, read_frame, write_frame};
pub use proxy::{Proxy, ProxyConfig, ProxyPair, ProxySource, Side, Verdict};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectState, dial};
pub use server::{CommandHandler, Server, ServerClient, ServerConfig, Session};
pub use socket::{SocketConfig, bind_listener, configure_stream};
