//! Error types shared by connections and listeners.

use smo_protocol::CodecError;

/// Errors returned when writing to a [`Connection`](crate::Connection).
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The connection is closing or closed.
    #[error("connection closed")]
    Closed,

    /// There is no live connection to write to.
    #[error("not connected")]
    NotConnected,

    /// The packet could not be encoded.
    #[error("encode failed: {0}")]
    Codec(#[from] CodecError),

    /// An I/O error occurred on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by a packet listener.
///
/// Listener failures are logged by the dispatcher and never stop the other
/// listeners for the same packet.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn msg(message: impl std::fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}
