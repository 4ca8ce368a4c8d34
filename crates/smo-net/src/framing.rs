//! Header-delimited framing over async byte streams.
//!
//! A frame is one [`Header`] followed by `header.size` body bytes. The reader
//! always consumes the whole declared body before decoding it, so a body that
//! fails to parse leaves the stream aligned on the next header.

use smo_protocol::{CodecError, HEADER_SIZE, Header, Packet, decode_header};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Errors that can occur while reading a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The peer closed the stream before a complete frame arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The header is unusable; the stream cannot be resynchronized.
    #[error("invalid header: {0}")]
    InvalidHeader(#[source] CodecError),

    /// The body was read in full but did not decode. The stream is still
    /// aligned on the next frame.
    #[error("malformed {kind} body: {source}")]
    Malformed {
        /// Name of the schema the body was decoded against.
        kind: &'static str,
        #[source]
        source: CodecError,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether reading can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Malformed { .. })
    }
}

async fn read_exact_or_closed<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<(), FrameError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(FrameError::ConnectionClosed),
        Err(e) => Err(FrameError::Io(e)),
    }
}

/// Read one packet from the stream.
///
/// Suspends until the header and then the whole body are available.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Packet, FrameError> {
    let mut header_buf = [0u8; HEADER_SIZE];
    read_exact_or_closed(reader, &mut header_buf).await?;

    let header: Header = decode_header(&header_buf).map_err(FrameError::InvalidHeader)?;
    let body_len = header.body_len().map_err(FrameError::InvalidHeader)?;

    let mut body = vec![0u8; body_len];
    if body_len > 0 {
        read_exact_or_closed(reader, &mut body).await?;
    }

    Packet::decode(&header, &body).map_err(|source| FrameError::Malformed {
        kind: smo_protocol::lookup_schema(header.type_id).name(),
        source,
    })
}

/// Encode `packet` and write it with a single `write_all`, then flush.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> Result<(), crate::ConnectionError> {
    let bytes = packet.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use smo_protocol::{ClientId, GameInfo, Init, PacketKind, PlayerDisconnect};
    use tokio::io::duplex;

    fn id() -> ClientId {
        "99971006-3086-1000-9971-29670938e59c".parse().unwrap()
    }

    #[tokio::test]
    async fn test_single_packet_roundtrip() {
        let (mut client, mut server) = duplex(8192);
        let packet = Packet::new(id(), Init { max_players: 8 });

        write_frame(&mut client, &packet).await.unwrap();
        let received = read_frame(&mut server).await.unwrap();
        assert_eq!(received, packet);
    }

    #[tokio::test]
    async fn test_back_to_back_packets_dont_merge() {
        let (mut client, mut server) = duplex(8192);
        let first = Packet::new(id(), PlayerDisconnect);
        let second = Packet::new(
            id(),
            GameInfo {
                is_2d: false,
                scenario_num: 1,
                stage_name: "WaterfallWorldHomeStage".into(),
            },
        );

        write_frame(&mut client, &first).await.unwrap();
        write_frame(&mut client, &second).await.unwrap();

        assert_eq!(read_frame(&mut server).await.unwrap(), first);
        assert_eq!(read_frame(&mut server).await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_partial_read_resumes_correctly() {
        // A tiny pipe forces the frame through in several chunks.
        let (mut client, mut server) = duplex(8);
        let packet = Packet::new(
            id(),
            GameInfo {
                is_2d: true,
                scenario_num: 9,
                stage_name: "longer than the pipe buffer".into(),
            },
        );

        let expected = packet.clone();
        let write_task = tokio::spawn(async move {
            write_frame(&mut client, &packet).await.unwrap();
        });

        let received = read_frame(&mut server).await.unwrap();
        write_task.await.unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_connection_closed_during_header() {
        let (client, mut server) = duplex(8192);
        drop(client);

        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_truncated_body_is_end_of_stream() {
        let (mut client, mut server) = duplex(8192);
        let bytes = Packet::new(id(), Init { max_players: 2 }).encode().unwrap();
        client.write_all(&bytes[..bytes.len() - 1]).await.unwrap();
        drop(client);

        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_malformed_body_keeps_stream_aligned() {
        let (mut client, mut server) = duplex(8192);
        let header = Header {
            client_id: id(),
            type_id: PacketKind::TagInfo.id(),
            size: 5,
        };
        client.write_all(&header.to_bytes()).await.unwrap();
        client.write_all(&[0xFF, 0, 0, 0, 0]).await.unwrap();
        let next = Packet::new(id(), PlayerDisconnect);
        write_frame(&mut client, &next).await.unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(err.is_recoverable(), "{err}");
        assert_eq!(read_frame(&mut server).await.unwrap(), next);
    }

    #[tokio::test]
    async fn test_negative_size_is_fatal() {
        let (mut client, mut server) = duplex(8192);
        let header = Header {
            client_id: id(),
            type_id: 1,
            size: -1,
        };
        client.write_all(&header.to_bytes()).await.unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, FrameError::InvalidHeader(_)));
        assert!(!err.is_recoverable());
    }
}
