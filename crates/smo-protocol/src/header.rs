//! The fixed-size packet header.

use std::io::Cursor;

use crate::error::CodecError;
use crate::field::WireField;
use crate::types::ClientId;

/// Encoded size of a [`Header`]: 16-byte client id, `i16` type id, `i16` size.
pub const HEADER_SIZE: usize = 16 + 2 + 2;

/// Prefix of every packet on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Originating player.
    pub client_id: ClientId,
    /// Selects the body schema.
    pub type_id: i16,
    /// Exact length of the body that follows.
    pub size: i16,
}

impl Header {
    /// Body length as a `usize`, rejecting negative sizes.
    pub fn body_len(&self) -> Result<usize, CodecError> {
        usize::try_from(self.size).map_err(|_| CodecError::NegativeSize(self.size))
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..16].copy_from_slice(&self.client_id.to_bytes_le());
        bytes[16..18].copy_from_slice(&self.type_id.to_le_bytes());
        bytes[18..20].copy_from_slice(&self.size.to_le_bytes());
        bytes
    }
}

/// Parse a header from the front of `bytes`.
///
/// Returns [`CodecError::Incomplete`] if fewer than [`HEADER_SIZE`] bytes are
/// available; trailing bytes are ignored.
pub fn decode_header(bytes: &[u8]) -> Result<Header, CodecError> {
    if bytes.len() < HEADER_SIZE {
        return Err(CodecError::Incomplete {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let mut cursor = Cursor::new(&bytes[..HEADER_SIZE]);
    Ok(Header {
        client_id: ClientId::read(&mut cursor)?,
        type_id: i16::read(&mut cursor)?,
        size: i16::read(&mut cursor)?,
    })
}
