//! Wire protocol for SMO multiplayer: field codecs, the packet header, the
//! packet type registry, and encoding/decoding of typed packets.
//!
//! Every packet on the wire is a fixed 20-byte [`Header`] followed by exactly
//! `header.size` body bytes:
//!
//! ```text
//! +--------------------+-------------+-------------+------------------+
//! | client_id (16)     | type_id i16 | size i16    | body (size)      |
//! | UUID bytes_le      | LE          | LE          | per type schema  |
//! +--------------------+-------------+-------------+------------------+
//! ```

pub mod error;
pub mod field;
pub mod header;
pub mod packet;
pub mod packets;
pub mod registry;
pub mod types;

pub use error::CodecError;
pub use field::{FixedString, Padding, WireField};
pub use header::{HEADER_SIZE, Header, decode_header};
pub use packet::{GenericPacket, Packet, PacketBody, PacketKind, decode_body};
pub use packets::{
    CappyInfo, CaptureInfo, ChangeStage, ConnectionType, CostumeInfo, DEFAULT_MAX_PLAYERS,
    GameInfo, Init, PlayerConnect, PlayerDisconnect, PlayerInfo, ServerCommand, ShineCollect,
    TagInfo, TagUpdateType,
};
pub use registry::{PacketRegistry, Schema, lookup_schema, registry};
pub use types::{ClientId, Quatf, Vector3f};
