//! Typed packets: the closed set of known kinds plus a raw fallback.

use std::fmt;
use std::io::Cursor;

use crate::error::CodecError;
use crate::header::{HEADER_SIZE, Header, decode_header};
use crate::packets::*;
use crate::registry::{Schema, lookup_schema};
use crate::types::ClientId;

// ---------------------------------------------------------------------------
// PacketKind
// ---------------------------------------------------------------------------

/// Routing tag of a packet. Known kinds map 1:1 onto header type ids;
/// everything else is `Unknown(id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Init,
    PlayerInfo,
    CappyInfo,
    GameInfo,
    TagInfo,
    PlayerConnect,
    PlayerDisconnect,
    CostumeInfo,
    ShineCollect,
    CaptureInfo,
    ChangeStage,
    ServerCommand,
    /// A type id with no registered schema.
    Unknown(i16),
}

impl PacketKind {
    /// Every registered kind, in type id order.
    pub const KNOWN: [PacketKind; 12] = [
        PacketKind::Init,
        PacketKind::PlayerInfo,
        PacketKind::CappyInfo,
        PacketKind::GameInfo,
        PacketKind::TagInfo,
        PacketKind::PlayerConnect,
        PacketKind::PlayerDisconnect,
        PacketKind::CostumeInfo,
        PacketKind::ShineCollect,
        PacketKind::CaptureInfo,
        PacketKind::ChangeStage,
        PacketKind::ServerCommand,
    ];

    /// Header type id.
    pub const fn id(self) -> i16 {
        match self {
            PacketKind::Init => 1,
            PacketKind::PlayerInfo => 2,
            PacketKind::CappyInfo => 3,
            PacketKind::GameInfo => 4,
            PacketKind::TagInfo => 5,
            PacketKind::PlayerConnect => 6,
            PacketKind::PlayerDisconnect => 7,
            PacketKind::CostumeInfo => 8,
            PacketKind::ShineCollect => 9,
            PacketKind::CaptureInfo => 10,
            PacketKind::ChangeStage => 11,
            PacketKind::ServerCommand => 12,
            PacketKind::Unknown(id) => id,
        }
    }

    pub fn from_id(id: i16) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|kind| kind.id() == id)
            .unwrap_or(PacketKind::Unknown(id))
    }

    pub const fn name(self) -> &'static str {
        match self {
            PacketKind::Init => "Init",
            PacketKind::PlayerInfo => "PlayerInfo",
            PacketKind::CappyInfo => "CappyInfo",
            PacketKind::GameInfo => "GameInfo",
            PacketKind::TagInfo => "TagInfo",
            PacketKind::PlayerConnect => "PlayerConnect",
            PacketKind::PlayerDisconnect => "PlayerDisconnect",
            PacketKind::CostumeInfo => "CostumeInfo",
            PacketKind::ShineCollect => "ShineCollect",
            PacketKind::CaptureInfo => "CaptureInfo",
            PacketKind::ChangeStage => "ChangeStage",
            PacketKind::ServerCommand => "ServerCommand",
            PacketKind::Unknown(_) => "Generic",
        }
    }

    /// Fixed body size, or `None` for raw payloads.
    pub const fn body_size(self) -> Option<usize> {
        match self {
            PacketKind::Init => Some(Init::SIZE),
            PacketKind::PlayerInfo => Some(PlayerInfo::SIZE),
            PacketKind::CappyInfo => Some(CappyInfo::SIZE),
            PacketKind::GameInfo => Some(GameInfo::SIZE),
            PacketKind::TagInfo => Some(TagInfo::SIZE),
            PacketKind::PlayerConnect => Some(PlayerConnect::SIZE),
            PacketKind::PlayerDisconnect => Some(PlayerDisconnect::SIZE),
            PacketKind::CostumeInfo => Some(CostumeInfo::SIZE),
            PacketKind::ShineCollect => Some(ShineCollect::SIZE),
            PacketKind::CaptureInfo => Some(CaptureInfo::SIZE),
            PacketKind::ChangeStage => Some(ChangeStage::SIZE),
            PacketKind::ServerCommand => Some(ServerCommand::SIZE),
            PacketKind::Unknown(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// PacketBody
// ---------------------------------------------------------------------------

/// Body of a packet whose type id has no schema. The bytes are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericPacket {
    pub type_id: i16,
    pub data: Vec<u8>,
}

/// Decoded body, one variant per registered kind.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketBody {
    Init(Init),
    PlayerInfo(PlayerInfo),
    CappyInfo(CappyInfo),
    GameInfo(GameInfo),
    TagInfo(TagInfo),
    PlayerConnect(PlayerConnect),
    PlayerDisconnect(PlayerDisconnect),
    CostumeInfo(CostumeInfo),
    ShineCollect(ShineCollect),
    CaptureInfo(CaptureInfo),
    ChangeStage(ChangeStage),
    ServerCommand(ServerCommand),
    Generic(GenericPacket),
}

macro_rules! packet_body_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for PacketBody {
                fn from(payload: $variant) -> Self {
                    PacketBody::$variant(payload)
                }
            }
        )*
    };
}

packet_body_from!(
    Init,
    PlayerInfo,
    CappyInfo,
    GameInfo,
    TagInfo,
    PlayerConnect,
    PlayerDisconnect,
    CostumeInfo,
    ShineCollect,
    CaptureInfo,
    ChangeStage,
    ServerCommand,
);

impl From<GenericPacket> for PacketBody {
    fn from(payload: GenericPacket) -> Self {
        PacketBody::Generic(payload)
    }
}

impl PacketBody {
    pub fn kind(&self) -> PacketKind {
        match self {
            PacketBody::Init(_) => PacketKind::Init,
            PacketBody::PlayerInfo(_) => PacketKind::PlayerInfo,
            PacketBody::CappyInfo(_) => PacketKind::CappyInfo,
            PacketBody::GameInfo(_) => PacketKind::GameInfo,
            PacketBody::TagInfo(_) => PacketKind::TagInfo,
            PacketBody::PlayerConnect(_) => PacketKind::PlayerConnect,
            PacketBody::PlayerDisconnect(_) => PacketKind::PlayerDisconnect,
            PacketBody::CostumeInfo(_) => PacketKind::CostumeInfo,
            PacketBody::ShineCollect(_) => PacketKind::ShineCollect,
            PacketBody::CaptureInfo(_) => PacketKind::CaptureInfo,
            PacketBody::ChangeStage(_) => PacketKind::ChangeStage,
            PacketBody::ServerCommand(_) => PacketKind::ServerCommand,
            PacketBody::Generic(generic) => PacketKind::Unknown(generic.type_id),
        }
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        match self {
            PacketBody::Init(p) => p.write_body(out),
            PacketBody::PlayerInfo(p) => p.write_body(out),
            PacketBody::CappyInfo(p) => p.write_body(out),
            PacketBody::GameInfo(p) => p.write_body(out),
            PacketBody::TagInfo(p) => p.write_body(out),
            PacketBody::PlayerConnect(p) => p.write_body(out),
            PacketBody::PlayerDisconnect(p) => p.write_body(out),
            PacketBody::CostumeInfo(p) => p.write_body(out),
            PacketBody::ShineCollect(p) => p.write_body(out),
            PacketBody::CaptureInfo(p) => p.write_body(out),
            PacketBody::ChangeStage(p) => p.write_body(out),
            PacketBody::ServerCommand(p) => p.write_body(out),
            PacketBody::Generic(generic) => {
                out.extend_from_slice(&generic.data);
                Ok(())
            }
        }
    }

    fn fields(&self) -> &dyn fmt::Debug {
        match self {
            PacketBody::Init(p) => p,
            PacketBody::PlayerInfo(p) => p,
            PacketBody::CappyInfo(p) => p,
            PacketBody::GameInfo(p) => p,
            PacketBody::TagInfo(p) => p,
            PacketBody::PlayerConnect(p) => p,
            PacketBody::PlayerDisconnect(p) => p,
            PacketBody::CostumeInfo(p) => p,
            PacketBody::ShineCollect(p) => p,
            PacketBody::CaptureInfo(p) => p,
            PacketBody::ChangeStage(p) => p,
            PacketBody::ServerCommand(p) => p,
            PacketBody::Generic(generic) => generic,
        }
    }
}

/// Decode a body according to `schema`.
///
/// Fixed-size schemas require at least their size in bytes; anything past it
/// is ignored. Generic schemas take the bytes as-is.
pub fn decode_body(schema: &Schema, bytes: &[u8]) -> Result<PacketBody, CodecError> {
    fn read<P: Payload>(bytes: &[u8]) -> Result<P, CodecError> {
        if bytes.len() < P::SIZE {
            return Err(CodecError::BodySizeMismatch {
                name: P::KIND.name(),
                expected: P::SIZE,
                actual: bytes.len(),
            });
        }
        if bytes.len() > P::SIZE {
            tracing::trace!(
                "{} body has {} trailing bytes",
                P::KIND.name(),
                bytes.len() - P::SIZE
            );
        }
        P::read_body(&mut Cursor::new(bytes))
    }

    Ok(match schema.kind() {
        PacketKind::Init => read::<Init>(bytes)?.into(),
        PacketKind::PlayerInfo => read::<PlayerInfo>(bytes)?.into(),
        PacketKind::CappyInfo => read::<CappyInfo>(bytes)?.into(),
        PacketKind::GameInfo => read::<GameInfo>(bytes)?.into(),
        PacketKind::TagInfo => read::<TagInfo>(bytes)?.into(),
        PacketKind::PlayerConnect => read::<PlayerConnect>(bytes)?.into(),
        PacketKind::PlayerDisconnect => read::<PlayerDisconnect>(bytes)?.into(),
        PacketKind::CostumeInfo => read::<CostumeInfo>(bytes)?.into(),
        PacketKind::ShineCollect => read::<ShineCollect>(bytes)?.into(),
        PacketKind::CaptureInfo => read::<CaptureInfo>(bytes)?.into(),
        PacketKind::ChangeStage => read::<ChangeStage>(bytes)?.into(),
        PacketKind::ServerCommand => read::<ServerCommand>(bytes)?.into(),
        PacketKind::Unknown(type_id) => GenericPacket {
            type_id,
            data: bytes.to_vec(),
        }
        .into(),
    })
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// A decoded packet: originating player plus body.
///
/// `client_id` is public so a packet can be relabelled before it is sent on.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub client_id: ClientId,
    pub body: PacketBody,
}

impl Packet {
    pub fn new(client_id: ClientId, body: impl Into<PacketBody>) -> Self {
        Self {
            client_id,
            body: body.into(),
        }
    }

    pub fn kind(&self) -> PacketKind {
        self.body.kind()
    }

    /// Copy of this packet addressed from `client_id`.
    pub fn relabeled(&self, client_id: ClientId) -> Self {
        Self {
            client_id,
            body: self.body.clone(),
        }
    }

    /// Header plus body.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut body = Vec::with_capacity(self.kind().body_size().unwrap_or(0));
        self.body.write(&mut body)?;

        let size = i16::try_from(body.len()).map_err(|_| CodecError::BodyTooLarge(body.len()))?;
        let header = Header {
            client_id: self.client_id,
            type_id: self.kind().id(),
            size,
        };

        let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode a body that followed `header` on the wire.
    pub fn decode(header: &Header, body: &[u8]) -> Result<Self, CodecError> {
        let expected = header.body_len()?;
        if body.len() < expected {
            return Err(CodecError::Incomplete {
                needed: expected,
                available: body.len(),
            });
        }
        let schema = lookup_schema(header.type_id);
        Ok(Self {
            client_id: header.client_id,
            body: decode_body(&schema, &body[..expected])?,
        })
    }

    /// Decode one whole packet from the front of `bytes`, returning it and the
    /// number of bytes consumed.
    pub fn decode_frame(bytes: &[u8]) -> Result<(Self, usize), CodecError> {
        let header = decode_header(bytes)?;
        let total = HEADER_SIZE + header.body_len()?;
        if bytes.len() < total {
            return Err(CodecError::Incomplete {
                needed: total,
                available: bytes.len(),
            });
        }
        let packet = Self::decode(&header, &bytes[HEADER_SIZE..total])?;
        Ok((packet, total))
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {:?}", self.client_id, self.body.fields())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn player() -> ClientId {
        "8ca3fcdd-2940-1000-b5f8-579301fcbfbb".parse().unwrap()
    }

    fn roundtrip(body: impl Into<PacketBody>) {
        let packet = Packet::new(player(), body);
        let bytes = packet.encode().unwrap();
        let expected_size = packet.kind().body_size().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + expected_size, "{:?}", packet.kind());

        let (decoded, consumed) = Packet::decode_frame(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_roundtrip_every_registered_kind() {
        roundtrip(Init { max_players: 8 });
        roundtrip(PlayerInfo {
            position: [1.5, -2.0, 1e6],
            rotation: [0.0, 0.707, 0.0, 0.707],
            anim_blend_weights: [1.0, 0.0, 0.5, 0.25, 0.125, 0.0],
            act_name: 12,
            sub_act_name: -1,
        });
        roundtrip(CappyInfo {
            position: [0.0; 3],
            rotation: [1.0, 0.0, 0.0, 0.0],
            visible: false,
            anim_name: "FlyingWaitR".to_string(),
        });
        roundtrip(GameInfo {
            is_2d: true,
            scenario_num: 3,
            stage_name: "s".repeat(0x40),
        });
        roundtrip(TagInfo {
            update_type: TagUpdateType::TIME | TagUpdateType::STATE,
            is_it: true,
            seconds: 30,
            minutes: 2,
        });
        roundtrip(PlayerConnect::new(ConnectionType::Init, "n".repeat(0x1F)));
        roundtrip(PlayerConnect {
            max_players: 4,
            ..PlayerConnect::new(ConnectionType::Reconnect, "n".repeat(0x20))
        });
        roundtrip(PlayerDisconnect);
        roundtrip(CostumeInfo {
            body_model: "Mario".to_string(),
            cap_model: "MarioCap".to_string(),
        });
        roundtrip(ShineCollect {
            shine_id: -12345,
            is_grand: true,
        });
        roundtrip(CaptureInfo {
            name: String::new(),
        });
        roundtrip(ChangeStage {
            change_stage: "CapWorldHomeStage".to_string(),
            change_id: "start".to_string(),
            scenario_num: -1,
            sub_scenario_type: 0,
        });
        roundtrip(ServerCommand {
            command: "list".to_string(),
        });
    }

    #[test]
    fn test_unknown_type_id_decodes_to_generic() {
        let payload = [0xde, 0xad, 0xbe, 0xef, 0x00, 0x01];
        let header = Header {
            client_id: player(),
            type_id: 99,
            size: payload.len() as i16,
        };
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(&payload);

        let (packet, _) = Packet::decode_frame(&bytes).unwrap();
        assert_eq!(packet.kind(), PacketKind::Unknown(99));
        match &packet.body {
            PacketBody::Generic(generic) => assert_eq!(generic.data, payload),
            other => panic!("expected generic body, got {other:?}"),
        }

        // Re-encoding reproduces the input byte for byte.
        assert_eq!(packet.encode().unwrap(), bytes);
        assert!(Arc::ptr_eq(&lookup_schema(99), &lookup_schema(99)));
    }

    #[test]
    fn test_cappy_info_encoded_length_is_fixed() {
        for visible in [false, true] {
            let packet = Packet::new(
                ClientId::NIL,
                CappyInfo {
                    visible,
                    anim_name: "a".repeat(visible as usize * 60),
                    ..CappyInfo::default()
                },
            );
            let bytes = packet.encode().unwrap();
            assert_eq!(bytes.len(), 20 + 12 + 16 + 1 + 0x30 + 3);
            assert_eq!(&bytes[bytes.len() - 3..], &[0, 0, 0]);
        }
    }

    #[test]
    fn test_short_body_is_rejected() {
        let header = Header {
            client_id: ClientId::NIL,
            type_id: PacketKind::Init.id(),
            size: 1,
        };
        let mut bytes = header.to_bytes().to_vec();
        bytes.push(8);
        assert!(matches!(
            Packet::decode_frame(&bytes),
            Err(CodecError::BodySizeMismatch { name: "Init", .. })
        ));
    }

    #[test]
    fn test_frame_waits_for_full_body() {
        let bytes = Packet::new(player(), Init { max_players: 2 })
            .encode()
            .unwrap();
        assert!(matches!(
            Packet::decode_frame(&bytes[..bytes.len() - 1]),
            Err(CodecError::Incomplete { .. })
        ));
    }

    #[test]
    fn test_oversized_generic_body_rejected_on_encode() {
        let packet = Packet::new(
            ClientId::NIL,
            GenericPacket {
                type_id: 200,
                data: vec![0; i16::MAX as usize + 1],
            },
        );
        assert!(matches!(packet.encode(), Err(CodecError::BodyTooLarge(_))));
    }

    #[test]
    fn test_display_lists_fields_in_order() {
        let packet = Packet::new(player(), PlayerConnect::new(ConnectionType::Init, "Mario"));
        assert_eq!(
            packet.to_string(),
            "[8ca3fcdd-2940-1000-b5f8-579301fcbfbb] PlayerConnect { connection_type: Init, \
             max_players: 65535, name: \"Mario\" }"
        );
    }

    #[test]
    fn test_relabel_keeps_body() {
        let original = Packet::new(player(), CaptureInfo { name: "Frog".into() });
        let copy = original.relabeled(ClientId::NIL);
        assert_eq!(copy.body, original.body);
        assert!(copy.client_id.is_nil());
        assert_eq!(original.client_id, player());
    }

    #[test]
    fn test_kind_ids_are_unique() {
        for (i, a) in PacketKind::KNOWN.iter().enumerate() {
            assert_eq!(PacketKind::from_id(a.id()), *a);
            for b in &PacketKind::KNOWN[i + 1..] {
                assert_ne!(a.id(), b.id());
            }
        }
        assert_eq!(PacketKind::from_id(0), PacketKind::Unknown(0));
    }
}
