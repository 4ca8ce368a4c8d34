//! Concrete packet bodies.
//!
//! Each body implements [`Payload`], which ties it to its [`PacketKind`] and
//! gives its fixed encoded size. Field order in each struct is wire order.

use std::io::Cursor;

use bitflags::bitflags;

use crate::error::CodecError;
use crate::field::{FixedString, Padding, WireField};
use crate::packet::PacketKind;
use crate::types::{Quatf, Vector3f};

/// `max_players` advertised in a [`PlayerConnect`] built without one.
pub const DEFAULT_MAX_PLAYERS: u16 = 0xFFFF;

/// A statically-typed packet body.
pub trait Payload: Sized {
    /// Registry kind; its id is the header `type_id`.
    const KIND: PacketKind;
    /// Exact encoded body length.
    const SIZE: usize;

    fn read_body(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError>;

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), CodecError>;
}

/// How a client is (re)joining, carried in [`PlayerConnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionType {
    /// First handshake of a client process.
    #[default]
    Init,
    /// Handshake after a lost connection.
    Reconnect,
}

impl TryFrom<i32> for ConnectionType {
    type Error = CodecError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Init),
            1 => Ok(Self::Reconnect),
            other => Err(CodecError::InvalidEnumValue {
                name: "ConnectionType",
                value: other.into(),
            }),
        }
    }
}

impl From<ConnectionType> for i32 {
    fn from(value: ConnectionType) -> Self {
        match value {
            ConnectionType::Init => 0,
            ConnectionType::Reconnect => 1,
        }
    }
}

impl WireField for ConnectionType {
    const SIZE: usize = 4;

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        i32::read(cursor)?.try_into()
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        i32::from(*self).write(out)
    }
}

bitflags! {
    /// Which parts of a [`TagInfo`] carry new information.
    #[derive(Default)]
    pub struct TagUpdateType: u8 {
        const TIME = 0b01;
        const STATE = 0b10;
    }
}

impl WireField for TagUpdateType {
    const SIZE: usize = 1;

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let flags = u8::read(cursor)?;
        Self::from_bits(flags).ok_or(CodecError::BadFlags {
            name: "TagUpdateType",
            value: flags,
        })
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.bits().write(out)
    }
}

/// Server greeting; tells the client the server's capacity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Init {
    pub max_players: u16,
}

impl Payload for Init {
    const KIND: PacketKind = PacketKind::Init;
    const SIZE: usize = 2;

    fn read_body(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            max_players: u16::read(cursor)?,
        })
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.max_players.write(out)
    }
}

/// Player transform and animation state.
///
/// `act_name` and `sub_act_name` index the game's animation table, which lives
/// in the client; they pass through unchanged.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerInfo {
    pub position: Vector3f,
    pub rotation: Quatf,
    pub anim_blend_weights: [f32; 6],
    pub act_name: i16,
    pub sub_act_name: i16,
}

impl Payload for PlayerInfo {
    const KIND: PacketKind = PacketKind::PlayerInfo;
    const SIZE: usize = 12 + 16 + 24 + 2 + 2;

    fn read_body(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            position: WireField::read(cursor)?,
            rotation: WireField::read(cursor)?,
            anim_blend_weights: WireField::read(cursor)?,
            act_name: i16::read(cursor)?,
            sub_act_name: i16::read(cursor)?,
        })
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.position.write(out)?;
        self.rotation.write(out)?;
        self.anim_blend_weights.write(out)?;
        self.act_name.write(out)?;
        self.sub_act_name.write(out)
    }
}

/// Cap (Cappy) transform and animation.
///
/// The body ends in three zero bytes. The vanilla client aligns this struct
/// and expects them; they are part of the wire format.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CappyInfo {
    pub position: Vector3f,
    pub rotation: Quatf,
    pub visible: bool,
    pub anim_name: String,
}

impl Payload for CappyInfo {
    const KIND: PacketKind = PacketKind::CappyInfo;
    const SIZE: usize = 12 + 16 + 1 + 0x30 + 3;

    fn read_body(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let packet = Self {
            position: WireField::read(cursor)?,
            rotation: WireField::read(cursor)?,
            visible: bool::read(cursor)?,
            anim_name: FixedString::<0x30>::read(cursor)?,
        };
        Padding::<3>::read(cursor)?;
        Ok(packet)
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.position.write(out)?;
        self.rotation.write(out)?;
        self.visible.write(out)?;
        FixedString::<0x30>::write(&self.anim_name, out)?;
        Padding::<3>::write(out)
    }
}

/// Current stage and scenario of a player.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameInfo {
    pub is_2d: bool,
    pub scenario_num: u8,
    pub stage_name: String,
}

impl Payload for GameInfo {
    const KIND: PacketKind = PacketKind::GameInfo;
    const SIZE: usize = 1 + 1 + 0x40;

    fn read_body(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            is_2d: bool::read(cursor)?,
            scenario_num: u8::read(cursor)?,
            stage_name: FixedString::<0x40>::read(cursor)?,
        })
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.is_2d.write(out)?;
        self.scenario_num.write(out)?;
        FixedString::<0x40>::write(&self.stage_name, out)
    }
}

/// Hide-and-seek ("tag") game mode state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagInfo {
    pub update_type: TagUpdateType,
    pub is_it: bool,
    pub seconds: u8,
    pub minutes: u16,
}

impl Payload for TagInfo {
    const KIND: PacketKind = PacketKind::TagInfo;
    const SIZE: usize = 1 + 1 + 1 + 2;

    fn read_body(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            update_type: TagUpdateType::read(cursor)?,
            is_it: bool::read(cursor)?,
            seconds: u8::read(cursor)?,
            minutes: u16::read(cursor)?,
        })
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.update_type.write(out)?;
        self.is_it.write(out)?;
        self.seconds.write(out)?;
        self.minutes.write(out)
    }
}

/// Handshake reply from a client, and the server's description of a peer.
///
/// Build with [`PlayerConnect::new`] or struct-update syntax over
/// `Default::default()` to leave `max_players` at [`DEFAULT_MAX_PLAYERS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerConnect {
    pub connection_type: ConnectionType,
    pub max_players: u16,
    pub name: String,
}

impl PlayerConnect {
    pub fn new(connection_type: ConnectionType, name: impl Into<String>) -> Self {
        Self {
            connection_type,
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for PlayerConnect {
    fn default() -> Self {
        Self {
            connection_type: ConnectionType::Init,
            max_players: DEFAULT_MAX_PLAYERS,
            name: String::new(),
        }
    }
}

impl Payload for PlayerConnect {
    const KIND: PacketKind = PacketKind::PlayerConnect;
    const SIZE: usize = 4 + 2 + 0x20;

    fn read_body(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            connection_type: ConnectionType::read(cursor)?,
            max_players: u16::read(cursor)?,
            name: FixedString::<0x20>::read(cursor)?,
        })
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.connection_type.write(out)?;
        self.max_players.write(out)?;
        FixedString::<0x20>::write(&self.name, out)
    }
}

/// A player left. The header's `client_id` names who.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayerDisconnect;

impl Payload for PlayerDisconnect {
    const KIND: PacketKind = PacketKind::PlayerDisconnect;
    const SIZE: usize = 0;

    fn read_body(_cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self)
    }

    fn write_body(&self, _out: &mut Vec<u8>) -> Result<(), CodecError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CostumeInfo {
    pub body_model: String,
    pub cap_model: String,
}

impl Payload for CostumeInfo {
    const KIND: PacketKind = PacketKind::CostumeInfo;
    const SIZE: usize = 0x20 + 0x20;

    fn read_body(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            body_model: FixedString::<0x20>::read(cursor)?,
            cap_model: FixedString::<0x20>::read(cursor)?,
        })
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        FixedString::<0x20>::write(&self.body_model, out)?;
        FixedString::<0x20>::write(&self.cap_model, out)
    }
}

/// A collected moon.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShineCollect {
    pub shine_id: i32,
    pub is_grand: bool,
}

impl Payload for ShineCollect {
    const KIND: PacketKind = PacketKind::ShineCollect;
    const SIZE: usize = 4 + 1;

    fn read_body(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            shine_id: i32::read(cursor)?,
            is_grand: bool::read(cursor)?,
        })
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.shine_id.write(out)?;
        self.is_grand.write(out)
    }
}

/// Captured enemy/object; empty name means no capture.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CaptureInfo {
    pub name: String,
}

impl Payload for CaptureInfo {
    const KIND: PacketKind = PacketKind::CaptureInfo;
    const SIZE: usize = 0x20;

    fn read_body(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            name: FixedString::<0x20>::read(cursor)?,
        })
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        FixedString::<0x20>::write(&self.name, out)
    }
}

/// Request for a client to warp to another stage.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeStage {
    pub change_stage: String,
    pub change_id: String,
    pub scenario_num: i8,
    pub sub_scenario_type: u8,
}

impl Payload for ChangeStage {
    const KIND: PacketKind = PacketKind::ChangeStage;
    const SIZE: usize = 0x30 + 0x10 + 1 + 1;

    fn read_body(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            change_stage: FixedString::<0x30>::read(cursor)?,
            change_id: FixedString::<0x10>::read(cursor)?,
            scenario_num: i8::read(cursor)?,
            sub_scenario_type: u8::read(cursor)?,
        })
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        FixedString::<0x30>::write(&self.change_stage, out)?;
        FixedString::<0x10>::write(&self.change_id, out)?;
        self.scenario_num.write(out)?;
        self.sub_scenario_type.write(out)
    }
}

/// Free-form command addressed to the server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerCommand {
    pub command: String,
}

impl Payload for ServerCommand {
    const KIND: PacketKind = PacketKind::ServerCommand;
    const SIZE: usize = 0x30;

    fn read_body(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            command: FixedString::<0x30>::read(cursor)?,
        })
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        FixedString::<0x30>::write(&self.command, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode<P: Payload>(payload: &P) -> Vec<u8> {
        let mut out = Vec::new();
        payload.write_body(&mut out).unwrap();
        assert_eq!(out.len(), P::SIZE, "{:?} size", P::KIND);
        out
    }

    fn decode<P: Payload>(bytes: &[u8]) -> Result<P, CodecError> {
        let mut cursor = Cursor::new(bytes);
        P::read_body(&mut cursor)
    }

    #[test]
    fn test_player_connect_defaults_max_players() {
        let packet = PlayerConnect::new(ConnectionType::Reconnect, "Mario");
        assert_eq!(packet.max_players, DEFAULT_MAX_PLAYERS);

        let explicit = PlayerConnect {
            max_players: 8,
            ..PlayerConnect::new(ConnectionType::Init, "Luigi")
        };
        let decoded: PlayerConnect = decode(&encode(&explicit)).unwrap();
        assert_eq!(decoded.max_players, 8);
        assert_eq!(decoded.name, "Luigi");
    }

    #[test]
    fn test_connection_type_rejects_unknown_value() {
        let mut body = encode(&PlayerConnect::default());
        body[..4].copy_from_slice(&7i32.to_le_bytes());
        assert!(matches!(
            decode::<PlayerConnect>(&body),
            Err(CodecError::InvalidEnumValue {
                name: "ConnectionType",
                value: 7
            })
        ));
    }

    #[test]
    fn test_tag_update_type_all_combinations() {
        for bits in 0u8..=3 {
            let packet = TagInfo {
                update_type: TagUpdateType::from_bits(bits).unwrap(),
                is_it: bits % 2 == 0,
                seconds: 59,
                minutes: 0xFFFF,
            };
            let bytes = encode(&packet);
            assert_eq!(bytes[0], bits);
            assert_eq!(decode::<TagInfo>(&bytes).unwrap(), packet);
        }
    }

    #[test]
    fn test_tag_update_type_rejects_unknown_bits() {
        let bytes = [0b100u8, 0, 0, 0, 0];
        assert!(matches!(
            decode::<TagInfo>(&bytes),
            Err(CodecError::BadFlags { value: 4, .. })
        ));
    }

    #[test]
    fn test_cappy_info_trailing_padding_is_zero() {
        let packet = CappyInfo {
            position: [1.0, 2.0, 3.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
            visible: true,
            anim_name: "x".repeat(0x30),
        };
        let bytes = encode(&packet);
        assert_eq!(bytes.len(), 80);
        assert_eq!(&bytes[77..], &[0, 0, 0]);
        assert_eq!(decode::<CappyInfo>(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_cappy_info_ignores_padding_contents_on_read() {
        let mut bytes = encode(&CappyInfo::default());
        bytes[77..].copy_from_slice(&[0xAA, 0xBB, 0xCC]);
        assert_eq!(decode::<CappyInfo>(&bytes).unwrap(), CappyInfo::default());
    }

    #[test]
    fn test_change_stage_string_boundaries() {
        for len in [0x0F, 0x10] {
            let packet = ChangeStage {
                change_stage: "s".repeat(0x30 - 1),
                change_id: "i".repeat(len),
                scenario_num: -1,
                sub_scenario_type: 255,
            };
            assert_eq!(decode::<ChangeStage>(&encode(&packet)).unwrap(), packet);
        }
    }

    #[test]
    fn test_oversized_string_is_truncated() {
        let packet = CaptureInfo {
            name: "k".repeat(0x28),
        };
        let decoded: CaptureInfo = decode(&encode(&packet)).unwrap();
        assert_eq!(decoded.name, "k".repeat(0x20));
    }

    #[test]
    fn test_disconnect_has_empty_body() {
        assert!(encode(&PlayerDisconnect).is_empty());
        assert_eq!(decode::<PlayerDisconnect>(&[]).unwrap(), PlayerDisconnect);
    }
}
