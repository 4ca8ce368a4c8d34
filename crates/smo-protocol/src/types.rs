//! Primitive protocol types: player UIDs and float vectors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Three packed `f32`s. Position and direction fields.
pub type Vector3f = [f32; 3];

/// Four packed `f32`s. Rotation quaternions, stored in wire order.
pub type Quatf = [f32; 4];

/// 128-bit player identifier.
///
/// On the wire the first three groups are little-endian, matching the game
/// client's GUID layout; use [`ClientId::from_bytes_le`] /
/// [`ClientId::to_bytes_le`] at the codec edge. Serialized as the hyphenated
/// string.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    /// The reserved "unset" id.
    pub const NIL: ClientId = ClientId(Uuid::nil());

    /// Fresh random (version 4) id.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap canonical UUID bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Convert from the mixed-endian wire layout.
    pub fn from_bytes_le(wire: [u8; 16]) -> Self {
        Self(Uuid::from_bytes_le(wire))
    }

    /// Canonical bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Mixed-endian wire layout.
    pub fn to_bytes_le(&self) -> [u8; 16] {
        self.0.to_bytes_le()
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for ClientId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for ClientId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({self})")
    }
}
