//! Field-level codecs.
//!
//! Every scalar that appears in a packet body implements [`WireField`]. All
//! multi-byte integers and floats are little-endian. Fixed-capacity strings and
//! alignment padding carry their width in the type ([`FixedString`],
//! [`Padding`]) and operate on plain `String`s / nothing respectively.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::CodecError;
use crate::types::ClientId;

/// A value with a fixed-width binary encoding.
pub trait WireField: Sized {
    /// Number of bytes [`WireField::write`] produces.
    const SIZE: usize;

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError>;

    fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError>;
}

impl WireField for bool {
    const SIZE: usize = 1;

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        match cursor.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            by => Err(CodecError::BadBool(by)),
        }
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.write_u8(*self as u8).map_err(Into::into)
    }
}

impl WireField for u8 {
    const SIZE: usize = 1;

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        cursor.read_u8().map_err(Into::into)
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.write_u8(*self).map_err(Into::into)
    }
}

impl WireField for i8 {
    const SIZE: usize = 1;

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        cursor.read_i8().map_err(Into::into)
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.write_i8(*self).map_err(Into::into)
    }
}

macro_rules! impl_le_wire_field {
    ($ty:ty, $size:expr, $read:ident, $write:ident) => {
        impl WireField for $ty {
            const SIZE: usize = $size;

            fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
                cursor.$read::<LittleEndian>().map_err(Into::into)
            }

            fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
                out.$write::<LittleEndian>(*self).map_err(Into::into)
            }
        }
    };
}

impl_le_wire_field!(u16, 2, read_u16, write_u16);
impl_le_wire_field!(i16, 2, read_i16, write_i16);
impl_le_wire_field!(u32, 4, read_u32, write_u32);
impl_le_wire_field!(i32, 4, read_i32, write_i32);
impl_le_wire_field!(f32, 4, read_f32, write_f32);

impl<const N: usize> WireField for [f32; N] {
    const SIZE: usize = 4 * N;

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let mut dest = [0f32; N];
        cursor.read_f32_into::<LittleEndian>(&mut dest)?;
        Ok(dest)
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        for value in self {
            out.write_f32::<LittleEndian>(*value)?;
        }
        Ok(())
    }
}

impl WireField for ClientId {
    const SIZE: usize = 16;

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let mut wire = [0u8; 16];
        cursor.read_exact(&mut wire)?;
        Ok(ClientId::from_bytes_le(wire))
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.extend_from_slice(&self.to_bytes_le());
        Ok(())
    }
}

/// Null-padded string occupying exactly `N` bytes.
///
/// Encoding truncates to the longest UTF-8 prefix that fits in `N` bytes and
/// zero-fills the rest; a string of exactly `N` bytes has no terminator.
/// Decoding stops at the first NUL.
pub struct FixedString<const N: usize>;

impl<const N: usize> FixedString<N> {
    pub const SIZE: usize = N;

    pub fn read(cursor: &mut Cursor<&[u8]>) -> Result<String, CodecError> {
        let mut raw = [0u8; N];
        cursor.read_exact(&mut raw)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(N);
        Ok(std::str::from_utf8(&raw[..end])?.to_owned())
    }

    pub fn write(value: &str, out: &mut Vec<u8>) -> Result<(), CodecError> {
        let fitted = Self::truncate(value);
        out.extend_from_slice(fitted.as_bytes());
        out.resize(out.len() + (N - fitted.len()), 0);
        Ok(())
    }

    /// The prefix of `value` that survives encoding.
    pub fn truncate(value: &str) -> &str {
        let mut end = value.len().min(N);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        &value[..end]
    }
}

/// `N` alignment bytes: written as zeros, skipped on read.
pub struct Padding<const N: usize>;

impl<const N: usize> Padding<N> {
    pub const SIZE: usize = N;

    pub fn read(cursor: &mut Cursor<&[u8]>) -> Result<(), CodecError> {
        let mut skipped = [0u8; N];
        cursor.read_exact(&mut skipped)?;
        Ok(())
    }

    pub fn write(out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.resize(out.len() + N, 0);
        Ok(())
    }
}
