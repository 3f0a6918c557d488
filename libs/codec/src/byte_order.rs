//! Per-message byte order
//!
//! Every D-Bus message announces its byte order in the first preamble byte.
//! All multi-byte integers of that message, including the two length fields of
//! the preamble itself, are read and written with that order.

use crate::error::{ProtocolError, ProtocolResult};
use byteorder::{BigEndian, ByteOrder as Endian, LittleEndian};

/// Byte order of a single message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    /// Marker `'l'`
    Little,
    /// Marker `'B'`
    Big,
}

impl ByteOrder {
    pub const LITTLE_MARKER: u8 = b'l';
    pub const BIG_MARKER: u8 = b'B';

    /// Select the byte order from the first preamble byte
    pub fn from_marker(marker: u8) -> ProtocolResult<Self> {
        match marker {
            Self::LITTLE_MARKER => Ok(ByteOrder::Little),
            Self::BIG_MARKER => Ok(ByteOrder::Big),
            _ => Err(ProtocolError::InvalidByteOrder { marker }),
        }
    }

    /// Marker byte written at preamble offset 0
    pub fn marker(self) -> u8 {
        match self {
            ByteOrder::Little => Self::LITTLE_MARKER,
            ByteOrder::Big => Self::BIG_MARKER,
        }
    }

    /// Byte order of the host
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    #[inline]
    pub fn read_u16(self, buf: &[u8]) -> u16 {
        match self {
            ByteOrder::Little => LittleEndian::read_u16(buf),
            ByteOrder::Big => BigEndian::read_u16(buf),
        }
    }

    #[inline]
    pub fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            ByteOrder::Little => LittleEndian::read_u32(buf),
            ByteOrder::Big => BigEndian::read_u32(buf),
        }
    }

    #[inline]
    pub fn read_u64(self, buf: &[u8]) -> u64 {
        match self {
            ByteOrder::Little => LittleEndian::read_u64(buf),
            ByteOrder::Big => BigEndian::read_u64(buf),
        }
    }

    #[inline]
    pub fn write_u16(self, buf: &mut [u8], value: u16) {
        match self {
            ByteOrder::Little => LittleEndian::write_u16(buf, value),
            ByteOrder::Big => BigEndian::write_u16(buf, value),
        }
    }

    #[inline]
    pub fn write_u32(self, buf: &mut [u8], value: u32) {
        match self {
            ByteOrder::Little => LittleEndian::write_u32(buf, value),
            ByteOrder::Big => BigEndian::write_u32(buf, value),
        }
    }

    #[inline]
    pub fn write_u64(self, buf: &mut [u8], value: u64) {
        match self {
            ByteOrder::Little => LittleEndian::write_u64(buf, value),
            ByteOrder::Big => BigEndian::write_u64(buf, value),
        }
    }
}
