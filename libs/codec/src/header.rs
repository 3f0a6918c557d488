//! Header-fields array (`a(yv)`)
//!
//! The array sits right after the 16-byte preamble; its length field is the
//! last preamble word (offset 12).

use crate::byte_order::ByteOrder;
use crate::decoder::Decoder;
use crate::error::{ProtocolError, ProtocolResult};
use crate::signature::Signature;
use crate::value::{Array, ObjectPath, Value};
use tracing::trace;

/// Offset of the header-fields array length inside the preamble
pub const HEADER_FIELDS_OFFSET: usize = 12;

/// Signature of the header-fields array
pub const HEADER_FIELDS_SIGNATURE: &str = "a(yv)";

/// Header field codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HeaderCode {
    Path = 1,
    Interface = 2,
    Member = 3,
    ErrorName = 4,
    ReplySerial = 5,
    Destination = 6,
    Sender = 7,
    Signature = 8,
    UnixFds = 9,
}

impl HeaderCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            1 => HeaderCode::Path,
            2 => HeaderCode::Interface,
            3 => HeaderCode::Member,
            4 => HeaderCode::ErrorName,
            5 => HeaderCode::ReplySerial,
            6 => HeaderCode::Destination,
            7 => HeaderCode::Sender,
            8 => HeaderCode::Signature,
            9 => HeaderCode::UnixFds,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            HeaderCode::Path => "PATH",
            HeaderCode::Interface => "INTERFACE",
            HeaderCode::Member => "MEMBER",
            HeaderCode::ErrorName => "ERROR_NAME",
            HeaderCode::ReplySerial => "REPLY_SERIAL",
            HeaderCode::Destination => "DESTINATION",
            HeaderCode::Sender => "SENDER",
            HeaderCode::Signature => "SIGNATURE",
            HeaderCode::UnixFds => "UNIX_FDS",
        }
    }

    fn expected_signature(self) -> &'static str {
        match self {
            HeaderCode::Path => "o",
            HeaderCode::ReplySerial | HeaderCode::UnixFds => "u",
            HeaderCode::Signature => "g",
            _ => "s",
        }
    }
}

/// Decoded header fields
///
/// Unknown codes are skipped on decode, as the protocol requires.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HeaderFields {
    pub path: Option<ObjectPath>,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub error_name: Option<String>,
    pub reply_serial: Option<u32>,
    pub destination: Option<String>,
    pub sender: Option<String>,
    pub signature: Option<Signature>,
    pub unix_fds: Option<u32>,
}

impl HeaderFields {
    /// Interpret a decoded `a(yv)` value
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        let Value::Array(array) = value else {
            return Err(ProtocolError::header_field_type(0, HEADER_FIELDS_SIGNATURE, value.signature()));
        };

        let mut fields = HeaderFields::default();
        for entry in array.into_items() {
            let Value::Struct(mut parts) = entry else {
                continue;
            };
            let (Some(Value::Variant(inner)), Some(Value::Byte(code))) = (parts.pop(), parts.pop()) else {
                continue;
            };
            let Some(code) = HeaderCode::from_u8(code) else {
                trace!(code, "Skipping unknown header field");
                continue;
            };
            fields.set(code, *inner)?;
        }
        Ok(fields)
    }

    fn set(&mut self, code: HeaderCode, value: Value) -> ProtocolResult<()> {
        let mismatch = |value: &Value| {
            ProtocolError::header_field_type(code as u8, code.expected_signature(), value.signature())
        };

        match (code, value) {
            (HeaderCode::Path, Value::ObjectPath(p)) => self.path = Some(p),
            (HeaderCode::Interface, Value::String(s)) => self.interface = Some(s),
            (HeaderCode::Member, Value::String(s)) => self.member = Some(s),
            (HeaderCode::ErrorName, Value::String(s)) => self.error_name = Some(s),
            (HeaderCode::ReplySerial, Value::Uint32(v)) => self.reply_serial = Some(v),
            (HeaderCode::Destination, Value::String(s)) => self.destination = Some(s),
            (HeaderCode::Sender, Value::String(s)) => self.sender = Some(s),
            (HeaderCode::Signature, Value::Signature(s)) => self.signature = Some(s),
            (HeaderCode::UnixFds, Value::Uint32(v)) => self.unix_fds = Some(v),
            (_, other) => return Err(mismatch(&other)),
        }
        Ok(())
    }

    /// Build the `a(yv)` value in code order
    pub fn to_value(&self) -> Value {
        let mut entries = Vec::new();
        let mut push = |code: HeaderCode, value: Value| {
            entries.push(Value::Struct(vec![Value::Byte(code as u8), value.into_variant()]));
        };

        if let Some(p) = &self.path {
            push(HeaderCode::Path, Value::ObjectPath(p.clone()));
        }
        if let Some(s) = &self.interface {
            push(HeaderCode::Interface, s.as_str().into());
        }
        if let Some(s) = &self.member {
            push(HeaderCode::Member, s.as_str().into());
        }
        if let Some(s) = &self.error_name {
            push(HeaderCode::ErrorName, s.as_str().into());
        }
        if let Some(v) = self.reply_serial {
            push(HeaderCode::ReplySerial, Value::Uint32(v));
        }
        if let Some(s) = &self.destination {
            push(HeaderCode::Destination, s.as_str().into());
        }
        if let Some(s) = &self.sender {
            push(HeaderCode::Sender, s.as_str().into());
        }
        if let Some(s) = &self.signature {
            push(HeaderCode::Signature, Value::Signature(s.clone()));
        }
        if let Some(v) = self.unix_fds {
            push(HeaderCode::UnixFds, Value::Uint32(v));
        }

        Value::Array(Array::from_parts_unchecked(
            Signature::trusted("(yv)"),
            entries,
        ))
    }

    /// Number of descriptors the message declares
    pub fn unix_fd_count(&self) -> u32 {
        self.unix_fds.unwrap_or(0)
    }
}

/// Decode the header-fields array of a message
///
/// `buf` starts at the first preamble byte; decoding begins at the length word
/// at offset 12 so alignment matches the full message.
pub fn decode_header_fields(buf: &[u8], order: ByteOrder) -> ProtocolResult<HeaderFields> {
    let mut decoder = Decoder::at(buf, order, HEADER_FIELDS_OFFSET);
    let value = decoder.decode_value(HEADER_FIELDS_SIGNATURE.as_bytes())?;
    HeaderFields::from_value(value)
}
