//! Message model and full-message marshalling
//!
//! Layout of every message:
//!
//! ```text
//! [order:1][type:1][flags:1][version:1][body_len:4][serial:4][fields_len:4]
//! [header fields a(yv) ...][pad to 8][body ...]
//! ```

use crate::byte_order::ByteOrder;
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{ProtocolError, ProtocolResult};
use crate::fd::OwnedFd;
use crate::header::{HeaderCode, HeaderFields, HEADER_FIELDS_OFFSET, HEADER_FIELDS_SIGNATURE};
use crate::signature::Signature;
use crate::value::{ObjectPath, Value};
use std::fmt;
use std::ops::BitOr;

/// Length of the fixed preamble
pub const PREAMBLE_LEN: usize = 16;

/// Only supported major protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum length of a whole message (128 MiB)
pub const MAX_MESSAGE_SIZE: usize = 1 << 27;

/// Message type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    MethodCall = 1,
    MethodReturn = 2,
    Error = 3,
    Signal = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> ProtocolResult<Self> {
        match value {
            1 => Ok(MessageType::MethodCall),
            2 => Ok(MessageType::MethodReturn),
            3 => Ok(MessageType::Error),
            4 => Ok(MessageType::Signal),
            _ => Err(ProtocolError::UnknownMessageType { value }),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::MethodCall => "method call",
            MessageType::MethodReturn => "method return",
            MessageType::Error => "error",
            MessageType::Signal => "signal",
        };
        f.write_str(name)
    }
}

/// Message flags byte; unknown bits are preserved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const NO_REPLY_EXPECTED: Flags = Flags(0x1);
    pub const NO_AUTO_START: Flags = Flags(0x2);
    pub const ALLOW_INTERACTIVE_AUTHORIZATION: Flags = Flags(0x4);

    pub fn from_bits_retain(bits: u8) -> Self {
        Flags(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// A complete D-Bus message
///
/// Descriptors referenced by [`Value::UnixFd`] indices travel out-of-band and
/// are held in `fds`; they never appear in the encoded bytes.
#[derive(Debug)]
pub struct Message {
    message_type: MessageType,
    flags: Flags,
    serial: u32,
    headers: HeaderFields,
    body: Vec<Value>,
    fds: Vec<OwnedFd>,
}

impl Message {
    fn new(message_type: MessageType, headers: HeaderFields) -> Self {
        Self {
            message_type,
            flags: Flags::NONE,
            serial: 0,
            headers,
            body: Vec::new(),
            fds: Vec::new(),
        }
    }

    pub fn method_call(path: ObjectPath, member: impl Into<String>) -> Self {
        Self::new(
            MessageType::MethodCall,
            HeaderFields {
                path: Some(path),
                member: Some(member.into()),
                ..Default::default()
            },
        )
    }

    pub fn method_return(reply_serial: u32) -> Self {
        Self::new(
            MessageType::MethodReturn,
            HeaderFields {
                reply_serial: Some(reply_serial),
                ..Default::default()
            },
        )
    }

    pub fn error(error_name: impl Into<String>, reply_serial: u32) -> Self {
        Self::new(
            MessageType::Error,
            HeaderFields {
                error_name: Some(error_name.into()),
                reply_serial: Some(reply_serial),
                ..Default::default()
            },
        )
    }

    pub fn signal(path: ObjectPath, interface: impl Into<String>, member: impl Into<String>) -> Self {
        Self::new(
            MessageType::Signal,
            HeaderFields {
                path: Some(path),
                interface: Some(interface.into()),
                member: Some(member.into()),
                ..Default::default()
            },
        )
    }

    pub fn with_serial(mut self, serial: u32) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.headers.interface = Some(interface.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.headers.destination = Some(destination.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.headers.sender = Some(sender.into());
        self
    }

    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.body.push(arg.into());
        self
    }

    pub fn with_body(mut self, body: Vec<Value>) -> Self {
        self.body = body;
        self
    }

    /// Attach a descriptor and get the value that references it
    pub fn attach_fd(&mut self, fd: OwnedFd) -> Value {
        self.fds.push(fd);
        Value::UnixFd(self.fds.len() as u32 - 1)
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn headers(&self) -> &HeaderFields {
        &self.headers
    }

    pub fn body(&self) -> &[Value] {
        &self.body
    }

    pub fn fds(&self) -> &[OwnedFd] {
        &self.fds
    }

    /// Take ownership of the attached descriptors
    pub fn take_fds(&mut self) -> Vec<OwnedFd> {
        std::mem::take(&mut self.fds)
    }

    /// Signature of the body values
    pub fn body_signature(&self) -> String {
        self.body.iter().map(Value::signature).collect()
    }

    /// Marshal the whole message with `order`
    ///
    /// The SIGNATURE and UNIX_FDS header fields are derived from the body and
    /// the attached descriptors.
    pub fn encode(&self, order: ByteOrder) -> ProtocolResult<Vec<u8>> {
        if self.serial == 0 {
            return Err(ProtocolError::ZeroSerial);
        }

        let mut headers = self.headers.clone();
        let body_signature = self.body_signature();
        headers.signature = if body_signature.is_empty() {
            None
        } else {
            Some(Signature::new(body_signature)?)
        };
        headers.unix_fds = if self.fds.is_empty() {
            None
        } else {
            Some(self.fds.len() as u32)
        };
        validate_required(self.message_type, &headers)?;
        check_fd_indices(&self.body, self.fds.len())?;

        let mut enc = Encoder::new(order);
        enc.put_u8(order.marker());
        enc.put_u8(self.message_type as u8);
        enc.put_u8(self.flags.bits());
        enc.put_u8(PROTOCOL_VERSION);
        enc.put_u32(0);
        enc.put_u32(self.serial);
        enc.encode(&headers.to_value())?;
        enc.align(8);

        let body_start = enc.len();
        for value in &self.body {
            enc.encode(value)?;
        }
        let body_len = enc.len() - body_start;
        enc.patch_u32(4, body_len as u32);

        if enc.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                length: enc.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(enc.into_bytes())
    }

    /// Unmarshal one complete message from exactly `bytes`
    ///
    /// `fds` are the descriptors received alongside the bytes; their number
    /// must match the UNIX_FDS header field.
    pub fn decode(bytes: &[u8], fds: Vec<OwnedFd>) -> ProtocolResult<Self> {
        if bytes.len() < PREAMBLE_LEN {
            return Err(ProtocolError::truncated(PREAMBLE_LEN, 0, bytes.len(), "message preamble"));
        }
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                length: bytes.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let order = ByteOrder::from_marker(bytes[0])?;
        let message_type = MessageType::try_from(bytes[1])?;
        let flags = Flags::from_bits_retain(bytes[2]);
        if bytes[3] != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion { version: bytes[3] });
        }
        let body_len = order.read_u32(&bytes[4..8]) as usize;
        let serial = order.read_u32(&bytes[8..12]);
        if serial == 0 {
            return Err(ProtocolError::ZeroSerial);
        }

        let mut dec = Decoder::at(bytes, order, HEADER_FIELDS_OFFSET);
        let headers = HeaderFields::from_value(dec.decode_value(HEADER_FIELDS_SIGNATURE.as_bytes())?)?;
        dec.align(8)?;
        let body_start = dec.position();
        let body_end = body_start + body_len;
        if body_end != bytes.len() {
            return Err(ProtocolError::body_mismatch(
                headers.signature.as_ref().map(Signature::as_str).unwrap_or(""),
                format!("body length {} disagrees with {} remaining bytes", body_len, bytes.len() - body_start),
            ));
        }
        validate_required(message_type, &headers)?;

        let declared = headers.unix_fd_count();
        if declared as usize != fds.len() {
            return Err(ProtocolError::FdCountMismatch {
                declared,
                attached: fds.len(),
            });
        }

        let signature = headers.signature.clone().unwrap_or_default();
        let mut body_dec = Decoder::at(bytes, order, body_start);
        let body = body_dec.decode(&signature)?;
        if body_dec.position() != body_end {
            return Err(ProtocolError::body_mismatch(
                signature.as_str(),
                format!("values end at {} but body ends at {}", body_dec.position(), body_end),
            ));
        }
        check_fd_indices(&body, fds.len())?;

        Ok(Self {
            message_type,
            flags,
            serial,
            headers,
            body,
            fds,
        })
    }
}

fn validate_required(message_type: MessageType, headers: &HeaderFields) -> ProtocolResult<()> {
    let missing = |code: HeaderCode| ProtocolError::missing_header_field(message_type, code.name());

    match message_type {
        MessageType::MethodCall => {
            headers.path.as_ref().ok_or_else(|| missing(HeaderCode::Path))?;
            headers.member.as_ref().ok_or_else(|| missing(HeaderCode::Member))?;
        }
        MessageType::Signal => {
            headers.path.as_ref().ok_or_else(|| missing(HeaderCode::Path))?;
            headers.interface.as_ref().ok_or_else(|| missing(HeaderCode::Interface))?;
            headers.member.as_ref().ok_or_else(|| missing(HeaderCode::Member))?;
        }
        MessageType::Error => {
            headers.error_name.as_ref().ok_or_else(|| missing(HeaderCode::ErrorName))?;
            headers.reply_serial.ok_or_else(|| missing(HeaderCode::ReplySerial))?;
        }
        MessageType::MethodReturn => {
            headers.reply_serial.ok_or_else(|| missing(HeaderCode::ReplySerial))?;
        }
    }
    Ok(())
}

fn check_fd_indices(body: &[Value], available: usize) -> ProtocolResult<()> {
    body.iter().try_for_each(|value| {
        value.for_each_fd(&mut |index| {
            if (index as usize) < available {
                Ok(())
            } else {
                Err(ProtocolError::FdIndexOutOfRange { index, available })
            }
        })
    })
}
