//! # D-Bus Wire Codec
//!
//! ## Purpose
//!
//! Marshalling rules for the D-Bus wire format, consumed by the transport
//! layer in `dbus-network`:
//! - Per-message byte order detection (`'l'` / `'B'`)
//! - Signature validation and single-complete-type iteration
//! - Signature-driven value decoding and encoding with alignment rules
//! - Header-fields array (`a(yv)`) decoding used by message framing
//! - Full message encoding and decoding with out-of-band descriptor indices
//!
//! ## What This Crate Does NOT Contain
//! - Socket management or connection handling (belongs in `dbus-network`)
//! - Authentication
//! - Method dispatch or bus-name semantics

pub mod byte_order;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod fd;
pub mod header;
pub mod message;
pub mod signature;
pub mod value;

pub use byte_order::ByteOrder;
pub use decoder::{Decoder, MAX_ARRAY_LEN};
pub use encoder::Encoder;
pub use error::{ProtocolError, ProtocolResult};
pub use fd::OwnedFd;
pub use header::{decode_header_fields, HeaderCode, HeaderFields, HEADER_FIELDS_OFFSET};
pub use message::{Flags, Message, MessageType, MAX_MESSAGE_SIZE, PREAMBLE_LEN, PROTOCOL_VERSION};
pub use signature::Signature;
pub use value::{Array, ObjectPath, Value};
