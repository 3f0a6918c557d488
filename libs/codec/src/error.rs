//! Protocol-level errors for D-Bus marshalling
//!
//! Provides error handling for the wire codec with enough context (offsets,
//! expected and actual values) to locate the offending bytes when a peer sends
//! a malformed message.

use thiserror::Error;

/// Marshalling errors with diagnostic context
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// First preamble byte is neither `'l'` nor `'B'`
    #[error("Invalid byte order marker {marker:#04x}: expected 'l' or 'B'")]
    InvalidByteOrder { marker: u8 },

    /// Buffer ends before a value does
    #[error("Truncated data: need {need} bytes at offset {offset}, buffer has {available} (context: {context})")]
    Truncated {
        need: usize,
        offset: usize,
        available: usize,
        context: String,
    },

    /// Alignment padding must be zero
    #[error("Non-zero padding byte at offset {offset}")]
    InvalidPadding { offset: usize },

    #[error("Invalid signature {signature:?}: {reason}")]
    InvalidSignature { signature: String, reason: String },

    #[error("Invalid object path {path:?}")]
    InvalidObjectPath { path: String },

    /// Booleans are marshalled as a u32 that must be 0 or 1
    #[error("Invalid boolean value {value} at offset {offset}")]
    InvalidBoolean { value: u32, offset: usize },

    #[error("Invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("String at offset {offset} is not nul-terminated")]
    MissingNulTerminator { offset: usize },

    #[error("Array length {length} exceeds limit {limit}")]
    ArrayTooLong { length: usize, limit: usize },

    /// Array contents end somewhere other than the declared length
    #[error("Array at offset {offset} declares {declared} bytes but elements end at {actual}")]
    ArrayLengthMismatch {
        offset: usize,
        declared: usize,
        actual: usize,
    },

    #[error("Message length {length} exceeds maximum {max}")]
    MessageTooLarge { length: usize, max: usize },

    #[error("Unknown message type {value}")]
    UnknownMessageType { value: u8 },

    #[error("Unsupported protocol version {version}: supported version is 1")]
    UnsupportedVersion { version: u8 },

    #[error("Message serial must be non-zero")]
    ZeroSerial,

    #[error("Header field {code} has wrong type: expected {expected}, got {actual}")]
    HeaderFieldType {
        code: u8,
        expected: String,
        actual: String,
    },

    #[error("{message_type} message is missing required header field {field}")]
    MissingHeaderField { message_type: String, field: String },

    /// Body bytes do not agree with the SIGNATURE header field
    #[error("Body does not match signature {signature:?}: {reason}")]
    BodyMismatch { signature: String, reason: String },

    #[error("Unix fd index {index} out of range ({available} descriptors attached)")]
    FdIndexOutOfRange { index: u32, available: usize },

    #[error("Unix fd count mismatch: header declares {declared}, {attached} attached")]
    FdCountMismatch { declared: u32, attached: usize },

    /// Array item whose type differs from the array element type
    #[error("Value of type {actual:?} does not match element signature {expected:?}")]
    ValueMismatch { expected: String, actual: String },

    /// Containers nested past the protocol limit
    #[error("Nesting depth {depth} exceeds limit {limit}")]
    NestingTooDeep { depth: usize, limit: usize },
}

/// Result type for codec operations
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

impl ProtocolError {
    /// Create a Truncated error for a read of `need` bytes at `offset`
    pub fn truncated(need: usize, offset: usize, available: usize, context: impl Into<String>) -> Self {
        Self::Truncated {
            need,
            offset,
            available,
            context: context.into(),
        }
    }

    pub fn invalid_signature(signature: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSignature {
            signature: signature.into(),
            reason: reason.into(),
        }
    }

    pub fn header_field_type(code: u8, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::HeaderFieldType {
            code,
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn missing_header_field(message_type: impl std::fmt::Display, field: impl Into<String>) -> Self {
        Self::MissingHeaderField {
            message_type: message_type.to_string(),
            field: field.into(),
        }
    }

    pub fn body_mismatch(signature: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BodyMismatch {
            signature: signature.into(),
            reason: reason.into(),
        }
    }

    /// Get error category for log fields
    pub fn category(&self) -> &'static str {
        match self {
            ProtocolError::InvalidByteOrder { .. } => "byte_order",
            ProtocolError::Truncated { .. } => "truncated",
            ProtocolError::InvalidPadding { .. } => "padding",
            ProtocolError::InvalidSignature { .. } => "signature",
            ProtocolError::InvalidObjectPath { .. } => "object_path",
            ProtocolError::InvalidBoolean { .. }
            | ProtocolError::InvalidUtf8 { .. }
            | ProtocolError::MissingNulTerminator { .. } => "value",
            ProtocolError::ArrayTooLong { .. } | ProtocolError::ArrayLengthMismatch { .. } => "array",
            ProtocolError::MessageTooLarge { .. } => "size",
            ProtocolError::UnknownMessageType { .. }
            | ProtocolError::UnsupportedVersion { .. }
            | ProtocolError::ZeroSerial => "preamble",
            ProtocolError::HeaderFieldType { .. } | ProtocolError::MissingHeaderField { .. } => "header",
            ProtocolError::BodyMismatch { .. } | ProtocolError::ValueMismatch { .. } => "body",
            ProtocolError::FdIndexOutOfRange { .. } | ProtocolError::FdCountMismatch { .. } => "unix_fd",
            ProtocolError::NestingTooDeep { .. } => "nesting",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = ProtocolError::truncated(4, 12, 14, "array length");
        let text = err.to_string();
        assert!(text.contains("need 4 bytes"));
        assert!(text.contains("offset 12"));
        assert!(text.contains("array length"));
    }

    #[test]
    fn test_error_categorization() {
        assert_eq!(ProtocolError::InvalidByteOrder { marker: b'x' }.category(), "byte_order");
        assert_eq!(ProtocolError::ZeroSerial.category(), "preamble");
        assert_eq!(
            ProtocolError::FdCountMismatch { declared: 2, attached: 1 }.category(),
            "unix_fd"
        );
    }
}
