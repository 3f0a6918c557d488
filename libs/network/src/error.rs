//! Transport Error Types
//!
//! Error handling for address resolution, transport construction and message
//! framing. No error here is retried internally; callers own reconnect policy.

use dbus_codec::ProtocolError;
use std::net::SocketAddr;
use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Missing or malformed address parameters or settings
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// A constructor is already registered under this transport name
    #[error("Transport already registered: {name}")]
    DuplicateTransport { name: String },

    /// Address names a transport with no registered constructor
    #[error("Unsupported transport: {name}")]
    UnsupportedTransport { name: String },

    /// Dial failures (refused, unreachable, name resolution)
    #[error("Connection error: {message} (remote: {remote_addr:?})")]
    Connection {
        message: String,
        remote_addr: Option<String>,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Read or write failure on an open connection
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Framing or protocol violation; the stream position is indeterminate
    #[error("Invalid message: {message}")]
    InvalidMessage {
        message: String,
        #[source]
        source: Option<ProtocolError>,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    pub fn unsupported_transport(name: impl Into<String>) -> Self {
        Self::UnsupportedTransport { name: name.into() }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>, remote_addr: Option<String>) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        remote_addr: Option<SocketAddr>,
        source: std::io::Error,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr: remote_addr.map(|a| a.to_string()),
            source: Some(source),
        }
    }

    /// Create an I/O error keeping the original error kind
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create an invalid message error
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::InvalidMessage {
            message: message.into(),
            source: None,
        }
    }

    /// Kind of the underlying I/O error, if any
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            TransportError::Io { source, .. } => Some(source.kind()),
            TransportError::Connection { source, .. } => source.as_ref().map(|e| e.kind()),
            _ => None,
        }
    }

    /// Get error category for log fields
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::Configuration { .. } => "configuration",
            TransportError::DuplicateTransport { .. } => "duplicate_transport",
            TransportError::UnsupportedTransport { .. } => "unsupported_transport",
            TransportError::Connection { .. } => "connection",
            TransportError::Io { .. } => "io",
            TransportError::InvalidMessage { .. } => "invalid_message",
        }
    }
}

/// Convert standard I/O errors to transport errors
impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        TransportError::Io {
            message: error.to_string(),
            source: error,
        }
    }
}

/// Codec failures on received bytes are protocol violations
impl From<ProtocolError> for TransportError {
    fn from(error: ProtocolError) -> Self {
        TransportError::InvalidMessage {
            message: error.to_string(),
            source: Some(error),
        }
    }
}

/// Convert serde YAML errors to transport errors
impl From<serde_yaml::Error> for TransportError {
    fn from(error: serde_yaml::Error) -> Self {
        TransportError::configuration(format!("YAML configuration error: {}", error), None)
    }
}
