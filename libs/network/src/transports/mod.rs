//! Transport Layer
//!
//! Every bus connection runs over one [`Transport`]. Concrete transports own
//! their socket, frame inbound messages with [`crate::framing::read_frame`]
//! and encode outbound messages in little-endian order.
//!
//! One reader and one writer may use a transport at the same time: the read
//! and write paths are guarded separately.

use crate::Result;
use async_trait::async_trait;
use dbus_codec::{ByteOrder, Message};

pub mod tcp;
#[cfg(unix)]
pub mod unix;


pub use tcp::TcpTransport;
#[cfg(unix)]
pub use unix::UnixTransport;

/// Byte order of every message a transport sends
pub const OUTBOUND_BYTE_ORDER: ByteOrder = ByteOrder::Little;

/// Transport trait implemented by every connection mechanism
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name as it appears in bus addresses
    fn kind(&self) -> &'static str;

    /// Write the single zero byte that opens the authentication handshake
    async fn send_auth_byte(&self) -> Result<()>;

    /// Turn on descriptor passing after it was negotiated
    ///
    /// Best effort: transports that cannot pass descriptors ignore the call.
    /// Check [`Transport::supports_unix_fds`] afterwards.
    fn enable_unix_fds(&self);

    fn supports_unix_fds(&self) -> bool;

    /// Encode `message` and write it out
    async fn send_message(&self, message: &Message) -> Result<()>;

    /// Read and decode the next complete message
    async fn read_message(&self) -> Result<Message>;

    /// Shut down the write side; pending reads see end of stream from the peer
    async fn close(&self) -> Result<()>;
}
