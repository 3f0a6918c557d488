//! Message Framing
//!
//! D-Bus messages have no fixed-offset length prefix. The total length comes
//! from two preamble fields, `body_length` at offset 4 and the header-fields
//! array length at offset 12, with the array padded to an 8-byte boundary:
//!
//! ```text
//! ┌───────────┬──────────────────────┬─────────┬────────────┐
//! │ Preamble  │ Header fields a(yv)  │ Padding │ Body       │
//! │ 16 bytes  │ fields_len bytes     │ to 8    │ body_len   │
//! └───────────┴──────────────────────┴─────────┴────────────┘
//! ```
//!
//! [`read_frame`] pulls exactly one message from a [`FrameSource`], never
//! reading past its last body byte. Descriptors passed out-of-band are taken
//! from the source's queue once the frame is complete.

use crate::{Result, TransportError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dbus_codec::{
    decode_header_fields, ByteOrder, HeaderFields, Message, OwnedFd, ProtocolError, PREAMBLE_LEN,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Offset of the body length in the preamble
const BODY_LEN_OFFSET: usize = 4;

/// Offset of the header-fields array length in the preamble
const FIELDS_LEN_OFFSET: usize = 12;

/// Byte source a frame is read from
#[async_trait]
pub trait FrameSource: Send {
    /// Fill `buf` completely; running out of bytes is an error
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Remove `count` queued descriptors received alongside the bytes read so far
    ///
    /// Sources without descriptor passing only satisfy a count of zero.
    fn take_fds(&mut self, count: usize) -> Result<Vec<OwnedFd>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        Err(TransportError::invalid_message(format!(
            "message declares {} unix fds but the transport cannot pass descriptors",
            count
        )))
    }
}

/// Frame source over any async byte stream
pub struct StreamSource<R> {
    inner: R,
}

impl<R> StreamSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameSource for StreamSource<R> {
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner
            .read_exact(buf)
            .await
            .map_err(|e| TransportError::io("Failed to read message bytes", e))?;
        Ok(())
    }
}

/// One complete, length-checked message as received
#[derive(Debug)]
pub struct RawFrame {
    /// Byte order declared by the first preamble byte
    pub order: ByteOrder,
    /// Header fields decoded during framing
    pub headers: HeaderFields,
    /// Exactly `16 + padded fields + body` bytes
    pub bytes: Bytes,
    /// Descriptors the frame declared through `UNIX_FDS`
    pub fds: Vec<OwnedFd>,
}

impl RawFrame {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Full decode, re-parsing the header fields along with the body
    pub fn decode(self) -> Result<Message> {
        Ok(Message::decode(&self.bytes, self.fds)?)
    }
}

/// Header-fields length rounded up to the next multiple of 8
///
/// Widened to `u64` so a peer-supplied `u32::MAX` cannot overflow on 32-bit
/// targets.
pub fn padded_header_len(fields_len: u32) -> u64 {
    (u64::from(fields_len) + 7) & !7
}

/// Read exactly one message from `source`
///
/// Frames longer than `max_message_size` are rejected after the preamble,
/// before anything else is read or allocated. Any error leaves the stream at
/// an indeterminate position.
pub async fn read_frame<S>(source: &mut S, max_message_size: usize) -> Result<RawFrame>
where
    S: FrameSource + ?Sized,
{
    let mut preamble = [0u8; PREAMBLE_LEN];
    source.read_exact(&mut preamble).await?;

    let order = ByteOrder::from_marker(preamble[0]).map_err(|e| TransportError::InvalidMessage {
        message: "invalid byte order".to_string(),
        source: Some(e),
    })?;
    let body_len = order.read_u32(&preamble[BODY_LEN_OFFSET..BODY_LEN_OFFSET + 4]);
    let fields_len = order.read_u32(&preamble[FIELDS_LEN_OFFSET..FIELDS_LEN_OFFSET + 4]);

    // Both lengths are u32, so the sum cannot overflow a u64
    let length = PREAMBLE_LEN as u64 + padded_header_len(fields_len) + u64::from(body_len);
    let total = usize::try_from(length)
        .ok()
        .filter(|&n| n <= max_message_size)
        .ok_or_else(|| TransportError::InvalidMessage {
            message: format!("message length {} exceeds maximum {}", length, max_message_size),
            source: Some(ProtocolError::MessageTooLarge {
                length: usize::try_from(length).unwrap_or(usize::MAX),
                max: max_message_size,
            }),
        })?;

    let mut buf = BytesMut::zeroed(total);
    buf[..PREAMBLE_LEN].copy_from_slice(&preamble);

    // fields_len <= padded length, so this stays within `total`
    let fields_end = PREAMBLE_LEN + fields_len as usize;
    source.read_exact(&mut buf[PREAMBLE_LEN..fields_end]).await?;
    let headers = decode_header_fields(&buf[..fields_end], order)?;

    source.read_exact(&mut buf[fields_end..]).await?;

    let fds = source.take_fds(headers.unix_fd_count() as usize)?;

    debug!(
        bytes = total,
        body_len,
        fields_len,
        fds = fds.len(),
        "Framed D-Bus message"
    );

    Ok(RawFrame {
        order,
        headers,
        bytes: buf.freeze(),
        fds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbus_codec::{MessageType, ObjectPath, MAX_MESSAGE_SIZE};
    use proptest::prelude::*;
    use std::io::Cursor;

    fn preamble(order: u8, body_len: u32, serial: u32, fields_len: u32) -> Vec<u8> {
        let mut out = vec![order, 2, 0, 1];
        out.extend_from_slice(&body_len.to_le_bytes());
        out.extend_from_slice(&serial.to_le_bytes());
        out.extend_from_slice(&fields_len.to_le_bytes());
        out
    }

    /// Method return whose only header field is REPLY_SERIAL: 8 field bytes
    fn minimal_return() -> Vec<u8> {
        let mut out = preamble(b'l', 0, 7, 8);
        out.extend_from_slice(&[5, 1, b'u', 0]);
        out.extend_from_slice(&3u32.to_le_bytes());
        out
    }

    #[tokio::test]
    async fn test_minimal_message_is_24_bytes() {
        let mut stream = minimal_return();
        stream.extend_from_slice(&minimal_return());
        let mut source = StreamSource::new(Cursor::new(stream));

        let frame = read_frame(&mut source, MAX_MESSAGE_SIZE).await.unwrap();
        assert_eq!(frame.len(), 24);
        assert_eq!(source.get_ref().position(), 24);
        assert_eq!(frame.headers.reply_serial, Some(3));

        let message = frame.decode().unwrap();
        assert_eq!(message.message_type(), MessageType::MethodReturn);
        assert_eq!(message.serial(), 7);
        assert!(message.body().is_empty());
    }

    #[tokio::test]
    async fn test_empty_header_fields_framed_then_rejected_by_decoder() {
        let mut stream = preamble(b'l', 0, 5, 0);
        stream.extend_from_slice(&minimal_return());
        let mut source = StreamSource::new(Cursor::new(stream));

        let frame = read_frame(&mut source, MAX_MESSAGE_SIZE).await.unwrap();
        assert_eq!(frame.len(), 16);
        assert_eq!(source.get_ref().position(), 16);
        assert_eq!(frame.headers, HeaderFields::default());

        let err = frame.decode().unwrap_err();
        assert_eq!(err.category(), "invalid_message");

        // the stream stays aligned on the next frame
        let next = read_frame(&mut source, MAX_MESSAGE_SIZE).await.unwrap();
        assert_eq!(next.headers.reply_serial, Some(3));
    }

    #[tokio::test]
    async fn test_invalid_byte_order_consumes_only_preamble() {
        let mut stream = preamble(b'x', 0, 1, 8);
        stream.extend_from_slice(&[0u8; 32]);
        let mut source = StreamSource::new(Cursor::new(stream));

        let err = read_frame(&mut source, MAX_MESSAGE_SIZE).await.unwrap_err();
        match err {
            TransportError::InvalidMessage { ref message, .. } => assert_eq!(message, "invalid byte order"),
            other => panic!("Expected InvalidMessage, got {:?}", other),
        }
        assert!(source.get_ref().position() <= 16);
    }

    #[tokio::test]
    async fn test_padding_skipped_before_body() {
        // DESTINATION = "x": 10 field bytes padded to 16
        let mut stream = preamble(b'l', 0, 1, 10);
        stream.extend_from_slice(&[6, 1, b's', 0]);
        stream.extend_from_slice(&1u32.to_le_bytes());
        stream.extend_from_slice(&[b'x', 0]);
        stream.extend_from_slice(&[0u8; 6]);
        stream.extend_from_slice(b"trailing");
        let mut source = StreamSource::new(Cursor::new(stream));

        let frame = read_frame(&mut source, MAX_MESSAGE_SIZE).await.unwrap();
        assert_eq!(frame.len(), 16 + 16);
        assert_eq!(source.get_ref().position(), 32);
        assert_eq!(frame.headers.destination.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_body_follows_padded_fields() {
        // REPLY_SERIAL then SIGNATURE "u": 15 field bytes, 4 body bytes
        let mut stream = preamble(b'l', 4, 9, 15);
        stream.extend_from_slice(&[5, 1, b'u', 0]);
        stream.extend_from_slice(&1u32.to_le_bytes());
        stream.extend_from_slice(&[8, 1, b'g', 0, 1, b'u', 0]);
        stream.push(0);
        stream.extend_from_slice(&42u32.to_le_bytes());
        let mut source = StreamSource::new(Cursor::new(stream));

        let frame = read_frame(&mut source, MAX_MESSAGE_SIZE).await.unwrap();
        assert_eq!(frame.len(), 16 + 16 + 4);
        let message = frame.decode().unwrap();
        assert_eq!(message.body()[0].as_u32(), Some(42));
    }

    #[tokio::test]
    async fn test_big_endian_frame() {
        let message = Message::signal(ObjectPath::new("/org/example").unwrap(), "org.example.Iface", "Changed")
            .with_serial(11)
            .with_arg("payload");
        let bytes = message.encode(ByteOrder::Big).unwrap();
        let mut source = StreamSource::new(Cursor::new(bytes.clone()));

        let frame = read_frame(&mut source, MAX_MESSAGE_SIZE).await.unwrap();
        assert_eq!(frame.order, ByteOrder::Big);
        assert_eq!(&frame.bytes[..], &bytes[..]);
        let decoded = frame.decode().unwrap();
        assert_eq!(decoded.serial(), 11);
        assert_eq!(decoded.body()[0].as_str(), Some("payload"));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_after_preamble() {
        let mut stream = preamble(b'l', 1 << 20, 1, 8);
        stream.extend_from_slice(&[0u8; 64]);
        let mut source = StreamSource::new(Cursor::new(stream));

        let err = read_frame(&mut source, 4096).await.unwrap_err();
        assert_eq!(err.category(), "invalid_message");
        assert_eq!(source.get_ref().position(), 16);
    }

    #[tokio::test]
    async fn test_maximal_lengths_rejected_without_overflow() {
        let mut stream = preamble(b'l', u32::MAX, 1, u32::MAX);
        stream.extend_from_slice(&[0u8; 64]);
        let mut source = StreamSource::new(Cursor::new(stream));

        let err = read_frame(&mut source, MAX_MESSAGE_SIZE).await.unwrap_err();
        match err {
            TransportError::InvalidMessage {
                source: Some(ProtocolError::MessageTooLarge { max, .. }),
                ..
            } => assert_eq!(max, MAX_MESSAGE_SIZE),
            other => panic!("Expected MessageTooLarge, got {:?}", other),
        }
        assert_eq!(source.get_ref().position(), 16);
    }

    #[tokio::test]
    async fn test_short_read_is_io_error() {
        let stream = minimal_return()[..20].to_vec();
        let mut source = StreamSource::new(Cursor::new(stream));

        let err = read_frame(&mut source, MAX_MESSAGE_SIZE).await.unwrap_err();
        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::UnexpectedEof));

        let mut empty = StreamSource::new(Cursor::new(Vec::new()));
        let err = read_frame(&mut empty, MAX_MESSAGE_SIZE).await.unwrap_err();
        assert_eq!(err.category(), "io");
    }

    #[tokio::test]
    async fn test_declared_fds_without_fd_passing() {
        // REPLY_SERIAL then UNIX_FDS = 1
        let mut stream = preamble(b'l', 0, 1, 16);
        stream.extend_from_slice(&[5, 1, b'u', 0]);
        stream.extend_from_slice(&1u32.to_le_bytes());
        stream.extend_from_slice(&[9, 1, b'u', 0]);
        stream.extend_from_slice(&1u32.to_le_bytes());
        let mut source = StreamSource::new(Cursor::new(stream));

        let err = read_frame(&mut source, MAX_MESSAGE_SIZE).await.unwrap_err();
        assert_eq!(err.category(), "invalid_message");
    }

    #[tokio::test]
    async fn test_malformed_header_fields() {
        // REPLY_SERIAL carrying a string instead of a u32
        let mut stream = preamble(b'l', 0, 1, 10);
        stream.extend_from_slice(&[5, 1, b's', 0]);
        stream.extend_from_slice(&1u32.to_le_bytes());
        stream.extend_from_slice(&[b'x', 0]);
        stream.extend_from_slice(&[0u8; 6]);
        let mut source = StreamSource::new(Cursor::new(stream));

        let err = read_frame(&mut source, MAX_MESSAGE_SIZE).await.unwrap_err();
        assert_eq!(err.category(), "invalid_message");
    }

    #[test]
    fn test_padded_header_len() {
        assert_eq!(padded_header_len(0), 0);
        assert_eq!(padded_header_len(8), 8);
        assert_eq!(padded_header_len(10), 16);
        assert_eq!(padded_header_len(17), 24);
        assert_eq!(padded_header_len(u32::MAX), 1 << 32);
    }

    proptest! {
        #[test]
        fn prop_padding_law(fields_len in any::<u32>()) {
            let padded = padded_header_len(fields_len);
            let fields_len = u64::from(fields_len);
            prop_assert_eq!(padded % 8, 0);
            prop_assert!(padded >= fields_len);
            prop_assert!(padded - fields_len < 8);
        }
    }
}
