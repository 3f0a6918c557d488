//! Unix Domain Socket Transport
//!
//! Connects to `unix:path=...` or, on linux, `unix:abstract=...` addresses.
//! Every read goes through `recvmsg` so descriptors sent with `SCM_RIGHTS`
//! are never dropped, whichever read of a frame they arrive with. Received
//! descriptors wait in a per-connection queue until a frame claims them. The
//! queue holds at most `max_fds_per_read` descriptors; a peer sending more
//! than its frames declare fails the read with `InvalidMessage`.

use super::{Transport, OUTBOUND_BYTE_ORDER};
use crate::address::AddressEntry;
use crate::config::{TransportConfig, SCM_MAX_FD};
use crate::framing::{read_frame, FrameSource};
use crate::{Result, TransportError};
use async_trait::async_trait;
use dbus_codec::Message;
use nix::sys::socket::{self, ControlMessage, ControlMessageOwned, MsgFlags, Shutdown};
use std::collections::VecDeque;
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::Interest;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Reader-side state: descriptors received but not yet claimed by a frame
struct ReadState {
    queue: VecDeque<OwnedFd>,
    cmsg: Vec<u8>,
}

/// Unix socket connection to a bus
pub struct UnixTransport {
    stream: UnixStream,
    reader: Mutex<ReadState>,
    writer: Mutex<()>,
    fds_enabled: AtomicBool,
    config: TransportConfig,
    peer: String,
}

impl UnixTransport {
    /// Connect to the socket named by `entry`
    pub async fn dial(entry: &AddressEntry, config: TransportConfig) -> Result<Self> {
        if let Some(path) = entry.get("path").filter(|p| !p.is_empty()) {
            debug!(path, "Connecting to unix bus socket");
            let stream = UnixStream::connect(Path::new(path))
                .await
                .map_err(|e| TransportError::Connection {
                    message: "Failed to connect to unix socket".to_string(),
                    remote_addr: Some(path.to_string()),
                    source: Some(e),
                })?;
            info!(path, "Connected to bus over unix socket");
            return Ok(Self::with_peer(stream, config, path.to_string()));
        }

        if let Some(name) = entry.get("abstract").filter(|n| !n.is_empty()) {
            let stream = connect_abstract(name).await?;
            info!(name, "Connected to bus over abstract unix socket");
            return Ok(Self::with_peer(stream, config, format!("@{}", name)));
        }

        Err(TransportError::configuration(
            "unix address needs a non-empty 'path' or 'abstract' parameter",
            Some("path"),
        ))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: UnixStream, config: TransportConfig) -> Self {
        let peer = stream
            .peer_addr()
            .ok()
            .and_then(|addr| addr.as_pathname().map(|p| p.display().to_string()))
            .unwrap_or_else(|| "unnamed".to_string());
        Self::with_peer(stream, config, peer)
    }

    fn with_peer(stream: UnixStream, config: TransportConfig, peer: String) -> Self {
        let cmsg = Vec::with_capacity(cmsg_capacity(fd_limit(&config)));
        Self {
            stream,
            reader: Mutex::new(ReadState {
                queue: VecDeque::new(),
                cmsg,
            }),
            writer: Mutex::new(()),
            fds_enabled: AtomicBool::new(false),
            config,
            peer,
        }
    }

    /// Write all of `bytes`, attaching `fds` to the first chunk
    async fn write_with_fds(&self, bytes: &[u8], fds: &[RawFd]) -> Result<()> {
        let _writer = self.writer.lock().await;
        let fd = self.stream.as_raw_fd();
        let mut sent = 0;
        let mut pending_fds = fds;

        while sent < bytes.len() {
            let n = self
                .stream
                .async_io(Interest::WRITABLE, || send_with_fds(fd, &bytes[sent..], pending_fds))
                .await
                .map_err(|e| TransportError::io("Failed to write to unix socket", e))?;
            if n == 0 {
                return Err(TransportError::io(
                    "Failed to write to unix socket",
                    io::Error::new(io::ErrorKind::WriteZero, "socket accepted no bytes"),
                ));
            }
            sent += n;
            pending_fds = &[];
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for UnixTransport {
    fn kind(&self) -> &'static str {
        "unix"
    }

    async fn send_auth_byte(&self) -> Result<()> {
        self.write_with_fds(&[0], &[]).await
    }

    fn enable_unix_fds(&self) {
        if !self.fds_enabled.swap(true, Ordering::AcqRel) {
            debug!(peer = %self.peer, "Enabled unix fd passing");
        }
    }

    fn supports_unix_fds(&self) -> bool {
        self.fds_enabled.load(Ordering::Acquire)
    }

    async fn send_message(&self, message: &Message) -> Result<()> {
        let fds: Vec<RawFd> = message.fds().iter().map(AsRawFd::as_raw_fd).collect();
        if !fds.is_empty() && !self.supports_unix_fds() {
            return Err(TransportError::configuration(
                format!("cannot send {} unix fds before fd passing is enabled", fds.len()),
                Some("unix_fds"),
            ));
        }

        let bytes = message.encode(OUTBOUND_BYTE_ORDER)?;
        self.write_with_fds(&bytes, &fds).await?;

        debug!(
            peer = %self.peer,
            bytes = bytes.len(),
            fds = fds.len(),
            serial = message.serial(),
            "Sent message over unix socket"
        );
        Ok(())
    }

    async fn read_message(&self) -> Result<Message> {
        let mut state = self.reader.lock().await;
        let mut source = UnixSource {
            stream: &self.stream,
            state: &mut *state,
            accept_fds: self.supports_unix_fds(),
            max_queued: fd_limit(&self.config),
        };
        let frame = read_frame(&mut source, self.config.max_message_size).await?;
        let message = frame.decode()?;

        debug!(
            peer = %self.peer,
            serial = message.serial(),
            message_type = %message.message_type(),
            fds = message.fds().len(),
            "Received message over unix socket"
        );
        Ok(message)
    }

    async fn close(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        socket::shutdown(self.stream.as_raw_fd(), Shutdown::Write)
            .map_err(|e| TransportError::io("Failed to shut down unix socket", e.into()))?;
        info!(peer = %self.peer, "Closed unix transport");
        Ok(())
    }
}

/// Descriptor-aware frame source borrowing the transport's read side
struct UnixSource<'a> {
    stream: &'a UnixStream,
    state: &'a mut ReadState,
    accept_fds: bool,
    max_queued: usize,
}

#[async_trait]
impl<'a> FrameSource for UnixSource<'a> {
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let stream = self.stream;
        let fd = stream.as_raw_fd();
        let accept_fds = self.accept_fds;
        let max_queued = self.max_queued;
        let state = &mut *self.state;
        let mut filled = 0;

        while filled < buf.len() {
            let received = stream
                .async_io(Interest::READABLE, || recv_with_fds(fd, &mut buf[filled..], &mut state.cmsg))
                .await
                .map_err(|e| TransportError::io("Failed to read from unix socket", e))?;

            if received.truncated {
                return Err(TransportError::invalid_message(
                    "unix fds were truncated by the kernel; control buffer too small",
                ));
            }
            if !received.fds.is_empty() {
                if accept_fds {
                    let queued = state.queue.len() + received.fds.len();
                    if queued > max_queued {
                        return Err(TransportError::invalid_message(format!(
                            "peer sent {} unclaimed unix fds, more than the limit of {}",
                            queued, max_queued
                        )));
                    }
                    state.queue.extend(received.fds);
                } else {
                    debug!(
                        count = received.fds.len(),
                        "Closing unix fds received before fd passing was enabled"
                    );
                }
            }
            if received.bytes == 0 {
                return Err(TransportError::io(
                    "Failed to read from unix socket",
                    io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer"),
                ));
            }
            filled += received.bytes;
        }
        Ok(())
    }

    fn take_fds(&mut self, count: usize) -> Result<Vec<OwnedFd>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if !self.accept_fds {
            return Err(TransportError::invalid_message(format!(
                "message declares {} unix fds but fd passing is not enabled",
                count
            )));
        }
        let available = self.state.queue.len();
        if available < count {
            return Err(TransportError::invalid_message(format!(
                "message declares {} unix fds but only {} were received",
                count, available
            )));
        }
        Ok(self.state.queue.drain(..count).collect())
    }
}

struct Received {
    bytes: usize,
    fds: Vec<OwnedFd>,
    truncated: bool,
}

fn recv_with_fds(fd: RawFd, buf: &mut [u8], cmsg: &mut Vec<u8>) -> io::Result<Received> {
    let mut iov = [IoSliceMut::new(buf)];
    let msg = socket::recvmsg::<()>(fd, &mut iov, Some(cmsg), recv_flags())?;

    let mut fds = Vec::new();
    for control in msg.cmsgs()? {
        if let ControlMessageOwned::ScmRights(raw) = control {
            // SAFETY: the kernel just installed these descriptors for this process
            fds.extend(raw.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }));
        }
    }

    Ok(Received {
        bytes: msg.bytes,
        fds,
        truncated: msg.flags.contains(MsgFlags::MSG_CTRUNC),
    })
}

fn send_with_fds(fd: RawFd, bytes: &[u8], fds: &[RawFd]) -> io::Result<usize> {
    let iov = [IoSlice::new(bytes)];
    let rights = [ControlMessage::ScmRights(fds)];
    let cmsgs: &[ControlMessage<'_>] = if fds.is_empty() { &[] } else { &rights };
    Ok(socket::sendmsg::<()>(fd, &iov, cmsgs, send_flags(), None)?)
}

/// Descriptors accepted per receive and held unclaimed, within what the kernel passes
fn fd_limit(config: &TransportConfig) -> usize {
    config.max_fds_per_read.clamp(1, SCM_MAX_FD)
}

fn cmsg_capacity(max_fds: usize) -> usize {
    let payload = max_fds
        .min(SCM_MAX_FD)
        .checked_mul(std::mem::size_of::<RawFd>())
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(u32::MAX);
    // SAFETY: CMSG_SPACE only computes a size
    unsafe { nix::libc::CMSG_SPACE(payload) as usize }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn recv_flags() -> MsgFlags {
    MsgFlags::MSG_CMSG_CLOEXEC
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn recv_flags() -> MsgFlags {
    MsgFlags::empty()
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn send_flags() -> MsgFlags {
    MsgFlags::MSG_NOSIGNAL
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn send_flags() -> MsgFlags {
    MsgFlags::empty()
}

#[cfg(target_os = "linux")]
async fn connect_abstract(name: &str) -> Result<UnixStream> {
    use std::os::linux::net::SocketAddrExt;

    debug!(name, "Connecting to abstract unix bus socket");
    let owned = name.to_string();
    let connected = tokio::task::spawn_blocking(move || {
        let addr = std::os::unix::net::SocketAddr::from_abstract_name(owned.as_bytes())?;
        let stream = std::os::unix::net::UnixStream::connect_addr(&addr)?;
        stream.set_nonblocking(true)?;
        Ok::<_, io::Error>(stream)
    })
    .await
    .map_err(|e| TransportError::connection(format!("Abstract socket connect task failed: {}", e), None))?;

    let std_stream = connected.map_err(|e| TransportError::Connection {
        message: "Failed to connect to abstract unix socket".to_string(),
        remote_addr: Some(format!("@{}", name)),
        source: Some(e),
    })?;
    UnixStream::from_std(std_stream).map_err(|e| TransportError::io("Failed to register unix socket", e))
}

#[cfg(not(target_os = "linux"))]
async fn connect_abstract(_name: &str) -> Result<UnixStream> {
    Err(TransportError::configuration(
        "abstract unix sockets are only supported on linux",
        Some("abstract"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fd_limit_stays_within_kernel_batch() {
        let huge = TransportConfig::default().with_max_fds_per_read(usize::MAX);
        assert_eq!(fd_limit(&huge), SCM_MAX_FD);
        assert_eq!(cmsg_capacity(usize::MAX), cmsg_capacity(SCM_MAX_FD));

        let zero = TransportConfig::default().with_max_fds_per_read(0);
        assert_eq!(fd_limit(&zero), 1);
        assert!(cmsg_capacity(1) >= std::mem::size_of::<RawFd>());
    }
}
