//! TCP Transport
//!
//! Connects to `tcp:host=...,port=...[,family=ipv4|ipv6]` addresses. TCP
//! carries no ancillary data, so descriptor passing is never available.

use super::{Transport, OUTBOUND_BYTE_ORDER};
use crate::address::AddressEntry;
use crate::config::TransportConfig;
use crate::framing::{read_frame, StreamSource};
use crate::{Result, TransportError};
use async_trait::async_trait;
use dbus_codec::Message;
use std::net::{IpAddr, SocketAddr};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Address family restriction from the `family` key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    V4,
    V6,
}

impl Family {
    fn from_entry(entry: &AddressEntry) -> Result<Option<Self>> {
        match entry.get("family") {
            None => Ok(None),
            Some("ipv4") => Ok(Some(Family::V4)),
            Some("ipv6") => Ok(Some(Family::V6)),
            Some(other) => Err(TransportError::configuration(
                format!("unknown tcp address family '{}'", other),
                Some("family"),
            )),
        }
    }

    fn matches(self, addr: &SocketAddr) -> bool {
        match self {
            Family::V4 => addr.is_ipv4(),
            Family::V6 => addr.is_ipv6(),
        }
    }
}

/// TCP connection to a bus
pub struct TcpTransport {
    reader: Mutex<StreamSource<OwnedReadHalf>>,
    writer: Mutex<OwnedWriteHalf>,
    peer_addr: SocketAddr,
    config: TransportConfig,
}

impl TcpTransport {
    /// Connect to the host and port named by `entry`
    pub async fn dial(entry: &AddressEntry, config: TransportConfig) -> Result<Self> {
        let host = entry.require("host")?;
        let port = entry.require("port")?;
        let port: u16 = port.parse().map_err(|_| {
            TransportError::configuration(format!("tcp port '{}' is not a valid port number", port), Some("port"))
        })?;
        let family = Family::from_entry(entry)?;

        let candidates: Vec<SocketAddr> = match host.parse::<IpAddr>() {
            Ok(ip) => vec![SocketAddr::new(ip, port)],
            Err(_) => tokio::net::lookup_host((host, port))
                .await
                .map_err(|e| TransportError::Connection {
                    message: format!("Failed to resolve host '{}'", host),
                    remote_addr: Some(format!("{}:{}", host, port)),
                    source: Some(e),
                })?
                .collect(),
        };
        let candidates: Vec<SocketAddr> = candidates
            .into_iter()
            .filter(|addr| family.map_or(true, |f| f.matches(addr)))
            .collect();

        let mut last_error = None;
        for addr in candidates {
            debug!(peer = %addr, "Connecting to TCP bus");
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    info!(peer = %addr, "Connected to bus over TCP");
                    return Self::from_stream(stream, config);
                }
                Err(e) => {
                    debug!(peer = %addr, error = %e, "TCP connect attempt failed");
                    last_error = Some(TransportError::connection_with_source(
                        "Failed to connect to TCP bus",
                        Some(addr),
                        e,
                    ));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TransportError::connection(
                format!("No usable address for host '{}'", host),
                Some(format!("{}:{}", host, port)),
            )
        }))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream, config: TransportConfig) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map_err(|e| TransportError::io("Failed to get peer address", e))?;

        if let Err(e) = stream.set_nodelay(config.tcp_nodelay) {
            warn!(peer = %peer_addr, "Failed to set TCP_NODELAY: {}", e);
        }

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(StreamSource::new(read_half)),
            writer: Mutex::new(write_half),
            peer_addr,
            config,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    async fn write_all(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(bytes)
            .await
            .map_err(|e| TransportError::io("Failed to write to TCP stream", e))?;
        writer
            .flush()
            .await
            .map_err(|e| TransportError::io("Failed to flush TCP stream", e))?;
        Ok(())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> &'static str {
        "tcp"
    }

    async fn send_auth_byte(&self) -> Result<()> {
        self.write_all(&[0]).await
    }

    fn enable_unix_fds(&self) {
        debug!(peer = %self.peer_addr, "TCP transport cannot pass unix fds; ignoring");
    }

    fn supports_unix_fds(&self) -> bool {
        false
    }

    async fn send_message(&self, message: &Message) -> Result<()> {
        if !message.fds().is_empty() {
            return Err(TransportError::configuration(
                format!("TCP transport cannot send {} unix fds", message.fds().len()),
                Some("unix_fds"),
            ));
        }

        let bytes = message.encode(OUTBOUND_BYTE_ORDER)?;
        self.write_all(&bytes).await?;

        debug!(
            peer = %self.peer_addr,
            bytes = bytes.len(),
            serial = message.serial(),
            "Sent message over TCP"
        );
        Ok(())
    }

    async fn read_message(&self) -> Result<Message> {
        let mut reader = self.reader.lock().await;
        let frame = read_frame(&mut *reader, self.config.max_message_size).await?;
        let message = frame.decode()?;

        debug!(
            peer = %self.peer_addr,
            serial = message.serial(),
            message_type = %message.message_type(),
            "Received message over TCP"
        );
        Ok(message)
    }

    async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .shutdown()
            .await
            .map_err(|e| TransportError::io("Failed to shut down TCP stream", e))?;
        info!(peer = %self.peer_addr, "Closed TCP transport");
        Ok(())
    }
}
