//! # D-Bus Network Layer
//!
//! ## Purpose
//!
//! Gets D-Bus messages on and off the wire:
//! - Bus address parsing and system/session bus resolution
//! - Transport registry mapping address schemes to constructors
//! - TCP and unix socket transports behind one [`Transport`] trait
//! - Message framing: byte order detection, length computation with header
//!   padding, and out-of-band descriptor accounting
//!
//! ## Architecture Role
//!
//! ```text
//! BusAddress → TransportRegistry → Box<dyn Transport> → read_frame → dbus-codec
//!                                        ↑
//!                               send_message (little-endian)
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Authentication (only the priming zero byte is sent here)
//! - Method dispatch, bus names or introspection
//! - Reconnect or retry policy: every failure is returned to the caller
//!
//! ## Example
//!
//! ```no_run
//! use dbus_network::{system_bus_address, BusAddress, TransportConfig, TransportRegistry};
//!
//! # async fn example() -> dbus_network::Result<()> {
//! let registry = TransportRegistry::with_default_transports(TransportConfig::default());
//! let address: BusAddress = system_bus_address().parse()?;
//! let transport = registry.connect(&address).await?;
//! transport.send_auth_byte().await?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod config;
pub mod error;
pub mod framing;
pub mod registry;
pub mod transports;

pub use address::{
    resolve_session_bus_address, resolve_system_bus_address, session_bus_address, system_bus_address,
    AddressEntry, BusAddress, BusPlatform, NativePlatform,
};
pub use config::TransportConfig;
pub use error::{Result, TransportError};
pub use framing::{padded_header_len, read_frame, FrameSource, RawFrame, StreamSource};
pub use registry::{TransportConstructor, TransportRegistry};
pub use transports::{TcpTransport, Transport};

#[cfg(unix)]
pub use transports::UnixTransport;
