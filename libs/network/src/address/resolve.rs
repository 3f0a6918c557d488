//! Well-known bus address resolution
//!
//! The platform variant is chosen at compile time through [`NativePlatform`];
//! every variant shares the same contract.

use super::{escape, BusAddress};
use crate::{Result, TransportError};
use tracing::debug;

/// Environment override for the system bus
pub const SYSTEM_BUS_ADDRESS_ENV: &str = "DBUS_SYSTEM_BUS_ADDRESS";

/// Environment variable naming the session bus
pub const SESSION_BUS_ADDRESS_ENV: &str = "DBUS_SESSION_BUS_ADDRESS";

/// Platform conventions for locating the system bus
pub trait BusPlatform {
    /// Compiled-in system bus address
    const DEFAULT_SYSTEM_BUS_ADDRESS: &'static str;

    /// Turn a non-empty environment override into a full address
    fn system_bus_override(value: &str) -> String;
}

/// Unix: the override is a socket path, escaped into a `unix:path=` entry
pub struct UnixPlatform;

impl BusPlatform for UnixPlatform {
    const DEFAULT_SYSTEM_BUS_ADDRESS: &'static str = "unix:path=/var/run/dbus/system_bus_socket";

    fn system_bus_override(value: &str) -> String {
        format!("unix:path={}", escape(value))
    }
}

/// Windows: the override already is a complete address
pub struct WindowsPlatform;

impl BusPlatform for WindowsPlatform {
    const DEFAULT_SYSTEM_BUS_ADDRESS: &'static str = "tcp:host=127.0.0.1,port=12434";

    fn system_bus_override(value: &str) -> String {
        value.to_string()
    }
}

#[cfg(unix)]
pub type NativePlatform = UnixPlatform;

#[cfg(not(unix))]
pub type NativePlatform = WindowsPlatform;

/// System bus address for this platform; never fails
///
/// On unix a `DBUS_SYSTEM_BUS_ADDRESS` override is a socket path and comes
/// back as `unix:path=<path>` with the path address-escaped, so
/// `/run/my bus,1` yields `unix:path=/run/my%20bus%2c1` rather than the raw
/// text. Plain paths such as `/run/dbus/socket` are unchanged. On Windows the
/// override is returned verbatim.
pub fn system_bus_address() -> String {
    resolve_system_bus_address::<NativePlatform>(|key| std::env::var(key).ok())
}

/// System bus address with an injected environment lookup
pub fn resolve_system_bus_address<P: BusPlatform>(env: impl Fn(&str) -> Option<String>) -> String {
    match env(SYSTEM_BUS_ADDRESS_ENV).filter(|value| !value.is_empty()) {
        Some(value) => {
            debug!(env = SYSTEM_BUS_ADDRESS_ENV, "Using system bus address override");
            P::system_bus_override(&value)
        }
        None => P::DEFAULT_SYSTEM_BUS_ADDRESS.to_string(),
    }
}

/// Session bus address from the environment
pub fn session_bus_address() -> Result<BusAddress> {
    resolve_session_bus_address(|key| std::env::var(key).ok())
}

/// Session bus address with an injected environment lookup
///
/// There is no compiled-in fallback; an unset variable is a configuration
/// error.
pub fn resolve_session_bus_address(env: impl Fn(&str) -> Option<String>) -> Result<BusAddress> {
    let value = env(SESSION_BUS_ADDRESS_ENV)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            TransportError::configuration(
                format!("{} is not set", SESSION_BUS_ADDRESS_ENV),
                Some(SESSION_BUS_ADDRESS_ENV),
            )
        })?;
    value.parse()
}
