//! Bus Addresses
//!
//! A bus address lists one or more ways to reach a bus, tried in order:
//!
//! ```text
//! unix:path=/run/dbus/system_bus_socket;tcp:host=127.0.0.1,port=12434
//! ```
//!
//! Values are escaped per the D-Bus rules: bytes outside
//! `[-0-9A-Za-z_/.\*]` are written as `%XX`.

use crate::{Result, TransportError};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub mod resolve;

pub use resolve::{
    resolve_session_bus_address, resolve_system_bus_address, session_bus_address, system_bus_address,
    BusPlatform, NativePlatform, UnixPlatform, WindowsPlatform, SESSION_BUS_ADDRESS_ENV,
    SYSTEM_BUS_ADDRESS_ENV,
};

/// One `transport:key=value,...` alternative
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressEntry {
    transport: String,
    params: BTreeMap<String, String>,
}

impl AddressEntry {
    pub fn new(transport: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a parameter; a repeated key replaces the earlier value
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Transport name, e.g. `"tcp"`
    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Value of a required parameter; absent or empty is a configuration error
    pub fn require(&self, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(value) if !value.is_empty() => Ok(value),
            Some(_) => Err(TransportError::configuration(
                format!("{} address parameter '{}' is empty", self.transport, key),
                Some(key),
            )),
            None => Err(TransportError::configuration(
                format!("{} address is missing parameter '{}'", self.transport, key),
                Some(key),
            )),
        }
    }
}

impl FromStr for AddressEntry {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        let (transport, rest) = s.split_once(':').ok_or_else(|| {
            TransportError::configuration(format!("address entry '{}' has no transport prefix", s), Some("address"))
        })?;
        if transport.is_empty() {
            return Err(TransportError::configuration(
                format!("address entry '{}' has an empty transport name", s),
                Some("address"),
            ));
        }

        let mut entry = AddressEntry::new(transport);
        for pair in rest.split(',').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                TransportError::configuration(format!("address parameter '{}' has no value", pair), Some("address"))
            })?;
            if key.is_empty() {
                return Err(TransportError::configuration(
                    format!("address parameter '{}' has an empty key", pair),
                    Some("address"),
                ));
            }
            entry.params.insert(unescape(key)?, unescape(value)?);
        }
        Ok(entry)
    }
}

impl fmt::Display for AddressEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.transport)?;
        for (i, (key, value)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", escape(key), escape(value))?;
        }
        Ok(())
    }
}

/// Ordered list of address alternatives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusAddress {
    entries: Vec<AddressEntry>,
}

impl BusAddress {
    pub fn new(entries: Vec<AddressEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(TransportError::configuration("bus address has no entries", Some("address")));
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[AddressEntry] {
        &self.entries
    }
}

impl FromStr for BusAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        let entries = s
            .split(';')
            .filter(|entry| !entry.is_empty())
            .map(AddressEntry::from_str)
            .collect::<Result<Vec<_>>>()?;
        BusAddress::new(entries)
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}", entry)?;
        }
        Ok(())
    }
}

fn is_optionally_escaped(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'/' | b'.' | b'\\' | b'*')
}

/// Escape an address value
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for &b in value.as_bytes() {
        if is_optionally_escaped(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02x}", b));
        }
    }
    out
}

/// Reverse [`escape`]; `%` must be followed by two hex digits
pub fn unescape(value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| {
                        TransportError::configuration(
                            format!("invalid escape sequence in address value '{}'", value),
                            Some("address"),
                        )
                    })?;
                out.push(hex);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| {
        TransportError::configuration(format!("address value '{}' is not valid UTF-8", value), Some("address"))
    })
}
