//! Transport Registry
//!
//! Maps transport names from bus addresses (`"tcp"`, `"unix"`) to
//! constructors. The connection layer owns one registry, fills it during
//! startup and only reads it afterwards.

use crate::address::{AddressEntry, BusAddress};
use crate::config::TransportConfig;
use crate::transports::Transport;
use crate::{Result, TransportError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Constructor that dials one address entry
pub type TransportConstructor =
    Arc<dyn Fn(AddressEntry, TransportConfig) -> BoxFuture<'static, Result<Box<dyn Transport>>> + Send + Sync>;

/// Registry of transport constructors keyed by name
pub struct TransportRegistry {
    constructors: HashMap<String, TransportConstructor>,
    config: TransportConfig,
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.names();
        names.sort_unstable();
        f.debug_struct("TransportRegistry")
            .field("transports", &names)
            .field("config", &self.config)
            .finish()
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl TransportRegistry {
    /// Empty registry; every constructed transport receives `config`
    pub fn new(config: TransportConfig) -> Self {
        Self {
            constructors: HashMap::new(),
            config,
        }
    }

    /// Registry with the built-in transports: `tcp`, plus `unix` on unix
    pub fn with_default_transports(config: TransportConfig) -> Self {
        let mut registry = Self::new(config);
        registry.constructors.insert("tcp".to_string(), tcp_constructor());
        #[cfg(unix)]
        registry.constructors.insert("unix".to_string(), unix_constructor());
        registry
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Register a constructor under `name`
    ///
    /// Names are unique: registering one twice fails with
    /// [`TransportError::DuplicateTransport`] and leaves the first constructor
    /// in place.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> Result<()>
    where
        F: Fn(AddressEntry, TransportConfig) -> BoxFuture<'static, Result<Box<dyn Transport>>>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(TransportError::configuration("transport name is empty", Some("name")));
        }
        if self.constructors.contains_key(&name) {
            return Err(TransportError::DuplicateTransport { name });
        }
        debug!(transport = %name, "Registered transport");
        self.constructors.insert(name, Arc::new(constructor));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<TransportConstructor> {
        self.constructors.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered transport names, unordered
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Dial `entry` with the constructor registered for its transport
    pub async fn construct(&self, entry: &AddressEntry) -> Result<Box<dyn Transport>> {
        let constructor = self
            .lookup(entry.transport())
            .ok_or_else(|| TransportError::unsupported_transport(entry.transport()))?;
        constructor(entry.clone(), self.config.clone()).await
    }

    /// Dial the entries of `address` in order; the first success wins
    ///
    /// When every entry fails, the error from the last one is returned.
    pub async fn connect(&self, address: &BusAddress) -> Result<Box<dyn Transport>> {
        let mut last_error = None;
        for entry in address.entries() {
            match self.construct(entry).await {
                Ok(transport) => {
                    info!(address = %entry, "Connected to bus");
                    return Ok(transport);
                }
                Err(e) => {
                    warn!(address = %entry, category = e.category(), "Bus address entry failed: {}", e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| TransportError::configuration("bus address has no entries", Some("address"))))
    }
}

fn tcp_constructor() -> TransportConstructor {
    use crate::transports::TcpTransport;

    Arc::new(|entry: AddressEntry, config: TransportConfig| {
        async move {
            let transport = TcpTransport::dial(&entry, config).await?;
            Ok::<_, TransportError>(Box::new(transport) as Box<dyn Transport>)
        }
        .boxed()
    })
}

#[cfg(unix)]
fn unix_constructor() -> TransportConstructor {
    use crate::transports::UnixTransport;

    Arc::new(|entry: AddressEntry, config: TransportConfig| {
        async move {
            let transport = UnixTransport::dial(&entry, config).await?;
            Ok::<_, TransportError>(Box::new(transport) as Box<dyn Transport>)
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing_constructor(entry: AddressEntry, _config: TransportConfig) -> BoxFuture<'static, Result<Box<dyn Transport>>> {
        async move {
            Err::<Box<dyn Transport>, _>(TransportError::connection(
                format!("{} is offline", entry.transport()),
                None,
            ))
        }
        .boxed()
    }

    #[test]
    fn test_default_transports_registered() {
        let registry = TransportRegistry::with_default_transports(TransportConfig::default());
        assert!(registry.contains("tcp"));
        #[cfg(unix)]
        assert!(registry.contains("unix"));
        assert!(registry.lookup("autolaunch").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = TransportRegistry::default();
        registry.register("mock", failing_constructor).unwrap();
        let err = registry.register("mock", failing_constructor).unwrap_err();
        assert!(matches!(err, TransportError::DuplicateTransport { ref name } if name == "mock"));
        assert_eq!(err.category(), "duplicate_transport");
        assert_eq!(registry.names(), vec!["mock"]);

        let mut defaults = TransportRegistry::with_default_transports(TransportConfig::default());
        assert!(matches!(
            defaults.register("tcp", failing_constructor),
            Err(TransportError::DuplicateTransport { .. })
        ));
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut registry = TransportRegistry::default();
        assert!(registry.register("", failing_constructor).is_err());
    }

    #[tokio::test]
    async fn test_unknown_transport_is_unsupported() {
        let registry = TransportRegistry::default();
        let entry: AddressEntry = "launchd:env=DBUS_LAUNCHD_SESSION_BUS_SOCKET".parse().unwrap();
        match registry.construct(&entry).await {
            Err(TransportError::UnsupportedTransport { name }) => assert_eq!(name, "launchd"),
            Err(other) => panic!("Expected UnsupportedTransport, got {:?}", other),
            Ok(_) => panic!("Expected UnsupportedTransport"),
        }
    }

    #[tokio::test]
    async fn test_constructor_error_propagates() {
        let mut registry = TransportRegistry::default();
        registry.register("mock", failing_constructor).unwrap();
        let entry = AddressEntry::new("mock");
        let err = registry.construct(&entry).await.err().unwrap();
        assert_eq!(err.category(), "connection");
    }

    #[tokio::test]
    async fn test_connect_returns_last_error() {
        let mut registry = TransportRegistry::default();
        registry.register("mock", failing_constructor).unwrap();
        let address: BusAddress = "mock:;other:".parse().unwrap();
        let err = registry.connect(&address).await.err().unwrap();
        assert!(matches!(err, TransportError::UnsupportedTransport { ref name } if name == "other"));
    }
}
