//! Transport Configuration
//!
//! Settings shared by every transport a registry constructs.

use crate::Result;
use dbus_codec::MAX_MESSAGE_SIZE;
use serde::{Deserialize, Serialize};

/// Largest descriptor batch the kernel passes in one `SCM_RIGHTS` message
pub const SCM_MAX_FD: usize = 253;

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Frames longer than this are rejected before the body is read
    pub max_message_size: usize,
    /// Set TCP_NODELAY on TCP connections
    pub tcp_nodelay: bool,
    /// Control-message space reserved per receive, in descriptors
    pub max_fds_per_read: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            tcp_nodelay: true,
            max_fds_per_read: SCM_MAX_FD,
        }
    }
}

impl TransportConfig {
    /// Create a new transport configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a YAML document; absent keys keep their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: TransportConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Set maximum message size
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    pub fn with_max_fds_per_read(mut self, count: usize) -> Self {
        self.max_fds_per_read = count;
        self
    }

    /// Reject values the protocol cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.max_message_size < dbus_codec::PREAMBLE_LEN {
            return Err(crate::TransportError::configuration(
                format!(
                    "max_message_size {} is smaller than the {}-byte preamble",
                    self.max_message_size,
                    dbus_codec::PREAMBLE_LEN
                ),
                Some("max_message_size"),
            ));
        }
        if self.max_message_size > MAX_MESSAGE_SIZE {
            return Err(crate::TransportError::configuration(
                format!(
                    "max_message_size {} exceeds the protocol maximum {}",
                    self.max_message_size, MAX_MESSAGE_SIZE
                ),
                Some("max_message_size"),
            ));
        }
        if self.max_fds_per_read == 0 || self.max_fds_per_read > SCM_MAX_FD {
            return Err(crate::TransportError::configuration(
                format!("max_fds_per_read must be within 1..={}", SCM_MAX_FD),
                Some("max_fds_per_read"),
            ));
        }
        Ok(())
    }
}
