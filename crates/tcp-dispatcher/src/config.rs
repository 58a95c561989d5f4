//! Configuration for the dispatcher, its handlers and listeners.
//!
//! Loaded from TOML; every section and field has a default, so an empty
//! file is a valid configuration:
//!
//! ```toml
//! [listen]
//! tcp_port = 5060
//! tls_port = 5061
//!
//! [features]
//! enable_v6 = true
//! experimental_tls = false
//!
//! [dispatcher]
//! sweep_interval_ms = 10000
//! ```

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::TransportFamily;

/// Flag name for IPv6 listeners
pub const FLAG_ENABLE_V6: &str = "enable_v6";
/// Flag name for the experimental TLS listeners
pub const FLAG_EXPERIMENTAL_TLS: &str = "experimental_tls";

/// Read access to listen ports and feature flags
pub trait ConfigProvider {
    /// Port the listeners of `family` bind to
    fn listen_port(&self, family: TransportFamily) -> u16;

    /// Value of a boolean feature flag, `default` when it is unknown
    fn flag(&self, name: &str, default: bool) -> bool;
}

/// Complete configuration of the transport dispatcher
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub listen: ListenConfig,
    pub features: FeatureFlags,
    pub dispatcher: DispatcherConfig,
    pub handler: HandlerConfig,
    pub supervisor: SupervisorConfig,
    pub logging: LogSettings,
}

impl TransportConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: TransportConfig =
            toml::from_str(input).map_err(|e| Error::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen.tcp_port == 0 {
            return Err(Error::Config("listen.tcp_port must be non-zero".to_string()));
        }
        if self.listen.tls_port == 0 {
            return Err(Error::Config("listen.tls_port must be non-zero".to_string()));
        }
        if self.dispatcher.sweep_interval_ms == 0 {
            return Err(Error::Config("dispatcher.sweep_interval_ms must be non-zero".to_string()));
        }
        if self.dispatcher.mailbox_capacity == 0 {
            return Err(Error::Config("dispatcher.mailbox_capacity must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl ConfigProvider for TransportConfig {
    fn listen_port(&self, family: TransportFamily) -> u16 {
        match family {
            TransportFamily::Plain => self.listen.tcp_port,
            TransportFamily::Secure => self.listen.tls_port,
        }
    }

    fn flag(&self, name: &str, default: bool) -> bool {
        match name {
            FLAG_ENABLE_V6 => self.features.enable_v6,
            FLAG_EXPERIMENTAL_TLS => self.features.experimental_tls,
            _ => default,
        }
    }
}

/// Listen ports and wildcard bind addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub tcp_port: u16,
    pub tls_port: u16,
    pub bind_v4: IpAddr,
    pub bind_v6: IpAddr,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            tcp_port: 5060,
            tls_port: 5061,
            bind_v4: IpAddr::from([0, 0, 0, 0]),
            bind_v6: IpAddr::from([0u16; 8]),
        }
    }
}

/// Feature flags gating the optional listeners
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub enable_v6: bool,
    pub experimental_tls: bool,
}

/// Dispatch service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Idle time after which the service sweeps expired records
    pub sweep_interval_ms: u64,
    /// Capacity of the service mailbox
    pub mailbox_capacity: usize,
    /// Upper bound on cached records, 0 for unbounded
    pub max_records: usize,
}

impl DispatcherConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 10_000,
            mailbox_capacity: 100,
            max_records: 0,
        }
    }
}

/// Settings of the bundled TCP connection handler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    pub connect_timeout_ms: u64,
    /// Queued writes per connection before senders wait
    pub write_queue: usize,
    /// Read buffer size per connection
    pub read_buffer: usize,
}

impl HandlerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            write_queue: 64,
            read_buffer: 8192,
        }
    }
}

/// Restart intensity for supervised listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub max_restarts: u32,
    pub restart_window_ms: u64,
}

impl SupervisorConfig {
    pub fn restart_window(&self) -> Duration {
        Duration::from_millis(self.restart_window_ms)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            restart_window_ms: 10_000,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
