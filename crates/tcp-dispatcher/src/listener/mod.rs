//! Listener specifications, the listener spawn contract and its supervisor.
//!
//! At startup the enabled protocols and ports are turned into an ordered
//! list of [`ListenerSpec`]s. The [`ListenerSupervisor`] runs one child per
//! spec through a [`ListenerFactory`] and restarts it according to the
//! spec's [`RestartPolicy`].
//!
//! ```text
//!   ConfigProvider ──▶ ListenerRequest ──▶ listener_specs() ──▶ [ListenerSpec]
//!                                                                   │
//!                                          ListenerSupervisor ◀─────┘
//!                                                │ run(protocol, port)
//!                                                ▼
//!                                          ListenerFactory
//! ```

mod supervisor;
mod tcp;

pub use supervisor::ListenerSupervisor;
pub use tcp::TcpListenerFactory;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ConfigProvider, FLAG_ENABLE_V6, FLAG_EXPERIMENTAL_TLS};
use crate::error::Result;
use crate::types::{Protocol, TransportFamily};

/// When a supervised child is restarted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartType {
    /// Always, whatever the exit
    Permanent,
    /// Only after a failure
    Transient,
    /// Never
    Temporary,
}

/// How a supervised child is stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Abort immediately
    BrutalKill,
    /// Let it finish for up to this long, then abort
    Timeout(Duration),
}

/// Restart and shutdown behavior of a supervised child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub restart: RestartType,
    pub delay: Duration,
    pub shutdown: ShutdownPolicy,
}

impl RestartPolicy {
    /// Listeners keep no client state: restart at once, kill on shutdown
    pub const LISTENER: RestartPolicy = RestartPolicy {
        restart: RestartType::Permanent,
        delay: Duration::ZERO,
        shutdown: ShutdownPolicy::BrutalKill,
    };
}

/// Supervision description of one listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSpec {
    pub name: String,
    pub protocol: Protocol,
    pub port: u16,
    pub policy: RestartPolicy,
}

impl ListenerSpec {
    pub fn new(protocol: Protocol, port: u16) -> Self {
        Self {
            name: format!("{}_listener_{}", protocol, port),
            protocol,
            port,
            policy: RestartPolicy::LISTENER,
        }
    }
}

impl fmt::Display for ListenerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.protocol, self.port)
    }
}

/// Ports to expose and the flags gating the optional protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerRequest {
    pub plain_port: u16,
    pub secure_port: u16,
    pub enable_v6: bool,
    pub enable_tls: bool,
}

impl ListenerRequest {
    pub fn from_config(config: &impl ConfigProvider) -> Self {
        Self {
            plain_port: config.listen_port(TransportFamily::Plain),
            secure_port: config.listen_port(TransportFamily::Secure),
            enable_v6: config.flag(FLAG_ENABLE_V6, false),
            enable_tls: config.flag(FLAG_EXPERIMENTAL_TLS, false),
        }
    }

    fn eligible(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Tcp => true,
            Protocol::Tcp6 => self.enable_v6,
            Protocol::Tls => self.enable_tls,
            Protocol::Tls6 => self.enable_v6 && self.enable_tls,
        }
    }

    fn port_for(&self, protocol: Protocol) -> u16 {
        match protocol.family() {
            TransportFamily::Plain => self.plain_port,
            TransportFamily::Secure => self.secure_port,
        }
    }
}

/// One spec per eligible protocol, in `tcp, tcp6, tls, tls6` order
pub fn listener_specs(request: &ListenerRequest) -> Vec<ListenerSpec> {
    Protocol::ALL
        .iter()
        .copied()
        .filter(|protocol| request.eligible(*protocol))
        .map(|protocol| ListenerSpec::new(protocol, request.port_for(protocol)))
        .collect()
}

/// Spawn contract for listeners
///
/// `run` binds, registers the listening socket with the dispatcher and
/// accepts until it fails. Returning, with or without an error, counts as
/// the child exiting.
#[async_trait]
pub trait ListenerFactory: Send + Sync + 'static {
    async fn run(&self, protocol: Protocol, port: u16) -> Result<()>;
}
