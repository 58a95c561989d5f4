//! Connection records and the keys they are cached under.

use std::fmt;
use std::net::SocketAddr;

use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::owner::{OwnerHandle, OwnerId};
use crate::socket::SocketHandle;
use crate::types::{Endpoint, Protocol, Role};

/// Cache-assigned identity of a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec-{}", self.0)
    }
}

/// When a record stops being valid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    At(Instant),
}

impl Expiry {
    pub fn is_expired(&self, now: Instant) -> bool {
        match self {
            Expiry::Never => false,
            Expiry::At(deadline) => *deadline <= now,
        }
    }
}

/// Identity a record is cached under
///
/// Keys do not have to be unique: two outbound connections to the same
/// peer share a key and both stay in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Listener { protocol: Protocol, local_port: u16 },
    Inbound { protocol: Protocol, remote: Endpoint },
    Outbound { protocol: Protocol, remote: Endpoint },
}

impl CacheKey {
    /// Derive the key for a registration made under `role`
    pub fn derive(role: Role, registration: &Registration) -> Result<Self> {
        let protocol = registration.protocol;
        match role {
            Role::Listener => {
                let local_port = registration.local.port();
                if local_port == 0 {
                    return Err(Error::InvalidRegistration(
                        "listener registration without a bound local port".to_string(),
                    ));
                }
                Ok(CacheKey::Listener { protocol, local_port })
            }
            Role::Inbound | Role::Outbound => {
                let remote = registration.remote.clone().ok_or_else(|| {
                    Error::InvalidRegistration(format!("{} registration without remote endpoint", role))
                })?;
                if registration.socket.is_none() {
                    return Err(Error::InvalidRegistration(format!(
                        "{} registration without socket handle",
                        role
                    )));
                }
                if role == Role::Inbound {
                    Ok(CacheKey::Inbound { protocol, remote })
                } else {
                    Ok(CacheKey::Outbound { protocol, remote })
                }
            }
        }
    }

    pub fn role(&self) -> Role {
        match self {
            CacheKey::Listener { .. } => Role::Listener,
            CacheKey::Inbound { .. } => Role::Inbound,
            CacheKey::Outbound { .. } => Role::Outbound,
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            CacheKey::Listener { protocol, .. }
            | CacheKey::Inbound { protocol, .. }
            | CacheKey::Outbound { protocol, .. } => *protocol,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Listener { protocol, local_port } => write!(f, "listener/{}/{}", protocol, local_port),
            CacheKey::Inbound { protocol, remote } => write!(f, "inbound/{}/{}", protocol, remote),
            CacheKey::Outbound { protocol, remote } => write!(f, "outbound/{}/{}", protocol, remote),
        }
    }
}

/// What a connection-owning task submits to the dispatcher
#[derive(Debug, Clone)]
pub struct Registration {
    pub owner: OwnerHandle,
    pub protocol: Protocol,
    pub local: SocketAddr,
    pub remote: Option<Endpoint>,
    pub socket: Option<SocketHandle>,
    pub expiry: Expiry,
}

impl Registration {
    /// Registration for a listening socket
    pub fn listener(owner: OwnerHandle, protocol: Protocol, local: SocketAddr) -> Self {
        Self {
            owner,
            protocol,
            local,
            remote: None,
            socket: None,
            expiry: Expiry::Never,
        }
    }

    /// Registration for an established inbound or outbound connection
    pub fn connection(owner: OwnerHandle, socket: SocketHandle) -> Self {
        Self {
            owner,
            protocol: socket.protocol(),
            local: socket.local_addr(),
            remote: Some(socket.remote().clone()),
            socket: Some(socket),
            expiry: Expiry::Never,
        }
    }

    pub fn with_expiry(mut self, deadline: Instant) -> Self {
        self.expiry = Expiry::At(deadline);
        self
    }
}

/// One live transport connection as stored in the cache
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub id: RecordId,
    pub key: CacheKey,
    pub owner: OwnerId,
    pub protocol: Protocol,
    pub local: SocketAddr,
    pub remote: Option<Endpoint>,
    pub socket: Option<SocketHandle>,
    pub expiry: Expiry,
}

impl ConnectionRecord {
    pub fn role(&self) -> Role {
        self.key.role()
    }
}

impl fmt::Display for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} local={} owner={}", self.id, self.key, self.local, self.owner)?;
        if let Expiry::At(deadline) = self.expiry {
            write!(f, " expires_in={:?}", deadline.saturating_duration_since(Instant::now()))?;
        }
        Ok(())
    }
}
