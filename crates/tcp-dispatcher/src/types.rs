//! Core transport identifiers shared by every dispatcher component.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Stream transport protocol of a connection
///
/// `Tcp`/`Tcp6` are plain transports, `Tls`/`Tls6` the secure ones; the
/// suffix selects the IP family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain TCP over IPv4
    Tcp,
    /// Plain TCP over IPv6
    Tcp6,
    /// TLS over IPv4
    Tls,
    /// TLS over IPv6
    Tls6,
}

impl Protocol {
    /// All protocols in listener start order
    pub const ALL: [Protocol; 4] = [Protocol::Tcp, Protocol::Tcp6, Protocol::Tls, Protocol::Tls6];

    /// Plain or secure family of this protocol
    pub fn family(self) -> TransportFamily {
        match self {
            Protocol::Tcp | Protocol::Tcp6 => TransportFamily::Plain,
            Protocol::Tls | Protocol::Tls6 => TransportFamily::Secure,
        }
    }

    pub fn is_ipv6(self) -> bool {
        matches!(self, Protocol::Tcp6 | Protocol::Tls6)
    }

    pub fn is_secure(self) -> bool {
        self.family() == TransportFamily::Secure
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Tcp6 => "tcp6",
            Protocol::Tls => "tls",
            Protocol::Tls6 => "tls6",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "tcp6" => Ok(Protocol::Tcp6),
            "tls" => Ok(Protocol::Tls),
            "tls6" => Ok(Protocol::Tls6),
            other => Err(Error::InvalidRequest(format!("unknown protocol '{}'", other))),
        }
    }
}

/// Plain vs. secure transport, the unit listen ports are configured per
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportFamily {
    Plain,
    Secure,
}

/// Who initiated a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A socket accepting inbound connections
    Listener,
    /// A connection accepted from a remote peer
    Inbound,
    /// A connection we established to a remote peer
    Outbound,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Listener => f.write_str("listener"),
            Role::Inbound => f.write_str("inbound"),
            Role::Outbound => f.write_str("outbound"),
        }
    }
}

/// Remote side of a connection: host name or address literal plus port
///
/// The host is normalized on construction. Address literals are stored in
/// their canonical form without brackets, names are lower-cased, so a
/// lookup for `"10.0.0.5"` matches a record registered from
/// `10.0.0.5:5060` and `"[::1]"` matches `::1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl AsRef<str>, port: u16) -> Self {
        Self {
            host: normalize_host(host.as_ref()),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The host as an IP address, if it is a literal
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip() {
            Some(IpAddr::V6(_)) => write!(f, "[{}]:{}", self.host, self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

fn normalize_host(host: &str) -> String {
    let trimmed = host.trim();
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(trimmed);

    match unbracketed.parse::<IpAddr>() {
        Ok(ip) => ip.to_string(),
        Err(_) => unbracketed.to_ascii_lowercase(),
    }
}
