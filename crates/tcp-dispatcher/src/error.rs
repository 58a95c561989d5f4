//! Error types for the TCP/TLS dispatcher.
//!
//! Errors fall into three groups:
//!
//! - **Cache faults** (`CacheLookup`, `CacheInsert`): reported to the immediate
//!   caller of the dispatcher, never retried by it.
//! - **Request faults** (`OwnerTerminated`, `InvalidRegistration`,
//!   `InvalidRequest`, `UnrecognizedRequest`): the request is rejected, the
//!   dispatcher keeps running.
//! - **Transport faults** (`ConnectFailed`, `UnsupportedProtocol`,
//!   `SocketClosed`, `Io`): produced by the bundled connection handler and
//!   listener, delivered through deferred replies or supervisor logs.

use thiserror::Error;

use crate::owner::OwnerId;
use crate::types::{Endpoint, Protocol};

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the dispatcher and its bundled collaborators
#[derive(Debug, Error)]
pub enum Error {
    /// The connection cache failed while looking up a record
    #[error("Connection cache lookup failed: {0}")]
    CacheLookup(String),

    /// The connection cache refused to store a record
    #[error("Connection cache insert failed: {0}")]
    CacheInsert(String),

    /// The owner of a registration terminated before it could be monitored
    #[error("Owner {0} has already terminated")]
    OwnerTerminated(OwnerId),

    /// A registration is missing fields its role requires
    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    /// A request carried arguments outside of their allowed range
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The dispatcher received a request kind it does not know
    #[error("Unrecognized request: {0}")]
    UnrecognizedRequest(String),

    /// Establishing an outbound connection failed
    #[error("Failed to connect to {remote} over {protocol}: {reason}")]
    ConnectFailed {
        protocol: Protocol,
        remote: Endpoint,
        reason: String,
    },

    /// The component cannot serve this protocol
    #[error("Protocol {0} is not supported here")]
    UnsupportedProtocol(Protocol),

    /// The connection behind a socket handle has gone away
    #[error("Socket closed")]
    SocketClosed,

    /// The dispatcher mailbox is closed
    #[error("Dispatcher is not running")]
    DispatcherUnavailable,

    /// A deferred reply was dropped before anyone resolved it
    #[error("Pending reply dropped before resolution")]
    ReplyDropped,

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for faults raised by the cache collaborator
    pub fn is_cache_fault(&self) -> bool {
        matches!(self, Error::CacheLookup(_) | Error::CacheInsert(_))
    }
}
