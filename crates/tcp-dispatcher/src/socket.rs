//! Socket handles handed to dispatcher callers.

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::types::{Endpoint, Protocol};

/// Commands a socket handle can queue for its owning task
#[derive(Debug)]
pub enum SocketCommand {
    /// Write these bytes to the stream
    Send(Bytes),
    /// Close the stream
    Close,
}

/// Transport-layer reference to a live connection
///
/// The handle does not own the stream. Writes are queued to the task that
/// does, so a handle stays cheap to clone and safe to keep in the cache.
#[derive(Clone)]
pub struct SocketHandle {
    protocol: Protocol,
    local: SocketAddr,
    remote: Endpoint,
    commands: mpsc::Sender<SocketCommand>,
}

impl SocketHandle {
    /// Create a handle and the receiving end its owner drains
    pub fn channel(
        protocol: Protocol,
        local: SocketAddr,
        remote: Endpoint,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<SocketCommand>) {
        let (commands, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                protocol,
                local,
                remote,
                commands,
            },
            rx,
        )
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn remote(&self) -> &Endpoint {
        &self.remote
    }

    /// Queue bytes for transmission on the connection
    pub async fn send(&self, data: Bytes) -> Result<()> {
        self.commands
            .send(SocketCommand::Send(data))
            .await
            .map_err(|_| Error::SocketClosed)
    }

    /// Ask the owning task to close the connection
    pub async fn close(&self) -> Result<()> {
        self.commands
            .send(SocketCommand::Close)
            .await
            .map_err(|_| Error::SocketClosed)
    }

    /// True once the owning task stopped draining commands
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// True if both handles talk to the same owning task
    pub fn same_connection(&self, other: &SocketHandle) -> bool {
        self.commands.same_channel(&other.commands)
    }
}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SocketHandle({} {} -> {})", self.protocol, self.local, self.remote)
    }
}
