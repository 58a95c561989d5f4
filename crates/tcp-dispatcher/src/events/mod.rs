//! Transport events emitted by the bundled connection tasks
//!
//! Payload bytes are forwarded as received; framing and SIP parsing belong
//! to the layers above.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::owner::ExitReason;
use crate::types::{Endpoint, Protocol};

/// Default capacity for transport event channels
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Something happened on a connection owned by this crate
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Bytes arrived on a connection
    DataReceived {
        protocol: Protocol,
        local: SocketAddr,
        source: Endpoint,
        data: Bytes,
    },
    /// A connection closed and its owner exited
    ConnectionClosed {
        protocol: Protocol,
        remote: Endpoint,
        reason: ExitReason,
    },
    /// A connection-level error that did not fit anywhere else
    Error { error: String },
}

/// Sender half handed to connection tasks
pub type TransportEventSender = mpsc::Sender<TransportEvent>;

/// Create a bounded transport event channel
pub fn channel(capacity: Option<usize>) -> (TransportEventSender, mpsc::Receiver<TransportEvent>) {
    mpsc::channel(capacity.unwrap_or(DEFAULT_EVENT_CAPACITY))
}
