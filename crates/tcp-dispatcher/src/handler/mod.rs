//! Connection handlers: the tasks that own sockets.
//!
//! The dispatcher never touches a socket. On a cache miss it calls
//! [`ConnectionHandler::start_connect`], which must spawn a task and return
//! at once. The spawned task connects, registers the connection with the
//! dispatcher and resolves the caller's [`ReplyToken`].

mod tcp;

pub use tcp::TcpConnectionHandler;

use crate::dispatcher::{DispatcherHandle, ReplyToken};
use crate::types::{Endpoint, Protocol};

/// A connect attempt requested by the dispatcher
#[derive(Debug)]
pub struct ConnectRequest {
    pub protocol: Protocol,
    pub remote: Endpoint,
    pub reply: ReplyToken,
}

/// Spawn contract for outbound connection handlers
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Start connecting to `request.remote` in a new task
    ///
    /// Must not block. The spawned task is expected to register the
    /// connection through `dispatcher` on success and to resolve
    /// `request.reply` with either the socket handle or the error.
    fn start_connect(&self, request: ConnectRequest, dispatcher: DispatcherHandle);
}
