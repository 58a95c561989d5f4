//! The dispatch service and its request protocol.
//!
//! # Architecture
//!
//! ```text
//!   callers ──GetConnection──┐
//!   handlers ─Register───────┤        ┌────────────────────┐
//!   monitors ─OwnerDown──────┼──mpsc─▶│  DispatchService   │── owns ──▶ ConnectionCache
//!   admin ───List/Shutdown───┘        │  (one task, FIFO)  │
//!                                     └─────────┬──────────┘
//!                              cache miss:      │ start_connect(ReplyToken)
//!                                               ▼
//!                                      ConnectionHandler task ──resolve──▶ caller
//! ```
//!
//! The service is a single task draining an ordered mailbox. It is the only
//! writer of the cache and never awaits anything but that mailbox: a cache
//! miss hands the caller's reply channel to a freshly spawned connection
//! handler and moves on to the next request.
//!
//! Concurrent misses for the same destination each spawn their own handler
//! and may both end up registered. Callers must accept being served by
//! either connection.

mod monitor;
mod service;

pub use service::DispatchService;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::cache::ConnectionCache;
use crate::config::DispatcherConfig;
use crate::error::{Error, Result};
use crate::handler::ConnectionHandler;
use crate::owner::{ExitReason, OwnerId};
use crate::record::{ConnectionRecord, Registration};
use crate::socket::SocketHandle;
use crate::types::{Protocol, Role};

/// Messages understood by the dispatch service
#[derive(Debug)]
pub enum Request {
    /// Reuse a cached connection or start a new one
    GetConnection {
        protocol: Protocol,
        host: String,
        port: u16,
        reply: oneshot::Sender<Result<SocketHandle>>,
    },
    /// Record a ready socket and start watching its owner
    RegisterConnection {
        role: Role,
        registration: Registration,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Snapshot of the whole cache
    ListConnections {
        reply: oneshot::Sender<Vec<ConnectionRecord>>,
    },
    /// Stop the service once the requests queued before this one are done
    Shutdown {
        reply: Option<oneshot::Sender<()>>,
    },
    /// An owner the service subscribed to has terminated
    OwnerDown { owner: OwnerId, reason: ExitReason },
    /// Anything this version of the service does not understand
    Unrecognized {
        description: String,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
}

impl Request {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Request::GetConnection { .. } => "get_connection",
            Request::RegisterConnection { .. } => "register_connection",
            Request::ListConnections { .. } => "list_connections",
            Request::Shutdown { .. } => "shutdown",
            Request::OwnerDown { .. } => "owner_down",
            Request::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// Deferred reply to a `GetConnection` caller
///
/// Handed to the connection handler spawned on a cache miss. Whoever holds
/// it answers the original caller, exactly once. Dropping it unresolved
/// surfaces as [`Error::ReplyDropped`] on the caller's side.
#[derive(Debug)]
pub struct ReplyToken {
    tx: oneshot::Sender<Result<SocketHandle>>,
}

impl ReplyToken {
    pub(crate) fn new(tx: oneshot::Sender<Result<SocketHandle>>) -> Self {
        Self { tx }
    }

    /// Answer the pending caller. Returns false if it stopped waiting.
    pub fn resolve(self, result: Result<SocketHandle>) -> bool {
        self.tx.send(result).is_ok()
    }

    /// True if the caller is no longer waiting for an answer
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Cloneable reference to a running dispatch service
///
/// Created once by [`TcpDispatcher::start`] and passed to every component
/// that needs the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Request>,
}

impl DispatcherHandle {
    pub(crate) fn new(tx: mpsc::Sender<Request>) -> Self {
        Self { tx }
    }

    /// Deliver a raw request to the service
    pub async fn send(&self, request: Request) -> Result<()> {
        self.tx.send(request).await.map_err(|_| Error::DispatcherUnavailable)
    }

    /// Get a connection to `host:port`, reusing a cached one when possible
    ///
    /// On a miss the answer arrives once the spawned handler finished
    /// connecting. The dispatcher applies no timeout; wrap the call in
    /// `tokio::time::timeout` when an upper bound is needed.
    pub async fn get_connection(&self, protocol: Protocol, host: impl Into<String>, port: u16) -> Result<SocketHandle> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::GetConnection {
            protocol,
            host: host.into(),
            port,
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::ReplyDropped)?
    }

    /// Register a ready socket under `role`
    pub async fn register_connection(&self, role: Role, registration: Registration) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::RegisterConnection {
            role,
            registration,
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::DispatcherUnavailable)?
    }

    /// Snapshot of every cached record
    pub async fn list_connections(&self) -> Result<Vec<ConnectionRecord>> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::ListConnections { reply }).await?;
        rx.await.map_err(|_| Error::DispatcherUnavailable)
    }

    /// Stop the service and wait until it acknowledged
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Shutdown { reply: Some(reply) }).await?;
        rx.await.map_err(|_| Error::DispatcherUnavailable)
    }

    /// True once the service stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn downgrade(&self) -> mpsc::WeakSender<Request> {
        self.tx.downgrade()
    }
}

/// Entry point for starting the dispatch service
pub struct TcpDispatcher;

impl TcpDispatcher {
    /// Spawn the service on the current runtime
    ///
    /// Returns the handle every other component uses to reach it and the
    /// service task's join handle.
    pub fn start<C, H>(config: DispatcherConfig, cache: C, handler: Arc<H>) -> (DispatcherHandle, JoinHandle<()>)
    where
        C: ConnectionCache,
        H: ConnectionHandler + ?Sized,
    {
        let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let handle = DispatcherHandle::new(tx);
        let service = DispatchService::new(config, cache, handler, rx, handle.downgrade());
        let task = tokio::spawn(service.run());
        (handle, task)
    }
}
