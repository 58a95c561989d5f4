//! The dispatch service loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::cache::ConnectionCache;
use crate::config::DispatcherConfig;
use crate::dispatcher::monitor::OwnerMonitors;
use crate::dispatcher::{DispatcherHandle, ReplyToken, Request};
use crate::error::{Error, Result};
use crate::handler::{ConnectRequest, ConnectionHandler};
use crate::owner::{ExitReason, OwnerId};
use crate::record::{CacheKey, ConnectionRecord, Expiry, RecordId, Registration};
use crate::socket::SocketHandle;
use crate::types::{Endpoint, Protocol, Role};

enum Flow {
    Continue,
    Stop,
}

/// Single-task owner of the connection cache
///
/// Usually started through [`TcpDispatcher::start`](crate::dispatcher::TcpDispatcher::start);
/// constructing it directly is useful when the caller wants to drive
/// [`run`](DispatchService::run) on a task of its own.
pub struct DispatchService<C, H: ?Sized> {
    cache: C,
    handler: Arc<H>,
    mailbox: mpsc::Receiver<Request>,
    self_tx: mpsc::WeakSender<Request>,
    monitors: OwnerMonitors,
    sweep_interval: Duration,
    next_record_id: u64,
}

impl<C, H> DispatchService<C, H>
where
    C: ConnectionCache,
    H: ConnectionHandler + ?Sized,
{
    pub fn new(
        config: DispatcherConfig,
        cache: C,
        handler: Arc<H>,
        mailbox: mpsc::Receiver<Request>,
        self_tx: mpsc::WeakSender<Request>,
    ) -> Self {
        Self {
            cache,
            handler,
            mailbox,
            self_tx,
            monitors: OwnerMonitors::default(),
            sweep_interval: config.sweep_interval(),
            next_record_id: 1,
        }
    }

    /// Process requests until shutdown or until every handle is dropped
    ///
    /// An idle mailbox for a whole sweep interval triggers an expiry pass.
    pub async fn run(mut self) {
        info!(sweep_interval = ?self.sweep_interval, "TCP dispatcher started");

        loop {
            match tokio::time::timeout(self.sweep_interval, self.mailbox.recv()).await {
                Err(_) => self.sweep_expired(),
                Ok(None) => {
                    info!("All dispatcher handles dropped, stopping");
                    break;
                }
                Ok(Some(request)) => {
                    trace!(kind = request.kind(), "dispatcher request");
                    if let Flow::Stop = self.handle_request(request) {
                        break;
                    }
                }
            }
        }

        self.monitors.clear();
        info!(records = self.cache.size(), "TCP dispatcher stopped");
    }

    fn handle_request(&mut self, request: Request) -> Flow {
        match request {
            Request::GetConnection {
                protocol,
                host,
                port,
                reply,
            } => self.get_connection(protocol, host, port, reply),
            Request::RegisterConnection {
                role,
                registration,
                reply,
            } => {
                let result = self.register_connection(role, registration);
                let _ = reply.send(result);
            }
            Request::ListConnections { reply } => {
                let _ = reply.send(self.cache.snapshot());
            }
            Request::OwnerDown { owner, reason } => self.owner_down(owner, reason),
            Request::Shutdown { reply } => {
                info!(records = self.cache.size(), "Dispatcher shutdown requested");
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                return Flow::Stop;
            }
            Request::Unrecognized { description, reply } => {
                error!(request = %description, "Dispatcher received unrecognized request");
                if let Some(reply) = reply {
                    let _ = reply.send(Err(Error::UnrecognizedRequest(description)));
                }
            }
        }
        Flow::Continue
    }

    fn get_connection(
        &mut self,
        protocol: Protocol,
        host: String,
        port: u16,
        reply: oneshot::Sender<Result<SocketHandle>>,
    ) {
        if host.trim().is_empty() || port == 0 {
            let _ = reply.send(Err(Error::InvalidRequest(format!(
                "invalid destination '{}:{}'",
                host, port
            ))));
            return;
        }

        let remote = Endpoint::new(&host, port);
        match self.cache.lookup_by_remote(protocol, &remote) {
            Ok(Some(ConnectionRecord {
                socket: Some(socket),
                id,
                ..
            })) => {
                debug!(%protocol, %remote, record = %id, "Reusing cached connection");
                let _ = reply.send(Ok(socket));
            }
            Ok(_) => self.start_connect(protocol, remote, ReplyToken::new(reply)),
            Err(e) => {
                warn!(%protocol, %remote, error = %e, "Connection lookup failed");
                let _ = reply.send(Err(e));
            }
        }
    }

    fn start_connect(&mut self, protocol: Protocol, remote: Endpoint, reply: ReplyToken) {
        let Some(tx) = self.self_tx.upgrade() else {
            reply.resolve(Err(Error::DispatcherUnavailable));
            return;
        };

        debug!(%protocol, %remote, "No cached connection, starting connection handler");
        self.handler.start_connect(
            ConnectRequest {
                protocol,
                remote,
                reply,
            },
            DispatcherHandle::new(tx),
        );
    }

    fn register_connection(&mut self, role: Role, registration: Registration) -> Result<()> {
        let key = CacheKey::derive(role, &registration)?;
        let owner = registration.owner.id();
        let watched_before = self.monitors.len();

        if let Err(e) = self.monitors.subscribe(&registration.owner, &self.self_tx) {
            warn!(%owner, %key, error = %e, "Refusing registration");
            return Err(e);
        }
        let subscribed_now = self.monitors.len() > watched_before;

        let expiry = match role {
            Role::Listener => Expiry::Never,
            Role::Inbound | Role::Outbound => registration.expiry,
        };
        let record = ConnectionRecord {
            id: RecordId(self.next_record_id),
            key: key.clone(),
            owner,
            protocol: registration.protocol,
            local: registration.local,
            remote: registration.remote,
            socket: registration.socket,
            expiry,
        };

        if let Err(e) = self.cache.insert(record) {
            error!(%owner, %key, error = %e, "Failed to cache connection");
            if subscribed_now {
                self.monitors.unsubscribe(owner);
            }
            return Err(e);
        }

        self.next_record_id += 1;
        debug!(%owner, %key, records = self.cache.size(), "Registered connection");
        Ok(())
    }

    fn owner_down(&mut self, owner: OwnerId, reason: ExitReason) {
        self.monitors.forget(owner);

        match &reason {
            ExitReason::Normal => debug!(%owner, "Connection owner exited normally"),
            ExitReason::Abnormal(why) => warn!(%owner, reason = %why, "Connection owner exited abnormally"),
        }

        match self.cache.lookup_by_owner(owner) {
            None => {
                warn!(%owner, %reason, "Termination notice from owner with no cached connections");
            }
            Some(records) => {
                let removed = self.cache.delete_by_owner(owner);
                debug!(
                    %owner,
                    removed,
                    keys = ?records.iter().map(|r| r.key.to_string()).collect::<Vec<_>>(),
                    "Purged connections of terminated owner"
                );
            }
        }
    }

    fn sweep_expired(&mut self) {
        let removed = self.cache.delete_expired(Instant::now());
        if removed > 0 {
            debug!(removed, remaining = self.cache.size(), "Removed expired connections");
        } else {
            trace!(records = self.cache.size(), "Expiry sweep found nothing to remove");
        }
    }
}
