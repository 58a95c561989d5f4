use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::HandlerConfig;
use crate::dispatcher::DispatcherHandle;
use crate::error::Error;
use crate::events::{TransportEvent, TransportEventSender};
use crate::handler::{ConnectRequest, ConnectionHandler};
use crate::owner::{ExitReason, OwnerGuard};
use crate::record::Registration;
use crate::socket::{SocketCommand, SocketHandle};
use crate::types::{Endpoint, Protocol, Role};

/// Plain TCP connection handler
///
/// Owns one task per connection. Outbound connections are started by the
/// dispatcher through [`ConnectionHandler::start_connect`], inbound ones by
/// a listener through [`spawn_inbound`](TcpConnectionHandler::spawn_inbound).
/// Both register with the dispatcher and then serve the stream until EOF,
/// an I/O error or an explicit close.
#[derive(Clone)]
pub struct TcpConnectionHandler {
    inner: Arc<TcpHandlerInner>,
}

struct TcpHandlerInner {
    config: HandlerConfig,
    events_tx: Option<TransportEventSender>,
}

impl TcpConnectionHandler {
    pub fn new(config: HandlerConfig, events_tx: Option<TransportEventSender>) -> Self {
        Self {
            inner: Arc::new(TcpHandlerInner { config, events_tx }),
        }
    }

    /// Take ownership of an accepted stream in a new task
    pub fn spawn_inbound(&self, stream: TcpStream, peer: SocketAddr, protocol: Protocol, dispatcher: DispatcherHandle) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.serve_inbound(stream, peer, protocol, dispatcher).await;
        });
    }
}

impl ConnectionHandler for TcpConnectionHandler {
    fn start_connect(&self, request: ConnectRequest, dispatcher: DispatcherHandle) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.connect_outbound(request, dispatcher).await;
        });
    }
}

impl TcpHandlerInner {
    async fn connect_outbound(&self, request: ConnectRequest, dispatcher: DispatcherHandle) {
        let ConnectRequest { protocol, remote, reply } = request;

        if protocol.is_secure() {
            reply.resolve(Err(Error::UnsupportedProtocol(protocol)));
            return;
        }
        if reply.is_abandoned() {
            debug!(%protocol, %remote, "Caller gave up before connecting, skipping");
            return;
        }

        let timeout = self.config.connect_timeout();
        let stream = match tokio::time::timeout(timeout, connect_stream(protocol, &remote)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!(%protocol, %remote, error = %e, "Outbound connect failed");
                reply.resolve(Err(Error::ConnectFailed {
                    protocol,
                    remote,
                    reason: e.to_string(),
                }));
                return;
            }
            Err(_) => {
                debug!(%protocol, %remote, ?timeout, "Outbound connect timed out");
                reply.resolve(Err(Error::ConnectFailed {
                    protocol,
                    remote,
                    reason: format!("timed out after {:?}", timeout),
                }));
                return;
            }
        };

        let local = match stream.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                reply.resolve(Err(Error::Io(e)));
                return;
            }
        };

        let guard = OwnerGuard::new();
        let (socket, commands) = SocketHandle::channel(protocol, local, remote.clone(), self.config.write_queue);
        let registration = Registration::connection(guard.handle(), socket.clone());

        let registered = dispatcher.register_connection(Role::Outbound, registration).await;
        drop(dispatcher);
        if let Err(e) = registered {
            warn!(%protocol, %remote, error = %e, "Could not register outbound connection");
            reply.resolve(Err(e));
            guard.exit(ExitReason::Normal);
            return;
        }

        info!(%protocol, %remote, %local, owner = %guard.id(), "Outbound connection established");
        if !reply.resolve(Ok(socket)) {
            debug!(%protocol, %remote, "Caller stopped waiting, keeping connection cached");
        }

        self.serve(stream, commands, guard, protocol, local, remote).await;
    }

    async fn serve_inbound(&self, stream: TcpStream, peer: SocketAddr, protocol: Protocol, dispatcher: DispatcherHandle) {
        let local = match stream.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(%peer, error = %e, "Dropping inbound connection without local address");
                return;
            }
        };

        let remote = Endpoint::from(peer);
        let guard = OwnerGuard::new();
        let (socket, commands) = SocketHandle::channel(protocol, local, remote.clone(), self.config.write_queue);

        let registered = dispatcher
            .register_connection(Role::Inbound, Registration::connection(guard.handle(), socket))
            .await;
        drop(dispatcher);
        if let Err(e) = registered {
            warn!(%protocol, %remote, error = %e, "Could not register inbound connection");
            guard.exit(ExitReason::Normal);
            self.emit(TransportEvent::Error {
                error: format!("inbound connection from {} dropped: {}", remote, e),
            })
            .await;
            return;
        }

        debug!(%protocol, %remote, %local, owner = %guard.id(), "Inbound connection registered");
        self.serve(stream, commands, guard, protocol, local, remote).await;
    }

    async fn serve(
        &self,
        stream: TcpStream,
        mut commands: mpsc::Receiver<SocketCommand>,
        guard: OwnerGuard,
        protocol: Protocol,
        local: SocketAddr,
        remote: Endpoint,
    ) {
        let (mut reader, mut writer) = stream.into_split();
        let read_buffer = self.config.read_buffer.max(1);
        let mut buf = BytesMut::with_capacity(read_buffer);

        let reason = loop {
            tokio::select! {
                read = reader.read_buf(&mut buf) => match read {
                    Ok(0) => break ExitReason::Normal,
                    Ok(n) => {
                        trace!(%remote, bytes = n, "Received data");
                        let data = buf.split().freeze();
                        buf.reserve(read_buffer);
                        self.emit(TransportEvent::DataReceived {
                            protocol,
                            local,
                            source: remote.clone(),
                            data,
                        })
                        .await;
                    }
                    Err(e) => break ExitReason::Abnormal(format!("read failed: {}", e)),
                },
                command = commands.recv() => match command {
                    Some(SocketCommand::Send(data)) => {
                        trace!(%remote, bytes = data.len(), "Sending data");
                        if let Err(e) = writer.write_all(&data).await {
                            break ExitReason::Abnormal(format!("write failed: {}", e));
                        }
                    }
                    Some(SocketCommand::Close) => {
                        let _ = writer.shutdown().await;
                        break ExitReason::Normal;
                    }
                    None => break ExitReason::Normal,
                },
            }
        };

        debug!(%protocol, %remote, %reason, "Connection closed");
        guard.exit(reason.clone());
        self.emit(TransportEvent::ConnectionClosed {
            protocol,
            remote,
            reason,
        })
        .await;
    }

    async fn emit(&self, event: TransportEvent) {
        if let Some(tx) = &self.events_tx {
            if tx.send(event).await.is_err() {
                trace!("Transport event receiver dropped");
            }
        }
    }
}

/// Resolve `remote` within the protocol's IP family and connect to the
/// first address that accepts
async fn connect_stream(protocol: Protocol, remote: &Endpoint) -> io::Result<TcpStream> {
    let want_v6 = protocol.is_ipv6();
    let mut last_error = None;

    for addr in lookup_host((remote.host(), remote.port())).await? {
        if addr.is_ipv6() != want_v6 {
            continue;
        }
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!(
                "no {} address found for {}",
                if want_v6 { "IPv6" } else { "IPv4" },
                remote.host()
            ),
        )
    }))
}
