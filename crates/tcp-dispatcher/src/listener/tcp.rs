use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::ListenConfig;
use crate::dispatcher::DispatcherHandle;
use crate::error::{Error, Result};
use crate::handler::TcpConnectionHandler;
use crate::listener::ListenerFactory;
use crate::owner::{ExitReason, OwnerGuard};
use crate::record::Registration;
use crate::types::{Protocol, Role};

/// Plain TCP listeners registering with the dispatcher
///
/// Each run binds the wildcard address of the protocol's family, registers
/// a listener record and hands accepted streams to the connection handler.
#[derive(Clone)]
pub struct TcpListenerFactory {
    dispatcher: DispatcherHandle,
    handler: TcpConnectionHandler,
    bind_v4: IpAddr,
    bind_v6: IpAddr,
}

impl TcpListenerFactory {
    pub fn new(dispatcher: DispatcherHandle, handler: TcpConnectionHandler, listen: &ListenConfig) -> Self {
        Self {
            dispatcher,
            handler,
            bind_v4: listen.bind_v4,
            bind_v6: listen.bind_v6,
        }
    }

    fn bind_addr(&self, protocol: Protocol, port: u16) -> SocketAddr {
        let ip = if protocol.is_ipv6() { self.bind_v6 } else { self.bind_v4 };
        SocketAddr::new(ip, port)
    }
}

#[async_trait]
impl ListenerFactory for TcpListenerFactory {
    async fn run(&self, protocol: Protocol, port: u16) -> Result<()> {
        if protocol.is_secure() {
            return Err(Error::UnsupportedProtocol(protocol));
        }

        let listener = TcpListener::bind(self.bind_addr(protocol, port)).await?;
        let local = listener.local_addr()?;

        let guard = OwnerGuard::new();
        self.dispatcher
            .register_connection(Role::Listener, Registration::listener(guard.handle(), protocol, local))
            .await?;
        info!(%protocol, address = %local, owner = %guard.id(), "Listener bound");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%protocol, %peer, "Accepted connection");
                    let _ = stream.set_nodelay(true);
                    self.handler
                        .spawn_inbound(stream, peer, protocol, self.dispatcher.clone());
                }
                Err(e) => {
                    warn!(%protocol, address = %local, error = %e, "Accept failed, stopping listener");
                    guard.exit(ExitReason::Abnormal(format!("accept failed: {}", e)));
                    return Err(Error::Io(e));
                }
            }
        }
    }
}
