//! TCP/TLS connection registry and dispatcher for the rvoip transport layer
//!
//! This crate answers two questions for the rest of the stack: is there
//! already a usable stream connection to a destination, and which task owns
//! which live connection. It consists of:
//!
//! - a [`DispatchService`](dispatcher::DispatchService): one task that owns
//!   the connection cache and serves requests in arrival order, never
//!   blocking on network I/O
//! - failure propagation: the service watches every connection owner and
//!   purges its records as soon as the owner terminates
//! - an expiry sweep run whenever the service has been idle for the sweep
//!   interval
//! - a listener spec generator turning enabled protocols and ports into
//!   supervision specs, plus a supervisor that runs them
//! - a bundled plain-TCP connection handler and listener
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_tcp_dispatcher::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let config = TransportConfig::default();
//! let handler = Arc::new(TcpConnectionHandler::new(config.handler.clone(), None));
//! let (dispatcher, _task) = TcpDispatcher::start(config.dispatcher.clone(), MemoryCache::empty(), handler);
//!
//! let socket = dispatcher.get_connection(Protocol::Tcp, "10.0.0.5", 5060).await?;
//! socket.send(bytes::Bytes::from_static(b"OPTIONS sip:10.0.0.5 SIP/2.0\r\n\r\n")).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handler;
pub mod listener;
pub mod logging;
pub mod owner;
pub mod record;
pub mod socket;
pub mod types;

// Re-export commonly used types
pub use cache::{ConnectionCache, MemoryCache};
pub use config::{ConfigProvider, TransportConfig};
pub use dispatcher::{DispatcherHandle, ReplyToken, Request, TcpDispatcher};
pub use error::{Error, Result};
pub use owner::{ExitReason, OwnerGuard, OwnerHandle, OwnerId};
pub use record::{CacheKey, ConnectionRecord, Expiry, Registration};
pub use socket::SocketHandle;
pub use types::{Endpoint, Protocol, Role, TransportFamily};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        cache::{ConnectionCache, MemoryCache},
        config::{ConfigProvider, TransportConfig},
        dispatcher::{DispatcherHandle, TcpDispatcher},
        error::{Error, Result},
        events::TransportEvent,
        handler::{ConnectionHandler, TcpConnectionHandler},
        listener::{listener_specs, ListenerRequest, ListenerSupervisor, TcpListenerFactory},
        owner::{ExitReason, OwnerGuard},
        record::{Expiry, Registration},
        socket::SocketHandle,
        types::{Endpoint, Protocol, Role},
    };
}
