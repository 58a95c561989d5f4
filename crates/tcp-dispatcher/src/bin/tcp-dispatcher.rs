//! Standalone TCP dispatcher: listeners, connection cache and handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, trace, warn};

use rvoip_tcp_dispatcher::events::{self, TransportEvent};
use rvoip_tcp_dispatcher::handler::TcpConnectionHandler;
use rvoip_tcp_dispatcher::listener::{listener_specs, ListenerRequest, ListenerSupervisor, TcpListenerFactory};
use rvoip_tcp_dispatcher::logging::{parse_log_level, setup_logging, LoggingConfig};
use rvoip_tcp_dispatcher::{ConnectionCache, MemoryCache, TcpDispatcher, TransportConfig};

#[derive(Debug, Parser)]
#[command(name = "tcp-dispatcher", version, about = "SIP TCP/TLS connection dispatcher")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TransportConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => TransportConfig::default(),
    };

    let mut logging = LoggingConfig::from_settings(&config.logging)?;
    if let Some(level) = &args.log_level {
        logging.level = parse_log_level(level)?;
    }
    if args.json {
        logging = logging.with_json();
    }
    setup_logging(logging)?;
    info!("Starting tcp-dispatcher v{}", env!("CARGO_PKG_VERSION"));

    let (events_tx, mut events_rx) = events::channel(None);
    let handler = TcpConnectionHandler::new(config.handler.clone(), Some(events_tx));

    let cache = match config.dispatcher.max_records {
        0 => MemoryCache::empty(),
        limit => MemoryCache::with_capacity_limit(limit),
    };
    let (dispatcher, dispatcher_task) =
        TcpDispatcher::start(config.dispatcher.clone(), cache, Arc::new(handler.clone()));

    let specs = listener_specs(&ListenerRequest::from_config(&config));
    for spec in &specs {
        info!(listener = %spec.name, "Configured listener {}", spec);
    }
    let factory = Arc::new(TcpListenerFactory::new(dispatcher.clone(), handler, &config.listen));
    let supervisor = ListenerSupervisor::start(specs, factory, &config.supervisor);

    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                TransportEvent::DataReceived { source, data, .. } => {
                    trace!(%source, bytes = data.len(), "Data received");
                }
                TransportEvent::ConnectionClosed { remote, reason, .. } => {
                    trace!(%remote, %reason, "Connection closed");
                }
                TransportEvent::Error { error } => warn!(%error, "Transport error"),
            }
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutdown requested");

    supervisor.shutdown().await;
    if let Err(e) = dispatcher.shutdown().await {
        warn!(error = %e, "Dispatcher already stopped");
    }
    let _ = dispatcher_task.await;

    info!("tcp-dispatcher stopped");
    Ok(())
}
