//! Dispatch service tests
//!
//! Exercise the request protocol against a recording handler, so no real
//! sockets are involved.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use rvoip_tcp_dispatcher::config::DispatcherConfig;
use rvoip_tcp_dispatcher::{
    CacheKey, Endpoint, Error, ExitReason, Expiry, MemoryCache, OwnerGuard, Protocol, Registration, Request, Role,
    TcpDispatcher,
};

use common::{local_addr, wait_for_records, FakeConnection, FaultyCache, RecordingHandler};

fn start(
    config: DispatcherConfig,
) -> (
    rvoip_tcp_dispatcher::DispatcherHandle,
    tokio::task::JoinHandle<()>,
    Arc<RecordingHandler>,
) {
    let handler = Arc::new(RecordingHandler::default());
    let (dispatcher, task) = TcpDispatcher::start(config, MemoryCache::default(), handler.clone());
    (dispatcher, task, handler)
}

/// A cached connection is handed out without starting a handler
#[tokio::test]
async fn test_cache_hit_reuses_connection() {
    let (dispatcher, _task, handler) = start(DispatcherConfig::default());

    let conn = FakeConnection::new(Protocol::Tcp, "10.0.0.5", 5060);
    dispatcher
        .register_connection(Role::Outbound, conn.registration())
        .await
        .unwrap();

    let socket = dispatcher.get_connection(Protocol::Tcp, "10.0.0.5", 5060).await.unwrap();
    assert!(socket.same_connection(&conn.socket));
    assert_eq!(handler.spawned(), 0);

    // another protocol to the same peer is a different connection
    let pending = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.get_connection(Protocol::Tcp6, "10.0.0.5", 5060).await }
    });
    handler.wait_for(1).await;
    drop(handler.take());
    assert!(matches!(pending.await.unwrap(), Err(Error::ReplyDropped)));
}

/// Inbound connections are reused for requests towards the same peer
#[tokio::test]
async fn test_inbound_connection_is_reused() {
    let (dispatcher, _task, handler) = start(DispatcherConfig::default());

    let conn = FakeConnection::new(Protocol::Tcp, "198.51.100.7", 40312);
    dispatcher
        .register_connection(Role::Inbound, conn.registration())
        .await
        .unwrap();

    let socket = dispatcher
        .get_connection(Protocol::Tcp, "198.51.100.7", 40312)
        .await
        .unwrap();
    assert!(socket.same_connection(&conn.socket));
    assert_eq!(handler.spawned(), 0);
}

/// A miss hands the reply to the handler, which answers the caller
#[tokio::test]
async fn test_cache_miss_starts_handler() {
    let (dispatcher, _task, handler) = start(DispatcherConfig::default());

    let caller = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.get_connection(Protocol::Tcp, "EXAMPLE.com", 5060).await }
    });
    handler.wait_for(1).await;

    let (request, handle) = handler.take().pop().unwrap();
    assert_eq!(request.protocol, Protocol::Tcp);
    assert_eq!(request.remote, Endpoint::new("example.com", 5060));

    let conn = FakeConnection::new(Protocol::Tcp, "example.com", 5060);
    handle
        .register_connection(Role::Outbound, conn.registration())
        .await
        .unwrap();
    assert!(request.reply.resolve(Ok(conn.socket.clone())));

    let socket = caller.await.unwrap().unwrap();
    assert!(socket.same_connection(&conn.socket));

    // now it is cached
    let again = dispatcher.get_connection(Protocol::Tcp, "example.com", 5060).await.unwrap();
    assert!(again.same_connection(&conn.socket));
    assert_eq!(handler.spawned(), 0);
}

/// A pending miss does not hold up the requests queued behind it
#[tokio::test]
async fn test_pending_miss_does_not_block() {
    let (dispatcher, _task, handler) = start(DispatcherConfig::default());

    let _caller = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.get_connection(Protocol::Tcp, "10.0.0.9", 5060).await }
    });
    handler.wait_for(1).await;

    let listed = tokio::time::timeout(Duration::from_secs(1), dispatcher.list_connections())
        .await
        .expect("dispatcher blocked behind a pending connect")
        .unwrap();
    assert!(listed.is_empty());

    let conn = FakeConnection::new(Protocol::Tcp, "10.0.0.10", 5060);
    tokio::time::timeout(
        Duration::from_secs(1),
        dispatcher.register_connection(Role::Outbound, conn.registration()),
    )
    .await
    .expect("dispatcher blocked behind a pending connect")
    .unwrap();
}

/// Two concurrent misses each spawn a handler and both registrations stay
#[tokio::test]
async fn test_concurrent_misses_both_register() {
    let (dispatcher, _task, handler) = start(DispatcherConfig::default());

    let callers: Vec<_> = (0..2)
        .map(|_| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.get_connection(Protocol::Tcp, "10.0.0.5", 5060).await })
        })
        .collect();
    handler.wait_for(2).await;

    let mut connections = Vec::new();
    for (request, handle) in handler.take() {
        let conn = FakeConnection::new(Protocol::Tcp, "10.0.0.5", 5060);
        handle
            .register_connection(Role::Outbound, conn.registration())
            .await
            .unwrap();
        request.reply.resolve(Ok(conn.socket.clone()));
        connections.push(conn);
    }

    for caller in callers {
        let socket = caller.await.unwrap().unwrap();
        assert!(connections.iter().any(|conn| socket.same_connection(&conn.socket)));
    }

    let records = dispatcher.list_connections().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].key, records[1].key);
    assert_ne!(records[0].owner, records[1].owner);

    // lookups settle on the oldest registration
    let socket = dispatcher.get_connection(Protocol::Tcp, "10.0.0.5", 5060).await.unwrap();
    assert!(socket.same_connection(&connections[0].socket));
}

/// A closed socket is not handed out, a new connection is started instead
#[tokio::test]
async fn test_closed_socket_is_not_reused() {
    let (dispatcher, _task, handler) = start(DispatcherConfig::default());

    let FakeConnection { guard, socket, commands } = FakeConnection::new(Protocol::Tcp, "10.0.0.5", 5060);
    dispatcher
        .register_connection(Role::Outbound, Registration::connection(guard.handle(), socket))
        .await
        .unwrap();
    drop(commands);

    let _caller = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.get_connection(Protocol::Tcp, "10.0.0.5", 5060).await }
    });
    handler.wait_for(1).await;
    drop(guard);
}

/// Registering for an owner that already terminated changes nothing
#[tokio::test]
async fn test_register_dead_owner_is_refused() {
    let (dispatcher, _task, _handler) = start(DispatcherConfig::default());

    let FakeConnection { guard, socket, commands: _commands } = FakeConnection::new(Protocol::Tcp, "10.0.0.5", 5060);
    let owner = guard.handle();
    guard.exit(ExitReason::Normal);

    let result = dispatcher
        .register_connection(Role::Outbound, Registration::connection(owner.clone(), socket))
        .await;
    assert!(matches!(result, Err(Error::OwnerTerminated(id)) if id == owner.id()));
    assert!(dispatcher.list_connections().await.unwrap().is_empty());
}

/// Registrations missing what their role needs are rejected
#[tokio::test]
async fn test_invalid_registrations() {
    let (dispatcher, _task, _handler) = start(DispatcherConfig::default());
    let guard = OwnerGuard::new();

    let unbound = Registration::listener(guard.handle(), Protocol::Tcp, "0.0.0.0:0".parse().unwrap());
    let result = dispatcher.register_connection(Role::Listener, unbound).await;
    assert!(matches!(result, Err(Error::InvalidRegistration(_))));

    let no_remote = Registration::listener(guard.handle(), Protocol::Tcp, local_addr());
    let result = dispatcher.register_connection(Role::Outbound, no_remote).await;
    assert!(matches!(result, Err(Error::InvalidRegistration(_))));

    assert!(dispatcher.list_connections().await.unwrap().is_empty());
}

/// Requests without a usable destination are rejected before any lookup
#[tokio::test]
async fn test_invalid_destination() {
    let (dispatcher, _task, handler) = start(DispatcherConfig::default());

    let empty_host = dispatcher.get_connection(Protocol::Tcp, "", 5060).await;
    assert!(matches!(empty_host, Err(Error::InvalidRequest(_))));

    let zero_port = dispatcher.get_connection(Protocol::Tcp, "10.0.0.5", 0).await;
    assert!(matches!(zero_port, Err(Error::InvalidRequest(_))));

    assert_eq!(handler.spawned(), 0);
}

/// Owner termination removes every record it owned
#[tokio::test]
async fn test_owner_termination_purges_records() {
    let (dispatcher, _task, _handler) = start(DispatcherConfig::default());

    let conn = FakeConnection::new(Protocol::Tcp, "10.0.0.5", 5060);
    let listener = Registration::listener(conn.guard.handle(), Protocol::Tcp, local_addr());
    dispatcher.register_connection(Role::Listener, listener).await.unwrap();
    dispatcher
        .register_connection(Role::Outbound, conn.registration())
        .await
        .unwrap();

    let survivor = FakeConnection::new(Protocol::Tcp, "10.0.0.6", 5060);
    dispatcher
        .register_connection(Role::Outbound, survivor.registration())
        .await
        .unwrap();
    assert_eq!(dispatcher.list_connections().await.unwrap().len(), 3);

    // abnormal exit: the guard goes away without an explicit exit
    drop(conn);

    let records = wait_for_records(&dispatcher, |records| records.len() == 1).await;
    assert_eq!(records[0].owner, survivor.guard.id());
}

/// A normal exit purges the owner's records just like a crash
#[tokio::test]
async fn test_normal_exit_purges_records() {
    let (dispatcher, _task, _handler) = start(DispatcherConfig::default());

    let FakeConnection { guard, socket, commands: _commands } = FakeConnection::new(Protocol::Tcp, "10.0.0.5", 5060);
    dispatcher
        .register_connection(Role::Outbound, Registration::connection(guard.handle(), socket))
        .await
        .unwrap();

    guard.exit(ExitReason::Normal);
    wait_for_records(&dispatcher, |records| records.is_empty()).await;
}

/// Idle sweeps remove expired records and keep the rest
#[tokio::test(start_paused = true)]
async fn test_expiry_sweep() {
    let config = DispatcherConfig::default().with_sweep_interval(Duration::from_millis(100));
    let (dispatcher, _task, _handler) = start(config);

    let short = FakeConnection::new(Protocol::Tcp, "10.0.0.1", 5060);
    let forever = FakeConnection::new(Protocol::Tcp, "10.0.0.2", 5060);
    let long = FakeConnection::new(Protocol::Tcp, "10.0.0.3", 5060);

    let now = Instant::now();
    dispatcher
        .register_connection(
            Role::Outbound,
            short.registration().with_expiry(now + Duration::from_millis(50)),
        )
        .await
        .unwrap();
    dispatcher
        .register_connection(Role::Outbound, forever.registration())
        .await
        .unwrap();
    dispatcher
        .register_connection(Role::Outbound, long.registration().with_expiry(now + Duration::from_secs(10)))
        .await
        .unwrap();

    // nothing is removed before the service has been idle for an interval
    assert_eq!(dispatcher.list_connections().await.unwrap().len(), 3);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let remaining: Vec<_> = dispatcher
        .list_connections()
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.owner)
        .collect();
    assert_eq!(remaining, vec![forever.guard.id(), long.guard.id()]);

    tokio::time::sleep(Duration::from_secs(11)).await;
    let remaining = dispatcher.list_connections().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].owner, forever.guard.id());
    assert_eq!(remaining[0].expiry, Expiry::Never);
}

/// Listener records never expire, whatever the registration asked for
#[tokio::test(start_paused = true)]
async fn test_listener_never_expires() {
    let config = DispatcherConfig::default().with_sweep_interval(Duration::from_millis(100));
    let (dispatcher, _task, _handler) = start(config);

    let guard = OwnerGuard::new();
    let registration =
        Registration::listener(guard.handle(), Protocol::Tcp, local_addr()).with_expiry(Instant::now());
    dispatcher.register_connection(Role::Listener, registration).await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    let records = dispatcher.list_connections().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].expiry, Expiry::Never);
    assert_eq!(
        records[0].key,
        CacheKey::Listener {
            protocol: Protocol::Tcp,
            local_port: 5060
        }
    );
}

/// Lookup faults are returned to the caller and the service keeps running
#[tokio::test]
async fn test_lookup_fault_is_reported() {
    let (cache, faults) = FaultyCache::new();
    let handler = Arc::new(RecordingHandler::default());
    let (dispatcher, _task) = TcpDispatcher::start(DispatcherConfig::default(), cache, handler.clone());

    faults.lookup.store(true, Ordering::SeqCst);
    let result = dispatcher.get_connection(Protocol::Tcp, "10.0.0.5", 5060).await;
    assert!(matches!(result, Err(ref e) if e.is_cache_fault()));
    assert_eq!(handler.spawned(), 0);

    faults.lookup.store(false, Ordering::SeqCst);
    assert!(dispatcher.list_connections().await.is_ok());
}

/// Insert faults are returned to the registering task
#[tokio::test]
async fn test_insert_fault_is_reported() {
    let (cache, faults) = FaultyCache::new();
    let handler = Arc::new(RecordingHandler::default());
    let (dispatcher, _task) = TcpDispatcher::start(DispatcherConfig::default(), cache, handler);

    let conn = FakeConnection::new(Protocol::Tcp, "10.0.0.5", 5060);
    faults.insert.store(true, Ordering::SeqCst);
    let result = dispatcher.register_connection(Role::Outbound, conn.registration()).await;
    assert!(matches!(result, Err(Error::CacheInsert(_))));
    assert!(dispatcher.list_connections().await.unwrap().is_empty());

    // the same owner can register once the cache recovers
    faults.insert.store(false, Ordering::SeqCst);
    dispatcher
        .register_connection(Role::Outbound, conn.registration())
        .await
        .unwrap();
    assert_eq!(dispatcher.list_connections().await.unwrap().len(), 1);

    drop(conn);
    wait_for_records(&dispatcher, |records| records.is_empty()).await;
}

/// A full cache refuses registrations without disturbing existing records
#[tokio::test]
async fn test_capacity_limit() {
    let handler = Arc::new(RecordingHandler::default());
    let (dispatcher, _task) =
        TcpDispatcher::start(DispatcherConfig::default(), MemoryCache::with_capacity_limit(1), handler);

    let first = FakeConnection::new(Protocol::Tcp, "10.0.0.5", 5060);
    let second = FakeConnection::new(Protocol::Tcp, "10.0.0.6", 5060);
    dispatcher
        .register_connection(Role::Outbound, first.registration())
        .await
        .unwrap();
    let result = dispatcher.register_connection(Role::Outbound, second.registration()).await;
    assert!(matches!(result, Err(Error::CacheInsert(_))));

    let records = dispatcher.list_connections().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].owner, first.guard.id());
}

/// Unknown requests get an error and the service carries on
#[tokio::test]
async fn test_unrecognized_request() {
    let (dispatcher, _task, _handler) = start(DispatcherConfig::default());

    let (reply, rx) = oneshot::channel();
    dispatcher
        .send(Request::Unrecognized {
            description: "purge_everything".to_string(),
            reply: Some(reply),
        })
        .await
        .unwrap();
    assert!(matches!(rx.await.unwrap(), Err(Error::UnrecognizedRequest(name)) if name == "purge_everything"));

    dispatcher
        .send(Request::Unrecognized {
            description: "fire_and_forget".to_string(),
            reply: None,
        })
        .await
        .unwrap();
    assert!(dispatcher.list_connections().await.unwrap().is_empty());
}

/// Shutdown stops the service; later requests fail
#[tokio::test]
async fn test_shutdown() {
    let (dispatcher, task, _handler) = start(DispatcherConfig::default());

    let conn = FakeConnection::new(Protocol::Tcp, "10.0.0.5", 5060);
    dispatcher
        .register_connection(Role::Outbound, conn.registration())
        .await
        .unwrap();

    dispatcher.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("dispatcher did not stop")
        .unwrap();

    assert!(dispatcher.is_closed());
    let result = dispatcher.get_connection(Protocol::Tcp, "10.0.0.5", 5060).await;
    assert!(matches!(result, Err(Error::DispatcherUnavailable)));
}

/// Dropping every handle stops the service, even with live owners cached
#[tokio::test]
async fn test_stops_when_handles_dropped() {
    let (dispatcher, task, _handler) = start(DispatcherConfig::default());

    let conn = FakeConnection::new(Protocol::Tcp, "10.0.0.5", 5060);
    dispatcher
        .register_connection(Role::Outbound, conn.registration())
        .await
        .unwrap();
    assert!(conn.guard.handle().is_alive());
    drop(dispatcher);

    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("dispatcher kept running after its last handle was dropped")
        .unwrap();

    // the owner outliving the service is harmless
    drop(conn);
    tokio::task::yield_now().await;
}

/// A termination notice for an owner with no records changes nothing
#[tokio::test]
async fn test_unknown_owner_termination_is_ignored() {
    let (dispatcher, _task, _handler) = start(DispatcherConfig::default());

    let conn = FakeConnection::new(Protocol::Tcp, "10.0.0.5", 5060);
    dispatcher
        .register_connection(Role::Outbound, conn.registration())
        .await
        .unwrap();

    dispatcher
        .send(Request::OwnerDown {
            owner: OwnerGuard::new().id(),
            reason: ExitReason::Normal,
        })
        .await
        .unwrap();

    let records = dispatcher.list_connections().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].owner, conn.guard.id());

    let socket = dispatcher.get_connection(Protocol::Tcp, "10.0.0.5", 5060).await.unwrap();
    assert!(socket.same_connection(&conn.socket));
}
