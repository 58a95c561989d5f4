//! Shared fixtures for the dispatcher integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use rvoip_tcp_dispatcher::cache::ConnectionCache;
use rvoip_tcp_dispatcher::dispatcher::DispatcherHandle;
use rvoip_tcp_dispatcher::handler::{ConnectRequest, ConnectionHandler};
use rvoip_tcp_dispatcher::socket::SocketCommand;
use rvoip_tcp_dispatcher::{
    ConnectionRecord, Endpoint, Error, MemoryCache, OwnerGuard, OwnerId, Protocol, Registration, Result,
    SocketHandle,
};

/// Connection handler that only records what it was asked to do
///
/// Tests take the pending requests and play the connection task themselves.
#[derive(Default)]
pub struct RecordingHandler {
    pending: Mutex<Vec<(ConnectRequest, DispatcherHandle)>>,
}

impl RecordingHandler {
    pub fn spawned(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn take(&self) -> Vec<(ConnectRequest, DispatcherHandle)> {
        std::mem::take(&mut *self.pending.lock().unwrap())
    }

    /// Wait until at least `count` connect attempts were started
    pub async fn wait_for(&self, count: usize) {
        for _ in 0..200 {
            if self.spawned() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} connect attempts, saw {}", count, self.spawned());
    }
}

impl ConnectionHandler for RecordingHandler {
    fn start_connect(&self, request: ConnectRequest, dispatcher: DispatcherHandle) {
        self.pending.lock().unwrap().push((request, dispatcher));
    }
}

/// Cache whose lookups and inserts can be switched to fail
pub struct FaultyCache {
    inner: MemoryCache,
    fail_lookup: Arc<AtomicBool>,
    fail_insert: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct FaultSwitches {
    pub lookup: Arc<AtomicBool>,
    pub insert: Arc<AtomicBool>,
}

impl FaultyCache {
    pub fn new() -> (Self, FaultSwitches) {
        let switches = FaultSwitches {
            lookup: Arc::new(AtomicBool::new(false)),
            insert: Arc::new(AtomicBool::new(false)),
        };
        let cache = Self {
            inner: MemoryCache::empty(),
            fail_lookup: switches.lookup.clone(),
            fail_insert: switches.insert.clone(),
        };
        (cache, switches)
    }
}

impl ConnectionCache for FaultyCache {
    fn empty() -> Self {
        Self::new().0
    }

    fn insert(&mut self, record: ConnectionRecord) -> Result<()> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(Error::CacheInsert("injected insert fault".to_string()));
        }
        self.inner.insert(record)
    }

    fn lookup_by_remote(&self, protocol: Protocol, remote: &Endpoint) -> Result<Option<ConnectionRecord>> {
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(Error::CacheLookup("injected lookup fault".to_string()));
        }
        self.inner.lookup_by_remote(protocol, remote)
    }

    fn lookup_by_owner(&self, owner: OwnerId) -> Option<Vec<ConnectionRecord>> {
        self.inner.lookup_by_owner(owner)
    }

    fn delete_by_owner(&mut self, owner: OwnerId) -> usize {
        self.inner.delete_by_owner(owner)
    }

    fn delete_expired(&mut self, now: Instant) -> usize {
        self.inner.delete_expired(now)
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn snapshot(&self) -> Vec<ConnectionRecord> {
        self.inner.snapshot()
    }
}

/// A connection owned by the test itself
///
/// Keeps the owner guard and the command receiver alive so the cached
/// socket stays usable until the fixture is dropped.
pub struct FakeConnection {
    pub guard: OwnerGuard,
    pub socket: SocketHandle,
    pub commands: mpsc::Receiver<SocketCommand>,
}

impl FakeConnection {
    pub fn new(protocol: Protocol, host: &str, port: u16) -> Self {
        let guard = OwnerGuard::new();
        let (socket, commands) = SocketHandle::channel(protocol, local_addr(), Endpoint::new(host, port), 8);
        Self { guard, socket, commands }
    }

    pub fn registration(&self) -> Registration {
        Registration::connection(self.guard.handle(), self.socket.clone())
    }
}

pub fn local_addr() -> SocketAddr {
    "192.0.2.1:5060".parse().unwrap()
}

/// Poll the dispatcher until `check` accepts its snapshot
pub async fn wait_for_records<F>(dispatcher: &DispatcherHandle, check: F) -> Vec<ConnectionRecord>
where
    F: Fn(&[ConnectionRecord]) -> bool,
{
    for _ in 0..200 {
        let records = dispatcher.list_connections().await.unwrap();
        if check(&records) {
            return records;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("dispatcher records never reached the expected state");
}
