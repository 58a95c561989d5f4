//! In-memory connection cache.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio::time::Instant;

use crate::cache::ConnectionCache;
use crate::error::{Error, Result};
use crate::owner::OwnerId;
use crate::record::{ConnectionRecord, RecordId};
use crate::types::{Endpoint, Protocol, Role};

/// Record map with owner and remote-endpoint indexes
///
/// Records are ordered by [`RecordId`], which the dispatcher hands out in
/// registration order, so "oldest first" falls out of the map order.
#[derive(Debug, Default)]
pub struct MemoryCache {
    records: BTreeMap<RecordId, ConnectionRecord>,
    by_owner: HashMap<OwnerId, BTreeSet<RecordId>>,
    by_remote: HashMap<(Protocol, Endpoint), BTreeSet<RecordId>>,
    max_records: Option<usize>,
}

impl MemoryCache {
    /// A cache refusing inserts once it holds `max_records` records
    pub fn with_capacity_limit(max_records: usize) -> Self {
        Self {
            max_records: Some(max_records),
            ..Default::default()
        }
    }

    fn remove(&mut self, id: RecordId) -> Option<ConnectionRecord> {
        let record = self.records.remove(&id)?;

        if let Some(ids) = self.by_owner.get_mut(&record.owner) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_owner.remove(&record.owner);
            }
        }

        if let Some(remote) = &record.remote {
            let index_key = (record.protocol, remote.clone());
            if let Some(ids) = self.by_remote.get_mut(&index_key) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_remote.remove(&index_key);
                }
            }
        }

        Some(record)
    }
}

impl ConnectionCache for MemoryCache {
    fn empty() -> Self {
        Self::default()
    }

    fn insert(&mut self, record: ConnectionRecord) -> Result<()> {
        if let Some(limit) = self.max_records {
            if self.records.len() >= limit {
                return Err(Error::CacheInsert(format!("capacity of {} records exhausted", limit)));
            }
        }
        if self.records.contains_key(&record.id) {
            return Err(Error::CacheInsert(format!("duplicate record id {}", record.id)));
        }

        self.by_owner.entry(record.owner).or_default().insert(record.id);

        if record.role() != Role::Listener {
            if let Some(remote) = &record.remote {
                self.by_remote
                    .entry((record.protocol, remote.clone()))
                    .or_default()
                    .insert(record.id);
            }
        }

        self.records.insert(record.id, record);
        Ok(())
    }

    fn lookup_by_remote(&self, protocol: Protocol, remote: &Endpoint) -> Result<Option<ConnectionRecord>> {
        let Some(ids) = self.by_remote.get(&(protocol, remote.clone())) else {
            return Ok(None);
        };

        let found = ids
            .iter()
            .filter_map(|id| self.records.get(id))
            .find(|record| record.socket.as_ref().map_or(false, |socket| !socket.is_closed()))
            .cloned();
        Ok(found)
    }

    fn lookup_by_owner(&self, owner: OwnerId) -> Option<Vec<ConnectionRecord>> {
        let ids = self.by_owner.get(&owner)?;
        let records: Vec<_> = ids.iter().filter_map(|id| self.records.get(id)).cloned().collect();
        if records.is_empty() {
            None
        } else {
            Some(records)
        }
    }

    fn delete_by_owner(&mut self, owner: OwnerId) -> usize {
        let Some(ids) = self.by_owner.get(&owner).cloned() else {
            return 0;
        };
        ids.into_iter().filter_map(|id| self.remove(id)).count()
    }

    fn delete_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<RecordId> = self
            .records
            .values()
            .filter(|record| record.expiry.is_expired(now))
            .map(|record| record.id)
            .collect();
        expired.into_iter().filter_map(|id| self.remove(id)).count()
    }

    fn size(&self) -> usize {
        self.records.len()
    }

    fn snapshot(&self) -> Vec<ConnectionRecord> {
        self.records.values().cloned().collect()
    }
}
