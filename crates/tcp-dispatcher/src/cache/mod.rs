//! Connection cache contract.
//!
//! The dispatcher is the only writer of the cache and talks to it solely
//! through [`ConnectionCache`]. [`MemoryCache`] is the in-process
//! implementation used by default.

pub mod memory;

pub use memory::MemoryCache;

use tokio::time::Instant;

use crate::error::Result;
use crate::owner::OwnerId;
use crate::record::ConnectionRecord;
use crate::types::{Endpoint, Protocol};

/// Keyed store of live connection records
pub trait ConnectionCache: Send + 'static {
    /// A cache with no records
    fn empty() -> Self
    where
        Self: Sized;

    /// Store a record; duplicate keys are allowed
    fn insert(&mut self, record: ConnectionRecord) -> Result<()>;

    /// Find a reusable inbound or outbound connection to `remote`
    fn lookup_by_remote(&self, protocol: Protocol, remote: &Endpoint) -> Result<Option<ConnectionRecord>>;

    /// All records owned by `owner`, or `None` if it owns nothing
    fn lookup_by_owner(&self, owner: OwnerId) -> Option<Vec<ConnectionRecord>>;

    /// Remove every record owned by `owner`, returning how many were removed
    fn delete_by_owner(&mut self, owner: OwnerId) -> usize;

    /// Remove every record whose deadline is at or before `now`
    fn delete_expired(&mut self, now: Instant) -> usize;

    fn size(&self) -> usize;

    /// Copy of every record, oldest first
    fn snapshot(&self) -> Vec<ConnectionRecord>;

    /// Human-readable dump for logs
    fn debug_view(&self) -> String {
        let records = self.snapshot();
        let mut out = format!("{} connection record(s)", records.len());
        for record in records {
            out.push_str("\n  ");
            out.push_str(&record.to_string());
        }
        out
    }
}
