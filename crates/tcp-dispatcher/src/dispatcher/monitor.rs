//! Failure propagation from connection owners to the dispatch service.
//!
//! Subscribing to an owner spawns one small task that waits for the owner's
//! termination and posts [`Request::OwnerDown`] into the service mailbox.
//! The cleanup itself therefore runs inside the service loop, in order with
//! every other request.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::dispatcher::Request;
use crate::error::{Error, Result};
use crate::owner::{OwnerHandle, OwnerId};

/// Termination subscriptions, at most one per owner
#[derive(Debug, Default)]
pub(crate) struct OwnerMonitors {
    watching: HashMap<OwnerId, JoinHandle<()>>,
}

impl OwnerMonitors {
    /// Watch `owner`, posting `OwnerDown` to `mailbox` when it terminates
    ///
    /// Subscribing twice to the same owner is a no-op. Fails without side
    /// effects if the owner is already gone.
    pub(crate) fn subscribe(&mut self, owner: &OwnerHandle, mailbox: &mpsc::WeakSender<Request>) -> Result<()> {
        let id = owner.id();
        if !owner.is_alive() {
            return Err(Error::OwnerTerminated(id));
        }
        if self.watching.contains_key(&id) {
            return Ok(());
        }

        let mailbox = mailbox.clone();
        let owner = owner.clone();
        let task = tokio::spawn(async move {
            let reason = owner.terminated().await;
            // the service may have stopped while the owner was alive
            let Some(mailbox) = mailbox.upgrade() else {
                trace!(owner = %id, %reason, "owner terminated after dispatcher stopped");
                return;
            };
            trace!(owner = %id, %reason, "owner terminated, notifying dispatcher");
            let _ = mailbox.send(Request::OwnerDown { owner: id, reason }).await;
        });

        self.watching.insert(id, task);
        Ok(())
    }

    /// Drop the subscription for `owner`, returning whether one existed
    pub(crate) fn forget(&mut self, owner: OwnerId) -> bool {
        self.watching.remove(&owner).is_some()
    }

    /// Cancel the subscription for an owner nothing refers to anymore
    pub(crate) fn unsubscribe(&mut self, owner: OwnerId) {
        if let Some(task) = self.watching.remove(&owner) {
            task.abort();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.watching.len()
    }

    /// Cancel every subscription
    pub(crate) fn clear(&mut self) {
        for (_, task) in self.watching.drain() {
            task.abort();
        }
    }
}

impl Drop for OwnerMonitors {
    fn drop(&mut self) {
        self.clear();
    }
}
