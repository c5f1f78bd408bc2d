//! Correlation of in-flight requests with their responses.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::protocol::{ClientError, ClientResult, Response};

/// Request id -> single-slot channel of the caller waiting for it.
///
/// The dispatch task only needs shared access to look an id up, so lookups
/// do not contend with each other; callers take the write lock to register
/// and unregister.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    waiters: RwLock<HashMap<u32, mpsc::Sender<Response>>>,
}

impl PendingTable {
    /// Register a waiter for `id`. Must happen before the request is sent.
    pub(crate) fn register(self: &Arc<Self>, id: u32) -> ClientResult<Pending> {
        let mut waiters = self.waiters.write();
        if waiters.contains_key(&id) {
            return Err(ClientError::InUse(id));
        }

        let (tx, rx) = mpsc::channel(1);
        waiters.insert(id, tx);
        tracing::trace!(id, pending = waiters.len(), "registered pending waiter");

        Ok(Pending {
            id,
            rx,
            table: Arc::clone(self),
        })
    }

    /// Hand a response to whoever waits for its id. Never blocks.
    ///
    /// Returns false when nobody waits for the id anymore or the waiter
    /// already holds a response.
    pub(crate) fn deliver(&self, response: Response) -> bool {
        let waiters = self.waiters.read();
        let Some(tx) = waiters.get(&response.id) else {
            tracing::debug!(id = response.id, "discarding response for unknown request");
            return false;
        };

        match tx.try_send(response) {
            Ok(()) => true,
            Err(TrySendError::Full(response)) => {
                tracing::debug!(id = response.id, "discarding duplicate response");
                false
            }
            Err(TrySendError::Closed(response)) => {
                tracing::debug!(id = response.id, "discarding response, caller is gone");
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: u32) -> bool {
        self.waiters.read().contains_key(&id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.waiters.read().len()
    }

    fn remove(&self, id: u32) {
        self.waiters.write().remove(&id);
    }
}

/// A registered waiter. Dropping it unregisters the id, whichever way the
/// call ends.
#[derive(Debug)]
pub(crate) struct Pending {
    id: u32,
    rx: mpsc::Receiver<Response>,
    table: Arc<PendingTable>,
}

impl Pending {
    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) async fn recv(&mut self) -> Option<Response> {
        self.rx.recv().await
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}
