//! Table of locally issued requests awaiting a peer response.
//!
//! Each outbound request owns one completion slot; the connection's read
//! loop fulfills it when the matching response frame arrives, and `drain`
//! fulfills every survivor when the connection closes so no caller is left
//! suspended. Ids are allocated monotonically and never reused.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::{ConduitError, Result};

/// Completion slot for one outstanding request.
type Slot = oneshot::Sender<Result<Value>>;

/// Correlation table for locally issued requests.
///
/// `register`, `resolve`, and `drain` race between calling tasks and the
/// read loop, so all mutations go through a single lock over the counter
/// and the slot map together.
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    slots: HashMap<u64, Slot>,
}

impl PendingRequests {
    /// Create an empty table; the first allocated id is `0`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next request id and an empty completion slot.
    ///
    /// The returned receiver resolves exactly once: with the peer's result
    /// or error, or with [`ConduitError::Closed`] when the table drains.
    pub async fn register(&self) -> (u64, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.slots.insert(id, tx);
        (id, rx)
    }

    /// Fulfill the slot for `id` with `outcome`, removing it.
    ///
    /// Returns `false` if no slot exists — a late, duplicate, or never-issued
    /// response. The caller reports that as a protocol anomaly; it is not
    /// fatal. A fulfilled slot whose receiver was dropped (the caller
    /// abandoned the call) is consumed silently.
    pub async fn resolve(&self, id: u64, outcome: Result<Value>) -> bool {
        let slot = self.inner.lock().await.slots.remove(&id);
        match slot {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop the slot for `id` without fulfilling it.
    ///
    /// Used when the request frame was never handed to the transport, so no
    /// response can ever arrive.
    pub async fn discard(&self, id: u64) {
        self.inner.lock().await.slots.remove(&id);
    }

    /// Resolve every remaining slot with a connection-closed failure.
    ///
    /// Returns how many slots were drained. Ids stay retired: the counter is
    /// not reset.
    pub async fn drain(&self, reason: &str) -> usize {
        let slots = {
            let mut inner = self.inner.lock().await;
            std::mem::take(&mut inner.slots)
        };
        let drained = slots.len();
        for (_, tx) in slots {
            let _ = tx.send(Err(ConduitError::Closed(reason.to_owned())));
        }
        drained
    }

    /// Number of requests still awaiting a response.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.slots.len()
    }

    /// Whether no requests are outstanding.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
