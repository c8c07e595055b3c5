//! Async resource request correlation.
//!
//! Each request gets a fresh id and a oneshot channel. Completing an id
//! removes its entry, so a second completion finds nothing and is ignored.
//! Once closed, new requests are answered `Failed` on the spot.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::resource::{RetCode, UriResource};

/// Request identifier, unique within one correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct PendingEntry {
    uri: String,
    created_at: DateTime<Utc>,
    tx: oneshot::Sender<UriResource>,
}

pub struct RequestCorrelator {
    next_id: AtomicU64,
    pending: DashMap<RequestId, PendingEntry>,
    closed: AtomicBool,
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a request and return the waiting side.
    pub fn begin_async(&self, uri: impl Into<String>) -> PendingResource {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        let uri = uri.into();
        tracing::trace!(request_id = %id, uri = %uri, "Registered async request");
        self.pending.insert(
            id,
            PendingEntry {
                uri,
                created_at: Utc::now(),
                tx,
            },
        );
        // close() may have cleared the map between our check and insert
        if self.is_closed()
            && let Some((_, entry)) = self.pending.remove(&id)
        {
            tracing::debug!(request_id = %id, uri = %entry.uri, "Request after close, answered failed");
            let _ = entry.tx.send(UriResource::with_code(RetCode::Failed));
        }
        PendingResource { id, rx }
    }

    /// Register a request and hand back both the waiter and its reply token.
    pub fn begin_reply(self: &Arc<Self>, uri: impl Into<String>) -> (PendingResource, Reply) {
        let pending = self.begin_async(uri);
        let reply = self.reply(pending.id());
        (pending, reply)
    }

    pub fn reply(self: &Arc<Self>, id: RequestId) -> Reply {
        Reply {
            id,
            correlator: Arc::clone(self),
            armed: true,
        }
    }

    /// Deliver `resource` to the waiter for `id`.
    ///
    /// Returns false for unknown or already completed ids.
    pub fn complete(&self, id: RequestId, resource: UriResource) -> bool {
        let Some((_, entry)) = self.pending.remove(&id) else {
            if self.is_closed() {
                tracing::debug!(request_id = %id, "Completion after close");
            } else {
                tracing::warn!(request_id = %id, "Completion for unknown or finished request");
            }
            return false;
        };

        let age_ms = (Utc::now() - entry.created_at).num_milliseconds();
        tracing::debug!(
            request_id = %id,
            uri = %entry.uri,
            age_ms,
            result = %resource,
            "Completed async request"
        );
        if entry.tx.send(resource).is_err() {
            tracing::debug!(request_id = %id, "Waiter dropped before completion");
        }
        true
    }

    /// Remove the entry for `id` without delivering. Its waiter sees `None`.
    pub fn discard(&self, id: RequestId) -> bool {
        let Some((_, entry)) = self.pending.remove(&id) else {
            return false;
        };
        tracing::debug!(request_id = %id, uri = %entry.uri, "Discarded unanswered request");
        true
    }

    /// Drop every pending entry without delivering. Waiters see `None`.
    pub fn clear(&self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "Dropped pending async requests");
        }
        dropped
    }

    /// Drop every pending entry and answer all later requests `Failed`.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        self.clear()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Waiting side of one async request.
#[derive(Debug)]
pub struct PendingResource {
    id: RequestId,
    rx: oneshot::Receiver<UriResource>,
}

impl PendingResource {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// `None` if the entry was dropped (bridge destroyed) before completion.
    pub async fn wait(self) -> Option<UriResource> {
        self.rx.await.ok()
    }
}

/// Completion token for one request. Sending consumes it.
///
/// A reply dropped without being sent discards its entry, so a resolver
/// that gives up can never leave a waiter hanging.
pub struct Reply {
    id: RequestId,
    correlator: Arc<RequestCorrelator>,
    armed: bool,
}

impl Reply {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn send(mut self, resource: UriResource) -> bool {
        self.armed = false;
        self.correlator.complete(self.id, resource)
    }

    /// Give up the token but keep the entry registered, for completions
    /// that arrive later by id (`Bridge::on_next_ready`).
    pub fn detach(mut self) -> RequestId {
        self.armed = false;
        self.id
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if self.armed {
            self.correlator.discard(self.id);
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply").field("id", &self.id).finish()
    }
}
