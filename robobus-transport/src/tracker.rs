//! Request/reply correlation.
//!
//! # Architecture
//!
//! ```text
//! Request flow:
//!   1. next_correlation_id()
//!   2. register(cid, deadline, link) -> PendingRequestHandle
//!   3. send the request frame over the link
//!   4. handle.wait() until resolved or deadline
//!
//! Resolution (first one wins, the record is removed with it):
//!   - reply arrives        -> resolve(cid, Ok / Err(Remote))
//!   - deadline elapses     -> wait() removes the record, Err(Timeout)
//!   - link torn down       -> fail_link(link), Err(LinkClosed)
//!   - node closes          -> cancel_all(), Err(Cancelled)
//! ```
//!
//! Every path removes the record under the tracker lock before touching the
//! result channel, so a second resolution finds nothing and is a no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use robobus_core::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::BusError;
use crate::link::LinkId;
use crate::message::{CorrelationId, CorrelationIdFactory};

type ResultSender = oneshot::Sender<Result<Value, BusError>>;

struct PendingRequest {
    created_at: Instant,
    deadline: Instant,
    link: Option<LinkId>,
    sender: ResultSender,
}

/// Outstanding requests of one node.
pub struct RequestTracker {
    ids: CorrelationIdFactory,
    pending: Mutex<HashMap<CorrelationId, PendingRequest>>,
    max_pending: usize,
}

impl RequestTracker {
    /// Create a tracker allowing at most `max_pending` requests in flight.
    pub fn new(max_pending: usize) -> Self {
        Self {
            ids: CorrelationIdFactory::new(),
            pending: Mutex::new(HashMap::new()),
            max_pending,
        }
    }

    /// Generate a correlation id not used before by this tracker.
    pub fn next_correlation_id(&self) -> CorrelationId {
        self.ids.next_id()
    }

    /// Register a pending request.
    ///
    /// `link` is the only route the reply can take; tearing that link down
    /// fails the request.
    ///
    /// # Errors
    ///
    /// `TooManyPending` at capacity, `DuplicateCorrelationId` if `cid` is
    /// already pending.
    pub fn register(
        self: &Arc<Self>,
        cid: CorrelationId,
        deadline: Instant,
        link: Option<LinkId>,
    ) -> Result<PendingRequestHandle, BusError> {
        let (sender, receiver) = oneshot::channel();
        let created_at = Instant::now();

        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if pending.len() >= self.max_pending {
                return Err(BusError::TooManyPending {
                    max: self.max_pending,
                });
            }
            if pending.contains_key(&cid) {
                return Err(BusError::DuplicateCorrelationId(cid));
            }
            pending.insert(
                cid.clone(),
                PendingRequest {
                    created_at,
                    deadline,
                    link,
                    sender,
                },
            );
        }

        Ok(PendingRequestHandle {
            tracker: self.clone(),
            cid,
            deadline,
            timeout: deadline.saturating_duration_since(created_at),
            receiver,
        })
    }

    /// Resolve a pending request.
    ///
    /// Returns `false` if nothing was pending under `cid` (already resolved,
    /// timed out, or never registered); the result is discarded.
    pub fn resolve(&self, cid: &CorrelationId, result: Result<Value, BusError>) -> bool {
        let entry = self.take(cid);
        Self::complete(cid, entry, result)
    }

    /// Resolve a pending request with a reply that arrived on `link`.
    ///
    /// A request registered with a route is only resolved by a reply from
    /// that route; a reply from any other link leaves it pending and returns
    /// `false`.
    pub fn resolve_from(
        &self,
        link: LinkId,
        cid: &CorrelationId,
        result: Result<Value, BusError>,
    ) -> bool {
        let entry = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            match pending.get(cid) {
                Some(entry) if entry.link.is_some_and(|route| route != link) => None,
                Some(_) => pending.remove(cid),
                None => None,
            }
        };
        Self::complete(cid, entry, result)
    }

    fn complete(
        cid: &CorrelationId,
        entry: Option<PendingRequest>,
        result: Result<Value, BusError>,
    ) -> bool {
        match entry {
            Some(entry) => {
                tracing::debug!(
                    "resolved request {} after {:?}",
                    cid,
                    entry.created_at.elapsed()
                );
                // The waiter may have gone away; the record is gone either way.
                let _ = entry.sender.send(result);
                true
            }
            None => false,
        }
    }

    /// Fail every request routed through `link`.
    ///
    /// Returns the number of requests failed.
    pub fn fail_link(&self, link: LinkId) -> usize {
        let failed: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let cids: Vec<CorrelationId> = pending
                .iter()
                .filter(|(_, entry)| entry.link == Some(link))
                .map(|(cid, _)| cid.clone())
                .collect();
            cids.iter().filter_map(|cid| pending.remove(cid)).collect()
        };

        let count = failed.len();
        for entry in failed {
            let _ = entry.sender.send(Err(BusError::LinkClosed));
        }
        count
    }

    /// Resolve every pending request with `Cancelled`.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().map(|(_, entry)| entry).collect()
        };

        let count = drained.len();
        for entry in drained {
            let _ = entry.sender.send(Err(BusError::Cancelled));
        }
        count
    }

    /// Deadline of a pending request.
    pub fn deadline(&self, cid: &CorrelationId) -> Option<Instant> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(cid)
            .map(|entry| entry.deadline)
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self, cid: &CorrelationId) -> Option<PendingRequest> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(cid)
    }
}

impl fmt::Debug for RequestTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTracker")
            .field("pending", &self.len())
            .field("max_pending", &self.max_pending)
            .finish()
    }
}

/// Caller side of one pending request.
///
/// Dropping the handle before resolution removes the pending record, so a
/// reply arriving later is discarded.
pub struct PendingRequestHandle {
    tracker: Arc<RequestTracker>,
    cid: CorrelationId,
    deadline: Instant,
    timeout: Duration,
    receiver: oneshot::Receiver<Result<Value, BusError>>,
}

impl PendingRequestHandle {
    /// Correlation id of the request.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.cid
    }

    /// Deadline of the request.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait until the request resolves or its deadline passes.
    ///
    /// # Errors
    ///
    /// `Timeout` at the deadline; otherwise whatever error resolved it.
    pub async fn wait(mut self) -> Result<Value, BusError> {
        match tokio::time::timeout_at(self.deadline, &mut self.receiver).await {
            Ok(Ok(result)) => result,
            // Sender dropped without sending: the record was removed unresolved.
            Ok(Err(_)) => Err(BusError::Cancelled),
            Err(_elapsed) => {
                if self.tracker.take(&self.cid).is_some() {
                    return Err(BusError::Timeout(self.timeout));
                }
                // Lost the race to a resolver; its result is already sent.
                self.receiver
                    .try_recv()
                    .unwrap_or(Err(BusError::Timeout(self.timeout)))
            }
        }
    }
}

impl Drop for PendingRequestHandle {
    fn drop(&mut self) {
        self.tracker.take(&self.cid);
    }
}

impl fmt::Debug for PendingRequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequestHandle")
            .field("cid", &self.cid)
            .field("deadline", &self.deadline)
            .finish()
    }
}
