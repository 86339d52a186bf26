//! Response Correlator: matches an asynchronous on-chain `K8sAPIResponse`
//! back to the gateway request awaiting it, so a blocked HTTP handler can
//! be woken exactly once regardless of delivery order or duplicates.

use bridge_common::k8s::K8sApiResponse;
use dashmap::DashMap;
use log::warn;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CorrelatorError {
    #[error("request {0} is already awaiting a response")]
    DuplicateRequest(String),
}

pub struct PendingRequest {
    sender: oneshot::Sender<K8sApiResponse>,
    registered_at: Instant,
    deadline: Instant,
}

/// A handle an awaiting caller holds; dropping it without calling
/// [`Correlator::cancel`] still lets a late chain response arrive and be
/// garbage-collected by the sweep rather than leaking the map entry forever.
#[derive(Debug)]
pub struct AwaitHandle {
    request_id: String,
    receiver: oneshot::Receiver<K8sApiResponse>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AwaitOutcome {
    Response(K8sApiResponse),
    Timeout,
    Cancelled,
}

/// Keyed by `request_id`; the map never holds more entries than there are
/// requests genuinely in flight; the background sweep enforces that bound
/// against callers who abandon a request without awaiting or cancelling it.
pub struct Correlator {
    pending: DashMap<String, PendingRequest>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self { pending: DashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Rejects a `request_id` already awaiting a response: the first
    /// registrant holds the only handle that will ever be woken, so a
    /// duplicate must fail instead of silently replacing it.
    pub fn register(&self, request_id: String, timeout: Duration, now: Instant) -> Result<AwaitHandle, CorrelatorError> {
        let (sender, receiver) = oneshot::channel();
        match self.pending.entry(request_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(CorrelatorError::DuplicateRequest(request_id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(PendingRequest { sender, registered_at: now, deadline: now + timeout });
                Ok(AwaitHandle { request_id, receiver })
            }
        }
    }

    /// Deliver a response. Exactly-once: a response for a `request_id` with
    /// no pending registration (already completed, timed out, or swept) is
    /// dropped with a warning instead of erroring, since it always arrives
    /// racing against the sweep or a prior delivery.
    pub fn complete(&self, response: K8sApiResponse) {
        match self.pending.remove(&response.request_id) {
            Some((_, pending)) => {
                let _ = pending.sender.send(response);
            }
            None => {
                warn!("dropping late or duplicate chain response for request {}", response.request_id);
            }
        }
    }

    /// Remove the entry for a disconnected client, allowing the in-flight
    /// chain transaction to finalize independently; any response that
    /// arrives afterward is dropped by `complete` above.
    pub fn cancel(&self, request_id: &str) {
        self.pending.remove(request_id);
    }

    /// Remove entries past their deadline; callers still awaiting them
    /// observe the channel close and resolve to `Timeout`.
    pub fn sweep(&self, now: Instant) {
        self.pending.retain(|_, pending| now < pending.deadline);
    }

    #[cfg(test)]
    fn age_of(&self, request_id: &str, now: Instant) -> Option<Duration> {
        self.pending.get(request_id).map(|p| now.saturating_duration_since(p.registered_at))
    }
}

pub async fn await_response(mut handle: AwaitHandle, correlator: &Correlator, timeout: Duration) -> AwaitOutcome {
    match tokio::time::timeout(timeout, &mut handle.receiver).await {
        Ok(Ok(response)) => AwaitOutcome::Response(response),
        Ok(Err(_)) => AwaitOutcome::Timeout,
        Err(_) => {
            correlator.cancel(&handle.request_id);
            AwaitOutcome::Timeout
        }
    }
}
