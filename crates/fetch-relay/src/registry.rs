//! Bookkeeping of requests still waiting for an answer.

use crate::envelope::ResponseEnvelope;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::RecvError;
use tracing::debug;
use uuid::Uuid;

/// Identifier tying a dispatched request to its eventual response.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

type ResponseSender = oneshot::Sender<ResponseEnvelope>;

/// Registry of in-flight correlations.
///
/// An ID is present exactly while its request is unresolved. Both
/// [`resolve`](Self::resolve) and [`evict`](Self::evict) go through a single
/// atomic remove, so when an answer and a deadline race for the same ID only
/// one of them observes the entry.
#[derive(Clone, Debug, Default)]
pub struct CorrelationRegistry {
    pending: Arc<DashMap<CorrelationId, ResponseSender>>,
}

impl CorrelationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh ID and the future its answer will arrive on.
    #[must_use]
    pub fn register(&self) -> (CorrelationId, PendingResponse) {
        let (sender, receiver) = oneshot::channel();

        loop {
            let id = CorrelationId::random();
            match self.pending.entry(id) {
                Entry::Occupied(_) => {}
                Entry::Vacant(entry) => {
                    entry.insert(sender);
                    debug!(%id, "registered correlation");

                    return (
                        id,
                        PendingResponse {
                            id,
                            receiver,
                            registry: self.clone(),
                        },
                    );
                }
            }
        }
    }

    /// Hands `value` to the request waiting on `id`.
    ///
    /// Returns `false` if `id` is no longer pending, which is what a late or
    /// duplicate delivery looks like.
    pub fn resolve(&self, id: &CorrelationId, value: ResponseEnvelope) -> bool {
        let Some((_, sender)) = self.pending.remove(id) else {
            return false;
        };

        if sender.send(value).is_err() {
            debug!(%id, "waiter went away before its response arrived");
        }

        true
    }

    /// Drops the entry for `id` without resolving it.
    ///
    /// Returns `true` only if the entry was still pending.
    pub fn evict(&self, id: &CorrelationId) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Whether `id` is still pending.
    #[must_use]
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of pending correlations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Future resolving to the response registered under its ID.
///
/// Dropping it removes the entry, so an abandoned request never leaks.
#[derive(Debug)]
pub struct PendingResponse {
    id: CorrelationId,
    receiver: oneshot::Receiver<ResponseEnvelope>,
    registry: CorrelationRegistry,
}

impl PendingResponse {
    /// The ID this future is waiting on.
    #[must_use]
    pub const fn id(&self) -> CorrelationId {
        self.id
    }
}

impl Future for PendingResponse {
    type Output = Result<ResponseEnvelope, RecvError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx)
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if self.registry.evict(&self.id) {
            debug!(id = %self.id, "abandoned correlation evicted");
        }
    }
}
