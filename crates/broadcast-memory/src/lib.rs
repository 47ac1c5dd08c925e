//! In-memory implementation of the broadcast crate.
//!
//! Channels live in an explicit [`MemoryBroadcastHub`] rather than in
//! process-wide state, so independent hubs (one per test, say) never observe
//! each other's traffic.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use proven_broadcast::{BroadcastChannel, BroadcastStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Default number of payloads buffered per channel before slow subscribers lag.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Options for the in-memory hub.
#[derive(Clone, Debug)]
pub struct MemoryBroadcastOptions {
    /// Payloads buffered per channel.
    pub capacity: usize,
}

impl Default for MemoryBroadcastOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// A set of named in-memory channels.
#[derive(Clone, Debug)]
pub struct MemoryBroadcastHub {
    capacity: usize,
    channels: Arc<DashMap<String, broadcast::Sender<Bytes>>>,
}

impl MemoryBroadcastHub {
    /// Create a new hub.
    #[must_use]
    pub fn new(options: MemoryBroadcastOptions) -> Self {
        Self {
            capacity: options.capacity.max(1),
            channels: Arc::new(DashMap::new()),
        }
    }

    /// Returns the channel with the given name, creating it on first use.
    ///
    /// # Errors
    /// Returns an error if the name is empty.
    pub fn channel<K>(&self, name: K) -> Result<MemoryBroadcastChannel, Error>
    where
        K: Into<String>,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidChannelName);
        }

        let sender = self
            .channels
            .entry(name.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone();

        Ok(MemoryBroadcastChannel { name, sender })
    }

    /// Number of channels created so far.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for MemoryBroadcastHub {
    fn default() -> Self {
        Self::new(MemoryBroadcastOptions::default())
    }
}

/// A handle to one named channel of a hub.
#[derive(Clone, Debug)]
pub struct MemoryBroadcastChannel {
    name: String,
    sender: broadcast::Sender<Bytes>,
}

impl MemoryBroadcastChannel {
    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl BroadcastChannel for MemoryBroadcastChannel {
    type Error = Error;

    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, payload: Bytes) -> Result<(), Error> {
        match self.sender.send(payload) {
            Ok(receivers) => debug!(channel = %self.name, receivers, "published payload"),
            Err(_) => debug!(channel = %self.name, "no subscribers, payload dropped"),
        }

        Ok(())
    }

    async fn subscribe(&self) -> Result<BroadcastStream, Error> {
        let receiver = self.sender.subscribe();
        let name = self.name.clone();

        let stream = futures::stream::unfold((receiver, name), |(mut receiver, name)| async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => return Some((payload, (receiver, name))),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(channel = %name, skipped, "subscriber lagged, payloads lost");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
