//! Abstract interface for fire-and-forget broadcast channels.
//!
//! A broadcast channel delivers every published payload to whoever happens to
//! be subscribed at that moment. There is no acknowledgment, no replay and no
//! ordering guarantee across channels, so any request/reply semantics must be
//! layered on top (see the reserved header names below).
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::Debug;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

/// Name of the channel carrying request envelopes towards responders.
pub const REQUESTS_CHANNEL: &str = "requests";

/// Name of the channel carrying response envelopes back to the gateway.
pub const RESPONSES_CHANNEL: &str = "responses";

/// Header under which the gateway embeds the correlation ID of a request.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header under which a responder echoes the correlation ID of the request it answers.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Stream of payloads received on a channel.
pub type BroadcastStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Marker trait for broadcast channel errors.
pub trait BroadcastChannelError: Error + Send + Sync + 'static {}

/// A named, best-effort, one-to-many channel.
#[async_trait]
pub trait BroadcastChannel
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the channel.
    type Error: BroadcastChannelError;

    /// The name of the channel.
    fn name(&self) -> &str;

    /// Publishes a payload to every current subscriber.
    ///
    /// Having no subscribers is not an error; the payload is simply dropped.
    async fn publish(&self, payload: Bytes) -> Result<(), Self::Error>;

    /// Subscribes to the channel, receiving payloads published from now on.
    async fn subscribe(&self) -> Result<BroadcastStream, Self::Error>;
}
