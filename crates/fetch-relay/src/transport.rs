use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::error::Error;
use crate::registry::CorrelationId;

use bytes::Bytes;
use futures::StreamExt;
use proven_broadcast::{BroadcastChannel, CORRELATION_ID_HEADER};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, debug, info, warn};

/// Request/response plumbing over a pair of broadcast channels.
///
/// Requests go out on one channel and answers come back on the other. Nothing
/// is acknowledged or retried; an answer that never shows up is the
/// caller's deadline to deal with.
#[derive(Debug)]
pub struct BroadcastTransport<C>
where
    C: BroadcastChannel,
{
    /// Outbound channel.
    requests: C,

    /// Inbound channel.
    responses: C,

    /// The shutdown token.
    shutdown_token: CancellationToken,

    /// The task tracker.
    task_tracker: TaskTracker,
}

impl<C> BroadcastTransport<C>
where
    C: BroadcastChannel,
{
    /// Create a new transport over the given channels.
    pub fn new(requests: C, responses: C) -> Self {
        Self {
            requests,
            responses,
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Publishes a request envelope.
    ///
    /// # Errors
    /// Returns an error if the envelope cannot be serialized or the channel refuses it.
    pub async fn send_request(&self, envelope: RequestEnvelope) -> Result<(), Error> {
        let payload = Bytes::try_from(envelope)?;

        self.requests
            .publish(payload)
            .await
            .map_err(|e| Error::Publish(e.to_string()))
    }

    /// Calls `handler` for every well-formed response until shutdown.
    ///
    /// Payloads that fail to decode, carry a status outside 100–599 or lack a
    /// valid correlation header are dropped.
    ///
    /// # Errors
    /// Returns an error if subscribing to the response channel fails.
    pub async fn on_response_received<F>(&self, handler: F) -> Result<(), Error>
    where
        F: Fn(CorrelationId, ResponseEnvelope) + Send + Sync + 'static,
    {
        let mut stream = self
            .responses
            .subscribe()
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;

        let channel = self.responses.name().to_owned();
        let shutdown_token = self.shutdown_token.clone();

        info!(%channel, "listening for responses");

        self.task_tracker.spawn(
            async move {
                loop {
                    tokio::select! {
                        () = shutdown_token.cancelled() => {
                            break;
                        }
                        message = stream.next() => {
                            let Some(payload) = message else {
                                debug!(%channel, "response channel closed");
                                break;
                            };

                            if let Some((id, envelope)) = parse_response(payload) {
                                handler(id, envelope);
                            }
                        }
                    }
                }
            }
            .instrument(Span::current()),
        );

        Ok(())
    }

    /// Stops listening and waits for the listener to exit.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }
}

impl<C> Drop for BroadcastTransport<C>
where
    C: BroadcastChannel,
{
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

fn parse_response(payload: Bytes) -> Option<(CorrelationId, ResponseEnvelope)> {
    let envelope = match ResponseEnvelope::try_from(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("dropping undecodable response: {}", e);
            return None;
        }
    };

    if !envelope.has_valid_status() {
        warn!(status = envelope.status, "dropping response with invalid status");
        return None;
    }

    let Some(id) = envelope.correlation_id() else {
        debug!("dropping response without valid {}", CORRELATION_ID_HEADER);
        return None;
    };

    Some((id, envelope))
}
