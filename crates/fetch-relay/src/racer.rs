use crate::envelope::{ResponseEnvelope, decode};
use crate::registry::{CorrelationId, CorrelationRegistry, PendingResponse};

use std::time::Duration;

use bytes::Bytes;
use http::{Response, StatusCode};
use tokio::time::timeout;
use tracing::debug;

/// Body of the response synthesized when no answer arrives in time.
pub const TIMEOUT_BODY: &str = "Timeout!";

/// How a dispatched request ended.
#[derive(Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The responder answered first.
    Response(ResponseEnvelope),

    /// The deadline won.
    TimedOut,
}

impl Outcome {
    /// Converts the outcome into the response handed to the caller.
    #[must_use]
    pub fn into_response(self) -> Response<Bytes> {
        match self {
            Self::Response(envelope) => decode(envelope),
            Self::TimedOut => timeout_response(),
        }
    }
}

/// The `504` response used when the deadline wins.
#[must_use]
pub fn timeout_response() -> Response<Bytes> {
    let mut response = Response::new(Bytes::from_static(TIMEOUT_BODY.as_bytes()));
    *response.status_mut() = StatusCode::GATEWAY_TIMEOUT;
    response
}

/// Races `pending` against a deadline of `duration`.
///
/// When the deadline fires, the entry is evicted. If eviction finds the entry
/// already gone, a response claimed it in the meantime and that response is
/// used instead of the timeout.
pub async fn race_with_timeout(
    registry: &CorrelationRegistry,
    id: CorrelationId,
    mut pending: PendingResponse,
    duration: Duration,
) -> Outcome {
    if let Ok(result) = timeout(duration, &mut pending).await {
        return settle(id, result.ok());
    }

    debug!(%id, ?duration, "deadline elapsed");
    after_deadline(registry, id, pending).await
}

/// Settles a request whose deadline has fired.
///
/// Evicting and resolving both remove the entry atomically, so exactly one of
/// them wins. A resolver that won has already sent its envelope.
async fn after_deadline(
    registry: &CorrelationRegistry,
    id: CorrelationId,
    pending: PendingResponse,
) -> Outcome {
    if registry.evict(&id) {
        debug!(%id, "no response before the deadline");
        return Outcome::TimedOut;
    }

    debug!(%id, "response claimed the entry as the deadline fired");
    settle(id, pending.await.ok())
}

fn settle(id: CorrelationId, envelope: Option<ResponseEnvelope>) -> Outcome {
    envelope.map_or_else(
        || {
            debug!(%id, "correlation dropped without a response");
            Outcome::TimedOut
        },
        Outcome::Response,
    )
}
