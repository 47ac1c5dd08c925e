use crate::BoxError;
use crate::allow_list::AllowList;
use crate::envelope::encode;
use crate::error::Error;
use crate::pass_through::PassThrough;
use crate::racer::race_with_timeout;
use crate::registry::CorrelationRegistry;
use crate::transport::BroadcastTransport;

use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body::Body;
use proven_broadcast::{BroadcastChannel, REQUEST_ID_HEADER};
use tracing::{debug, info, warn};

/// Time a request waits for its answer before the caller gets a `504`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Options for creating a new `Gateway`.
pub struct GatewayOptions<C, P>
where
    C: BroadcastChannel,
{
    /// Requests that skip the correlation protocol.
    pub allow_list: AllowList,

    /// Fetcher for allow-listed requests.
    pub pass_through: P,

    /// Channel requests are published on.
    pub requests: C,

    /// Channel responses arrive on.
    pub responses: C,

    /// Deadline for each relayed request.
    pub timeout: Duration,
}

/// Intercepts requests and relays them to whichever responder answers first.
#[derive(Debug)]
pub struct Gateway<C, P>
where
    C: BroadcastChannel,
{
    allow_list: AllowList,
    pass_through: P,
    registry: CorrelationRegistry,
    timeout: Duration,
    transport: BroadcastTransport<C>,
}

impl<C, P> Gateway<C, P>
where
    C: BroadcastChannel,
{
    /// Create a gateway and start listening for responses.
    ///
    /// Responses are matched from this point on, so a gateway never misses the
    /// answer to a request it has already published.
    ///
    /// # Errors
    /// Returns an error if subscribing to the response channel fails.
    pub async fn new(
        GatewayOptions {
            allow_list,
            pass_through,
            requests,
            responses,
            timeout,
        }: GatewayOptions<C, P>,
    ) -> Result<Self, Error> {
        let registry = CorrelationRegistry::new();
        let transport = BroadcastTransport::new(requests, responses);

        let resolver = registry.clone();
        transport
            .on_response_received(move |id, envelope| {
                if !resolver.resolve(&id, envelope) {
                    debug!(%id, "dropping late or duplicate response");
                }
            })
            .await?;

        info!(?timeout, "gateway ready");

        Ok(Self {
            allow_list,
            pass_through,
            registry,
            timeout,
            transport,
        })
    }

    /// Handles one intercepted request.
    ///
    /// Allow-listed requests are fetched directly. Everything else is
    /// published with a fresh correlation ID and answered with the first
    /// matching response, or with `504 Timeout!` once the deadline passes.
    ///
    /// # Errors
    /// Returns an error if the request cannot be encoded. Nothing has been
    /// published or registered in that case.
    pub async fn handle<B>(&self, request: Request<B>) -> Result<Response<Bytes>, Error>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<BoxError>,
        P: PassThrough<B>,
    {
        if self.allow_list.matches(request.uri().path()) {
            return Ok(self.pass_through(request).await);
        }

        let mut envelope = encode(request).await?;

        let (id, pending) = self.registry.register();
        envelope.set_header(REQUEST_ID_HEADER, id.to_string());

        debug!(%id, method = %envelope.method, url = %envelope.url, "relaying request");

        if let Err(e) = self.transport.send_request(envelope).await {
            // The deadline still answers the caller.
            warn!(%id, "failed to publish request: {}", e);
        }

        Ok(race_with_timeout(&self.registry, id, pending, self.timeout)
            .await
            .into_response())
    }

    async fn pass_through<B>(&self, request: Request<B>) -> Response<Bytes>
    where
        B: Send + 'static,
        P: PassThrough<B>,
    {
        let path = request.uri().path().to_owned();

        match self.pass_through.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(%path, "pass-through fetch failed: {}", e);

                let mut response = Response::new(Bytes::from(e.to_string()));
                *response.status_mut() = StatusCode::BAD_GATEWAY;
                response
            }
        }
    }

    /// The registry of in-flight requests.
    pub const fn registry(&self) -> &CorrelationRegistry {
        &self.registry
    }

    /// The deadline applied to relayed requests.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Stops listening for responses.
    ///
    /// Requests still in flight run out their deadlines.
    pub async fn shutdown(&self) {
        info!("gateway shutting down...");

        self.transport.shutdown().await;

        info!("gateway shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::envelope::{RequestEnvelope, ResponseEnvelope};
    use crate::pass_through::ReqwestPassThrough;

    use futures::StreamExt;
    use http_body_util::Full;
    use proven_broadcast::{CORRELATION_ID_HEADER, REQUESTS_CHANNEL, RESPONSES_CHANNEL};
    use proven_broadcast_memory::{MemoryBroadcastChannel, MemoryBroadcastHub};
    use tokio::time::{sleep, timeout};
    use tracing_test::traced_test;
    use url::Url;

    async fn gateway(
        deadline: Duration,
    ) -> (
        Gateway<MemoryBroadcastChannel, ReqwestPassThrough>,
        MemoryBroadcastChannel,
        MemoryBroadcastChannel,
    ) {
        let hub = MemoryBroadcastHub::default();
        let requests = hub.channel(REQUESTS_CHANNEL).unwrap();
        let responses = hub.channel(RESPONSES_CHANNEL).unwrap();

        let gateway = Gateway::new(GatewayOptions {
            allow_list: AllowList::empty(),
            pass_through: ReqwestPassThrough::new(Url::parse("http://127.0.0.1:9").unwrap()),
            requests: requests.clone(),
            responses: responses.clone(),
            timeout: deadline,
        })
        .await
        .unwrap();

        (gateway, requests, responses)
    }

    #[tokio::test]
    #[traced_test]
    async fn test_late_answer_is_logged_and_dropped() {
        let (gateway, requests, responses) = gateway(Duration::from_millis(50)).await;
        let mut published = requests.subscribe().await.unwrap();

        let request = Request::get("http://example.com/slow")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = gateway.handle(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(!logs_contain("dropping late or duplicate response"));

        let payload = timeout(Duration::from_secs(1), published.next())
            .await
            .unwrap()
            .unwrap();
        let id = RequestEnvelope::try_from(payload)
            .unwrap()
            .request_id()
            .unwrap();

        let late = ResponseEnvelope::new(StatusCode::OK)
            .with_header(CORRELATION_ID_HEADER, id.to_string())
            .with_body("too late");
        responses.publish(Bytes::try_from(late).unwrap()).await.unwrap();

        timeout(Duration::from_secs(1), async {
            while !logs_contain("dropping late or duplicate response") {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(gateway.registry().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_gateway_stops_listening() {
        let (gateway, _, responses) = gateway(Duration::from_secs(3)).await;
        assert_eq!(responses.subscriber_count(), 1);

        drop(gateway);

        timeout(Duration::from_secs(1), async {
            while responses.subscriber_count() > 0 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
