use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::error::Error;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::StatusCode;
use proven_broadcast::{BroadcastChannel, CORRELATION_ID_HEADER, REQUEST_ID_HEADER};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Produces an answer for a relayed request.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Error returned when no answer can be produced.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Handle a single request.
    async fn handle(&self, request: RequestEnvelope) -> Result<ResponseEnvelope, Self::Error>;
}

/// Options for creating a new `Responder`.
pub struct ResponderOptions<C, H>
where
    C: BroadcastChannel,
    H: RequestHandler,
{
    /// The handler answering requests.
    pub handler: H,

    /// Channel requests arrive on.
    pub requests: C,

    /// Channel answers are published on.
    pub responses: C,
}

/// Answers requests from the `requests` channel on the `responses` channel.
pub struct Responder<C, H>
where
    C: BroadcastChannel,
    H: RequestHandler,
{
    /// The handler answering requests.
    handler: Arc<H>,

    /// Channel requests arrive on.
    requests: C,

    /// Channel answers are published on.
    responses: C,

    /// The shutdown token.
    shutdown_token: CancellationToken,

    /// The task tracker.
    task_tracker: TaskTracker,
}

impl<C, H> Clone for Responder<C, H>
where
    C: BroadcastChannel,
    H: RequestHandler,
{
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            requests: self.requests.clone(),
            responses: self.responses.clone(),
            shutdown_token: self.shutdown_token.clone(),
            task_tracker: self.task_tracker.clone(),
        }
    }
}

impl<C, H> fmt::Debug for Responder<C, H>
where
    C: BroadcastChannel,
    H: RequestHandler,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("requests", &self.requests.name())
            .field("responses", &self.responses.name())
            .finish_non_exhaustive()
    }
}

impl<C, H> Responder<C, H>
where
    C: BroadcastChannel,
    H: RequestHandler,
{
    /// Create a new responder.
    pub fn new(
        ResponderOptions {
            handler,
            requests,
            responses,
        }: ResponderOptions<C, H>,
    ) -> Self {
        Self {
            handler: Arc::new(handler),
            requests,
            responses,
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Start answering requests.
    ///
    /// Every request is handled in its own task.
    ///
    /// # Errors
    /// Returns an error if the responder was already started or subscribing fails.
    pub async fn start(&self) -> Result<(), Error> {
        if self.task_tracker.is_closed() {
            return Err(Error::AlreadyStarted);
        }

        info!("starting responder...");

        let mut stream = self.requests.subscribe().await.map_err(|e| {
            error!("responder subscription failed: {}", e);
            Error::Subscribe(e.to_string())
        })?;

        let handler = Arc::clone(&self.handler);
        let responses = self.responses.clone();
        let shutdown_token = self.shutdown_token.clone();
        let task_tracker = self.task_tracker.clone();

        self.task_tracker.spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown_token.cancelled() => {
                        break;
                    }
                    message = stream.next() => {
                        let Some(payload) = message else {
                            warn!("request channel closed");
                            break;
                        };

                        let handler = Arc::clone(&handler);
                        let responses = responses.clone();
                        task_tracker.spawn(async move {
                            respond(handler.as_ref(), &responses, payload).await;
                        });
                    }
                }
            }
        });

        self.task_tracker.close();

        info!("responder started");

        Ok(())
    }

    /// Stop answering and wait for in-flight requests to finish.
    pub async fn shutdown(&self) {
        info!("responder shutting down...");

        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("responder shutdown");
    }

    /// Wait for the responder to exit.
    pub async fn wait(&self) {
        self.task_tracker.wait().await;
    }
}

async fn respond<C, H>(handler: &H, responses: &C, payload: Bytes)
where
    C: BroadcastChannel,
    H: RequestHandler,
{
    let request = match RequestEnvelope::try_from(payload) {
        Ok(request) => request,
        Err(e) => {
            warn!("dropping undecodable request: {}", e);
            return;
        }
    };

    let Some(id) = request.request_id() else {
        debug!("dropping request without valid {}", REQUEST_ID_HEADER);
        return;
    };

    debug!(%id, method = %request.method, url = %request.url, "handling request");

    let mut response = match handler.handle(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(%id, "handler failed: {}", e);
            ResponseEnvelope::new(StatusCode::INTERNAL_SERVER_ERROR).with_body(e.to_string())
        }
    };
    response.set_header(CORRELATION_ID_HEADER, id.to_string());

    let payload = match Bytes::try_from(response) {
        Ok(payload) => payload,
        Err(e) => {
            error!(%id, "failed to serialize response: {}", e);
            return;
        }
    };

    if let Err(e) = responses.publish(payload).await {
        warn!(%id, "failed to publish response: {}", e);
    }
}
