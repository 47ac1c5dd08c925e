use crate::error::Error;
use crate::gateway::Gateway;
use crate::pass_through::PassThrough;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use http::header::HOST;
use http::uri::PathAndQuery;
use http::{StatusCode, Uri};
use proven_broadcast::{BroadcastChannel, CORRELATION_ID_HEADER};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// Options for creating a new `HttpRelayServer`.
pub struct HttpRelayServerOptions<C, P>
where
    C: BroadcastChannel,
{
    /// The gateway every request is routed through.
    pub gateway: Arc<Gateway<C, P>>,

    /// The port to listen on for incoming requests.
    pub http_port: u16,

    /// Origin used to complete request URIs without a `Host` header.
    pub origin: Url,
}

/// HTTP front feeding every inbound request to a [`Gateway`].
#[derive(Debug)]
pub struct HttpRelayServer<C, P>
where
    C: BroadcastChannel,
{
    gateway: Arc<Gateway<C, P>>,
    http_port: u16,
    origin: Arc<Url>,
}

struct RelayState<C, P>
where
    C: BroadcastChannel,
{
    gateway: Arc<Gateway<C, P>>,
    origin: Arc<Url>,
}

impl<C, P> Clone for RelayState<C, P>
where
    C: BroadcastChannel,
{
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            origin: Arc::clone(&self.origin),
        }
    }
}

impl<C, P> HttpRelayServer<C, P>
where
    C: BroadcastChannel,
    P: PassThrough<Body>,
{
    /// Create a new HTTP relay server.
    pub fn new(
        HttpRelayServerOptions {
            gateway,
            http_port,
            origin,
        }: HttpRelayServerOptions<C, P>,
    ) -> Self {
        Self {
            gateway,
            http_port,
            origin: Arc::new(origin),
        }
    }

    /// Bind the loopback port and serve until `shutdown_token` fires.
    ///
    /// # Errors
    /// Returns an error if the port cannot be bound or the server fails.
    pub async fn start(&self, shutdown_token: CancellationToken) -> Result<(), Error> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.http_port));

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!("failed to bind HTTP listener: {}", e);
            Error::Io("failed to bind HTTP listener", e)
        })?;

        self.serve(listener, shutdown_token).await
    }

    /// Serve on an already bound listener until `shutdown_token` fires.
    ///
    /// # Errors
    /// Returns an error if the server fails.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown_token: CancellationToken,
    ) -> Result<(), Error> {
        let state = RelayState {
            gateway: Arc::clone(&self.gateway),
            origin: Arc::clone(&self.origin),
        };

        let app = Router::new()
            .route("/_health", get(|| async { StatusCode::OK }))
            .fallback(handle_request::<C, P>)
            .with_state(state);

        if let Ok(addr) = listener.local_addr() {
            info!("fetch relay listening on http://{}", addr);
        }

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
            .await
            .map_err(|e| {
                error!("HTTP server error: {}", e);
                Error::Io("HTTP server error", e)
            })?;

        info!("fetch relay stopped");

        Ok(())
    }
}

async fn handle_request<C, P>(State(state): State<RelayState<C, P>>, request: Request) -> Response
where
    C: BroadcastChannel,
    P: PassThrough<Body>,
{
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let response = match state.gateway.handle(absolutize(request, &state.origin)).await {
        Ok(response) => response.map(Body::from),
        Err(e) => {
            warn!(%method, %path, "failed to encode request: {}", e);
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    };

    let correlation_id = response
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");

    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        correlation_id,
        duration_ms = started.elapsed().as_millis(),
        "handled request"
    );

    response
}

/// Completes a relative request URI from the `Host` header, or from `origin`.
fn absolutize<B>(mut request: http::Request<B>, origin: &Url) -> http::Request<B> {
    if request.uri().scheme().is_some() {
        return request;
    }

    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or("/", PathAndQuery::as_str)
        .to_owned();

    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok());

    let absolute = match host {
        Some(host) => format!("http://{host}{path_and_query}"),
        None => match origin.join(&path_and_query) {
            Ok(url) => url.into(),
            Err(e) => {
                debug!(%path_and_query, "cannot complete request URI: {}", e);
                return request;
            }
        },
    };

    match absolute.parse::<Uri>() {
        Ok(uri) => *request.uri_mut() = uri,
        Err(e) => debug!(%absolute, "cannot complete request URI: {}", e),
    }

    request
}
