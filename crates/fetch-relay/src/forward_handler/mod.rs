mod error;

pub use error::Error;

use crate::envelope::{RequestEnvelope, ResponseEnvelope, is_hop_by_hop};
use crate::responder::RequestHandler;

use std::sync::Arc;

use async_trait::async_trait;
use http::header::{CONTENT_LENGTH, HOST};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use proven_broadcast::{CORRELATION_ID_HEADER, REQUEST_ID_HEADER};
use reqwest::Client;
use tracing::{debug, warn};

/// A request handler that replays relayed requests against a local HTTP server.
#[derive(Clone, Debug)]
pub struct HttpForwardHandler {
    base_url: String,
    client: Arc<Client>,
}

impl HttpForwardHandler {
    /// Create a handler forwarding to `http://localhost:{target_port}`.
    #[must_use]
    pub fn new(target_port: u16) -> Self {
        Self::with_base_url(format!("http://localhost:{target_port}"))
    }

    /// Create a handler forwarding to an explicit scheme and authority.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            client: Arc::new(Client::new()),
        }
    }

    fn target(&self, url: &str) -> Result<String, Error> {
        let uri: Uri = url.parse()?;
        let path_and_query = uri
            .path_and_query()
            .map_or("/", http::uri::PathAndQuery::as_str);

        Ok(format!("{}{}", self.base_url, path_and_query))
    }
}

fn is_forwardable(name: &HeaderName) -> bool {
    ![HOST, CONTENT_LENGTH].contains(name)
        && !is_hop_by_hop(name)
        && name.as_str() != REQUEST_ID_HEADER
        && name.as_str() != CORRELATION_ID_HEADER
}

fn outbound_headers(pairs: Vec<(String, String)>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in pairs {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) if is_forwardable(&name) => {
                headers.append(name, value);
            }
            (Ok(_), Ok(_)) => {}
            _ => warn!(header = %name, "skipping illegal request header"),
        }
    }

    headers
}

#[async_trait]
impl RequestHandler for HttpForwardHandler {
    type Error = Error;

    /// Handle a request by replaying it against the target server.
    async fn handle(&self, request: RequestEnvelope) -> Result<ResponseEnvelope, Error> {
        let method = Method::from_bytes(request.method.as_bytes())?;
        let target = self.target(&request.url)?;

        debug!("forwarding request: {} {}", method, target);

        let mut upstream_request = self
            .client
            .request(method, target)
            .headers(outbound_headers(request.headers));

        if let Some(body) = request.body {
            upstream_request = upstream_request.body(body);
        }

        let upstream = upstream_request.send().await?;

        let mut response = ResponseEnvelope::new(upstream.status());
        for (name, value) in upstream.headers() {
            if is_hop_by_hop(name) {
                continue;
            }

            match value.to_str() {
                Ok(value) => response.headers.push((name.as_str().to_owned(), value.to_owned())),
                Err(_) => warn!(header = %name, "dropping non UTF-8 upstream header"),
            }
        }

        Ok(response.with_body(upstream.bytes().await?))
    }
}
