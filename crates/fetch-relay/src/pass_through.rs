use crate::BoxError;
use crate::envelope::is_hop_by_hop;
use crate::error::Error;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HOST};
use http::{Request, Response};
use http_body::Body;
use http_body_util::BodyExt;
use reqwest::Client;
use tracing::debug;
use url::Url;

/// Direct fetch used for allow-listed requests.
///
/// Nothing fetched this way is published or registered.
#[async_trait]
pub trait PassThrough<B>: Send + Sync + 'static
where
    B: Send + 'static,
{
    /// Performs `request` directly and returns the real response.
    async fn fetch(&self, request: Request<B>) -> Result<Response<Bytes>, Error>;
}

/// Fetches allow-listed requests from a fixed origin with `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestPassThrough {
    client: Client,
    origin: Url,
}

impl ReqwestPassThrough {
    /// Create a pass-through fetching from `origin`.
    #[must_use]
    pub fn new(origin: Url) -> Self {
        Self {
            client: Client::new(),
            origin,
        }
    }

    /// The origin requests are fetched from.
    #[must_use]
    pub const fn origin(&self) -> &Url {
        &self.origin
    }

    fn target(&self, uri: &http::Uri) -> Result<Url, Error> {
        let path_and_query = uri
            .path_and_query()
            .map_or_else(|| uri.path(), http::uri::PathAndQuery::as_str);

        Ok(self.origin.join(path_and_query)?)
    }
}

#[async_trait]
impl<B> PassThrough<B> for ReqwestPassThrough
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    async fn fetch(&self, request: Request<B>) -> Result<Response<Bytes>, Error> {
        let (mut parts, body) = request.into_parts();
        let target = self.target(&parts.uri)?;

        debug!(method = %parts.method, %target, "fetching allow-listed request");

        let body = body
            .collect()
            .await
            .map_err(|e| Error::Body(e.into()))?
            .to_bytes();

        parts.headers.remove(HOST);
        parts.headers.remove(CONTENT_LENGTH);

        let mut outbound = self
            .client
            .request(parts.method, target)
            .headers(parts.headers);

        if !body.is_empty() {
            outbound = outbound.body(body);
        }

        let upstream = outbound.send().await?;

        let mut response = Response::builder().status(upstream.status());
        if let Some(headers) = response.headers_mut() {
            headers.extend(
                upstream
                    .headers()
                    .iter()
                    .filter(|(name, _)| !is_hop_by_hop(name))
                    .map(|(name, value)| (name.clone(), value.clone())),
            );
        }

        Ok(response.body(upstream.bytes().await?)?)
    }
}
