//! Transport-safe envelopes for requests and responses.
//!
//! Headers are carried as an ordered list of `(name, value)` pairs. Every pair
//! survives in order, duplicates included, in both directions; single-value
//! lookups match names case-insensitively and take the first occurrence.

use crate::error::Error;
use crate::registry::CorrelationId;
use crate::{BoxError, DeserializeError, SerializeError};

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::BodyExt;
use proven_broadcast::{CORRELATION_ID_HEADER, REQUEST_ID_HEADER};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Ordered header pairs as carried on the wire.
pub type HeaderPairs = Vec<(String, String)>;

/// A request as published on the `requests` channel.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RequestEnvelope {
    /// The absolute URL of the request.
    pub url: String,

    /// The method of the request.
    pub method: String,

    /// The headers of the request.
    #[serde(default)]
    pub headers: HeaderPairs,

    /// The body of the request, absent for bodiless methods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Bytes>,
}

impl RequestEnvelope {
    /// First value of the header `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Replaces every occurrence of `name` with a single value.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        replace_header(&mut self.headers, name, value.into());
    }

    /// The correlation ID embedded by the gateway, if any.
    #[must_use]
    pub fn request_id(&self) -> Option<CorrelationId> {
        self.header(REQUEST_ID_HEADER)?.parse().ok()
    }

    /// Rebuilds an HTTP request from the envelope.
    ///
    /// # Errors
    /// Returns an error if the method, URL or a header is not valid HTTP.
    pub fn into_request(self) -> Result<Request<Bytes>, Error> {
        let mut request = Request::builder()
            .method(Method::from_bytes(self.method.as_bytes())?)
            .uri(self.url.parse::<http::Uri>()?)
            .body(self.body.unwrap_or_default())?;

        let headers = request.headers_mut();
        for (name, value) in self.headers {
            headers.append(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(&value)?,
            );
        }

        Ok(request)
    }
}

impl TryFrom<Bytes> for RequestEnvelope {
    type Error = DeserializeError;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        ciborium::de::from_reader(bytes.as_ref())
    }
}

impl TryFrom<RequestEnvelope> for Bytes {
    type Error = SerializeError;

    fn try_from(envelope: RequestEnvelope) -> Result<Self, Self::Error> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&envelope, &mut bytes)?;
        Ok(Self::from(bytes))
    }
}

/// A response as published on the `responses` channel.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    /// The status code of the response.
    #[serde(default = "default_status")]
    pub status: u16,

    /// The headers of the response.
    #[serde(default)]
    pub headers: HeaderPairs,

    /// The body of the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Bytes>,
}

const fn default_status() -> u16 {
    200
}

impl ResponseEnvelope {
    /// An envelope with the given status, no headers and no body.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status: status.as_u16(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// First value of the header `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Replaces every occurrence of `name` with a single value.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        replace_header(&mut self.headers, name, value.into());
    }

    /// The correlation ID echoed by the responder, if any.
    #[must_use]
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.header(CORRELATION_ID_HEADER)?.parse().ok()
    }

    /// Whether the status lies in the 100–599 range.
    #[must_use]
    pub fn has_valid_status(&self) -> bool {
        (100..=599).contains(&self.status)
    }
}

impl TryFrom<Bytes> for ResponseEnvelope {
    type Error = DeserializeError;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        ciborium::de::from_reader(bytes.as_ref())
    }
}

impl TryFrom<ResponseEnvelope> for Bytes {
    type Error = SerializeError;

    fn try_from(envelope: ResponseEnvelope) -> Result<Self, Self::Error> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&envelope, &mut bytes)?;
        Ok(Self::from(bytes))
    }
}

/// Whether requests with this method never carry a body.
#[must_use]
pub fn is_bodiless(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

/// Captures a live request into an envelope.
///
/// The body is drained only when the method may carry one; for bodiless
/// methods it is dropped unread. Either way the request is consumed.
///
/// # Errors
/// Returns an error if draining the body fails or a header value is not UTF-8.
pub async fn encode<B>(request: Request<B>) -> Result<RequestEnvelope, Error>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let (parts, body) = request.into_parts();
    let headers = header_pairs(&parts.headers)?;

    let body = if is_bodiless(&parts.method) {
        None
    } else {
        let collected = body.collect().await.map_err(|e| Error::Body(e.into()))?;
        Some(collected.to_bytes())
    };

    Ok(RequestEnvelope {
        url: parts.uri.to_string(),
        method: parts.method.to_string(),
        headers,
        body,
    })
}

/// Whether a header only describes a single connection.
///
/// Bodies crossing the relay are always fully buffered, so framing headers
/// like `transfer-encoding` from the far side must never be replayed.
#[must_use]
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Rebuilds a response from an envelope.
///
/// A missing body becomes an empty one. Header pairs that are not legal HTTP
/// or that are hop-by-hop are skipped.
#[must_use]
pub fn decode(envelope: ResponseEnvelope) -> Response<Bytes> {
    let status = StatusCode::from_u16(envelope.status).unwrap_or_else(|_| {
        warn!(status = envelope.status, "response envelope has invalid status");
        StatusCode::BAD_GATEWAY
    });

    let mut response = Response::new(envelope.body.unwrap_or_default());
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in envelope.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), _) if is_hop_by_hop(&name) => {
                debug!(header = %name, "skipping hop-by-hop response header");
            }
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(header = %name, "skipping illegal response header"),
        }
    }

    response
}

/// Flattens a header map into ordered pairs.
///
/// # Errors
/// Returns an error if a value is not UTF-8.
pub fn header_pairs(headers: &HeaderMap) -> Result<HeaderPairs, Error> {
    headers
        .iter()
        .map(|(name, value)| {
            std::str::from_utf8(value.as_bytes())
                .map(|value| (name.as_str().to_owned(), value.to_owned()))
                .map_err(|_| Error::NonUtf8Header(name.as_str().to_owned()))
        })
        .collect()
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn replace_header(headers: &mut HeaderPairs, name: &str, value: String) {
    headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    headers.push((name.to_owned(), value));
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::executor::block_on;
    use http_body_util::{Full, StreamBody};
    use proptest::prelude::*;

    fn request(method: Method, body: &'static str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri("http://example.com/api/data?x=1")
            .header("accept", "text/plain")
            .header("x-multi", "one")
            .header("x-multi", "two")
            .body(Full::new(Bytes::from(body)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_has_no_body() {
        let envelope = encode(request(Method::GET, "ignored")).await.unwrap();

        assert_eq!(envelope.method, "GET");
        assert_eq!(envelope.url, "http://example.com/api/data?x=1");
        assert!(envelope.body.is_none());
    }

    #[tokio::test]
    async fn test_post_with_empty_body_keeps_body() {
        let envelope = encode(request(Method::POST, "")).await.unwrap();

        assert_eq!(envelope.body, Some(Bytes::new()));
    }

    #[tokio::test]
    async fn test_headers_keep_order_and_duplicates() {
        let envelope = encode(request(Method::PUT, "payload")).await.unwrap();

        assert_eq!(
            envelope.headers,
            vec![
                ("accept".to_string(), "text/plain".to_string()),
                ("x-multi".to_string(), "one".to_string()),
                ("x-multi".to_string(), "two".to_string()),
            ]
        );
        assert_eq!(envelope.header("X-Multi"), Some("one"));
    }

    #[tokio::test]
    async fn test_non_utf8_header_rejected() {
        let request = Request::builder()
            .uri("/")
            .header("x-raw", HeaderValue::from_bytes(&[0xFF, 0xFE]).unwrap())
            .body(Full::new(Bytes::new()))
            .unwrap();

        assert!(matches!(
            encode(request).await,
            Err(Error::NonUtf8Header(name)) if name == "x-raw"
        ));
    }

    #[tokio::test]
    async fn test_body_failure_propagates() {
        let frames = futures::stream::iter(vec![Err::<http_body::Frame<Bytes>, _>(
            std::io::Error::other("stream reset"),
        )]);
        let request = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .body(StreamBody::new(frames))
            .unwrap();

        assert!(matches!(encode(request).await, Err(Error::Body(_))));
    }

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut envelope = RequestEnvelope {
            url: "/".to_string(),
            method: "GET".to_string(),
            headers: vec![
                ("X-Request-Id".to_string(), "spoofed".to_string()),
                ("accept".to_string(), "*/*".to_string()),
            ],
            body: None,
        };

        envelope.set_header(REQUEST_ID_HEADER, "real");

        assert_eq!(envelope.header(REQUEST_ID_HEADER), Some("real"));
        assert_eq!(envelope.headers.len(), 2);
    }

    #[test]
    fn test_bodiless_envelope_has_no_body_field() {
        let envelope = RequestEnvelope {
            url: "/".to_string(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
        };

        let bytes = Bytes::try_from(envelope).unwrap();
        let value: ciborium::Value = ciborium::de::from_reader(bytes.as_ref()).unwrap();
        let keys: Vec<_> = value
            .as_map()
            .unwrap()
            .iter()
            .filter_map(|(k, _)| k.as_text().map(str::to_owned))
            .collect();

        assert!(!keys.contains(&"body".to_string()));
    }

    #[test]
    fn test_response_defaults_when_fields_missing() {
        let empty = ciborium::Value::Map(vec![]);
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&empty, &mut bytes).unwrap();

        let envelope = ResponseEnvelope::try_from(Bytes::from(bytes)).unwrap();

        assert_eq!(envelope.status, 200);
        assert!(envelope.headers.is_empty());
        assert!(envelope.body.is_none());
    }

    #[test]
    fn test_decode_missing_body_is_empty() {
        let response = decode(
            ResponseEnvelope::new(StatusCode::NO_CONTENT).with_header("x-done", "yes"),
        );

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()["x-done"], "yes");
        assert!(response.body().is_empty());
    }

    #[test]
    fn test_decode_skips_illegal_headers() {
        let response = decode(
            ResponseEnvelope::new(StatusCode::OK)
                .with_header("bad header", "value")
                .with_header("content-type", "text/plain")
                .with_body("ok"),
        );

        assert_eq!(response.headers().len(), 1);
        assert_eq!(response.headers()["content-type"], "text/plain");
        assert_eq!(response.body(), &Bytes::from("ok"));
    }

    #[test]
    fn test_decode_drops_hop_by_hop_headers() {
        let response = decode(
            ResponseEnvelope::new(StatusCode::OK)
                .with_header("Transfer-Encoding", "chunked")
                .with_header("connection", "keep-alive")
                .with_header("keep-alive", "timeout=5")
                .with_header("x-upstream", "yes")
                .with_body("abcd"),
        );

        assert_eq!(response.headers().len(), 1);
        assert_eq!(response.headers()["x-upstream"], "yes");
        assert_eq!(response.body(), &Bytes::from("abcd"));
    }

    #[test]
    fn test_hop_by_hop_names() {
        assert!(is_hop_by_hop(&http::header::TRANSFER_ENCODING));
        assert!(is_hop_by_hop(&http::header::UPGRADE));
        assert!(is_hop_by_hop(&HeaderName::from_static("keep-alive")));
        assert!(!is_hop_by_hop(&http::header::CONTENT_TYPE));
        assert!(!is_hop_by_hop(&http::header::CONTENT_LENGTH));
    }

    #[test]
    fn test_status_range() {
        assert!(ResponseEnvelope::new(StatusCode::CONTINUE).has_valid_status());
        assert!(
            ResponseEnvelope::new(StatusCode::NETWORK_AUTHENTICATION_REQUIRED).has_valid_status()
        );

        let mut envelope = ResponseEnvelope::new(StatusCode::OK);
        envelope.status = 99;
        assert!(!envelope.has_valid_status());
        envelope.status = 600;
        assert!(!envelope.has_valid_status());
    }

    proptest! {
        #[test]
        fn body_carrying_requests_survive_encoding(
            method in prop::sample::select(
                vec![Method::POST, Method::PUT, Method::PATCH, Method::DELETE],
            ),
            path in "/[a-z0-9]{0,12}",
            values in prop::collection::vec("[a-zA-Z0-9]{1,16}", 0..4),
            body in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let mut builder = Request::builder()
                .method(method.clone())
                .uri(format!("http://example.com{path}"));
            for value in &values {
                builder = builder.header("x-test", value.as_str());
            }
            let original = builder.body(Full::new(Bytes::from(body.clone()))).unwrap();

            let envelope = block_on(encode(original)).unwrap();
            let bytes = Bytes::try_from(envelope).unwrap();
            let rebuilt = RequestEnvelope::try_from(bytes).unwrap().into_request().unwrap();

            prop_assert_eq!(rebuilt.method(), &method);
            prop_assert_eq!(rebuilt.uri().to_string(), format!("http://example.com{path}"));
            let rebuilt_values: Vec<_> = rebuilt
                .headers()
                .get_all("x-test")
                .iter()
                .map(|v| v.to_str().unwrap().to_string())
                .collect();
            prop_assert_eq!(rebuilt_values, values);
            prop_assert_eq!(rebuilt.body().as_ref(), body.as_slice());
        }

        #[test]
        fn bodiless_requests_never_carry_a_body(
            method in prop::sample::select(vec![Method::GET, Method::HEAD]),
            body in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let original = Request::builder()
                .method(method)
                .uri("/")
                .body(Full::new(Bytes::from(body)))
                .unwrap();

            let envelope = block_on(encode(original)).unwrap();
            prop_assert!(envelope.body.is_none());
        }
    }
}
