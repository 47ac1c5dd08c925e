use crate::{BoxError, SerializeError};

use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Already started.
    #[error("already started")]
    AlreadyStarted,

    /// Draining a request or response body failed.
    #[error("failed to read body: {0}")]
    Body(#[source] BoxError),

    /// A header name is not a legal HTTP header name.
    #[error(transparent)]
    HeaderName(#[from] http::header::InvalidHeaderName),

    /// A header value is not a legal HTTP header value.
    #[error(transparent)]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    /// A request or response could not be assembled.
    #[error(transparent)]
    Http(#[from] http::Error),

    /// An envelope carried an unknown HTTP method.
    #[error(transparent)]
    Method(#[from] http::method::InvalidMethod),

    /// A header value cannot be carried in an envelope.
    #[error("header {0} is not valid UTF-8")]
    NonUtf8Header(String),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// The direct fetch of an allow-listed request failed.
    #[error("pass-through fetch failed: {0}")]
    PassThrough(#[from] reqwest::Error),

    /// Publishing to a broadcast channel failed.
    #[error("publish error: {0}")]
    Publish(String),

    /// An envelope could not be serialized.
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] SerializeError),

    /// Subscribing to a broadcast channel failed.
    #[error("subscribe error: {0}")]
    Subscribe(String),

    /// An envelope carried an unparseable URI.
    #[error(transparent)]
    Uri(#[from] http::uri::InvalidUri),

    /// A URL could not be built.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
