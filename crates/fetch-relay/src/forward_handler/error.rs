use thiserror::Error;

/// Errors that can occur while forwarding a request upstream.
#[derive(Debug, Error)]
pub enum Error {
    /// The envelope carried an unknown HTTP method.
    #[error(transparent)]
    Method(#[from] http::method::InvalidMethod),

    /// An error occurred during the upstream HTTP request via reqwest.
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// The envelope carried an unparseable URL.
    #[error(transparent)]
    Uri(#[from] http::uri::InvalidUri),
}
