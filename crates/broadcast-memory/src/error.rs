use proven_broadcast::BroadcastChannelError;
use thiserror::Error;

/// An error that can occur when working with in-memory channels.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The channel name is invalid.
    #[error("invalid channel name - must not be empty")]
    InvalidChannelName,
}

impl BroadcastChannelError for Error {}
