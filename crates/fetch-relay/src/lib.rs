//! Relays intercepted HTTP requests over broadcast channels and correlates the answers.
//!
//! Every request that is not allow-listed is encoded into a transport-safe
//! envelope, tagged with a fresh correlation ID, published on the `requests`
//! channel and raced against a deadline. A [`Responder`] on the other side of
//! the medium answers on the `responses` channel, echoing the ID, and the
//! [`Gateway`] hands the matching answer back to the original caller. When no
//! answer arrives in time the caller gets a `504 Timeout!`.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod allow_list;
mod envelope;
mod error;
mod forward_handler;
mod gateway;
mod pass_through;
mod racer;
mod registry;
mod responder;
mod server;
mod transport;

pub use allow_list::*;
pub use envelope::*;
pub use error::*;
pub use forward_handler::{Error as ForwardHandlerError, HttpForwardHandler};
pub use gateway::*;
pub use pass_through::*;
pub use racer::*;
pub use registry::*;
pub use responder::*;
pub use server::*;
pub use transport::*;

type DeserializeError = ciborium::de::Error<std::io::Error>;
type SerializeError = ciborium::ser::Error<std::io::Error>;

/// Boxed error produced by request and response bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
