//! CLI binary running a fetch relay with a local forwarding responder.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use proven_broadcast::{REQUESTS_CHANNEL, RESPONSES_CHANNEL};
use proven_broadcast_memory::{DEFAULT_CAPACITY, MemoryBroadcastHub, MemoryBroadcastOptions};
use proven_fetch_relay::{
    AllowList, DEFAULT_ALLOWED_PATHS, Gateway, GatewayOptions, HttpForwardHandler,
    HttpRelayServer, HttpRelayServerOptions, ReqwestPassThrough, Responder, ResponderOptions,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Broadcast medium error
    #[error(transparent)]
    Broadcast(#[from] proven_broadcast_memory::Error),

    /// Fetch relay library error
    #[error(transparent)]
    Relay(#[from] proven_fetch_relay::Error),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// File extension served directly without relaying (repeatable)
    #[arg(
        long = "allow-extension",
        env = "PROVEN_FETCH_RELAY_ALLOW_EXTENSIONS",
        value_delimiter = ','
    )]
    allow_extensions: Vec<String>,

    /// Exact path served directly without relaying (repeatable)
    #[arg(
        long = "allow-path",
        default_values = DEFAULT_ALLOWED_PATHS,
        env = "PROVEN_FETCH_RELAY_ALLOW_PATHS",
        value_delimiter = ','
    )]
    allow_paths: Vec<String>,

    /// Capacity of each in-memory broadcast channel
    #[arg(long, default_value_t = DEFAULT_CAPACITY, env = "PROVEN_FETCH_RELAY_CHANNEL_CAPACITY")]
    channel_capacity: usize,

    /// Port to listen on for incoming requests
    #[arg(long, default_value_t = 8080, env = "PROVEN_FETCH_RELAY_HTTP_PORT")]
    http_port: u16,

    /// Origin allow-listed requests are fetched from
    #[arg(
        long,
        default_value = "http://localhost:3000",
        env = "PROVEN_FETCH_RELAY_ORIGIN"
    )]
    origin: Url,

    /// Port of the local server relayed requests are forwarded to
    #[arg(long, default_value_t = 3000, env = "PROVEN_FETCH_RELAY_TARGET_PORT")]
    target_port: u16,

    /// Milliseconds to wait for a relayed response
    #[arg(long, default_value_t = 3000, env = "PROVEN_FETCH_RELAY_TIMEOUT_MS")]
    timeout_ms: u64,
}

impl Args {
    fn allow_list(&self) -> AllowList {
        let with_paths = self
            .allow_paths
            .iter()
            .fold(AllowList::empty(), |list, path| list.with_path(path.as_str()));

        self.allow_extensions
            .iter()
            .fold(with_paths, |list, extension| list.with_extension(extension))
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Create shared shutdown token
    let shutdown_token = CancellationToken::new();

    // Set up signal handlers
    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        if cfg!(unix) {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler failed");
            let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler failed");

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        } else {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received interrupt signal");
        }

        info!("Shutting down");
        signal_shutdown_token.cancel();
    });

    let hub = MemoryBroadcastHub::new(MemoryBroadcastOptions {
        capacity: args.channel_capacity,
    });
    let requests = hub.channel(REQUESTS_CHANNEL)?;
    let responses = hub.channel(RESPONSES_CHANNEL)?;

    let responder = Responder::new(ResponderOptions {
        handler: HttpForwardHandler::new(args.target_port),
        requests: requests.clone(),
        responses: responses.clone(),
    });
    responder.start().await?;

    let gateway = Arc::new(
        Gateway::new(GatewayOptions {
            allow_list: args.allow_list(),
            pass_through: ReqwestPassThrough::new(args.origin.clone()),
            requests,
            responses,
            timeout: Duration::from_millis(args.timeout_ms),
        })
        .await?,
    );

    let server = HttpRelayServer::new(HttpRelayServerOptions {
        gateway: Arc::clone(&gateway),
        http_port: args.http_port,
        origin: args.origin,
    });

    let served = server.start(shutdown_token).await;

    responder.shutdown().await;
    gateway.shutdown().await;

    served.map_err(Error::Relay)
}
