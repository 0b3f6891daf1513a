//! Echo server.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use futures::{future::BoxFuture, FutureExt};
use space_unicorn::{
    handler::CloseEvent,
    server::serve,
    store::{StoreConfig, DEFAULT_IDLE_TIMEOUT, DEFAULT_POLL_WINDOW},
    ConnectionStore, Context, Dispatcher, Handler, Message, DEFAULT_MAX_BODY_SIZE,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Arguments for the serve command.
#[derive(Debug, clap::Args)]
pub(crate) struct ServeArgs {
    /// Socket address to bind to
    #[arg(short, long, env = "SPACE_UNICORN_ADDR", default_value = "0.0.0.0:8080")]
    pub(crate) socket: SocketAddr,

    /// Long-poll wait window in milliseconds
    #[arg(
        long,
        env = "SPACE_UNICORN_POLL_WINDOW_MS",
        default_value_t = millis(DEFAULT_POLL_WINDOW)
    )]
    pub(crate) poll_window_ms: u64,

    /// Idle eviction window for polling connections in milliseconds
    #[arg(
        long,
        env = "SPACE_UNICORN_IDLE_TIMEOUT_MS",
        default_value_t = millis(DEFAULT_IDLE_TIMEOUT)
    )]
    pub(crate) idle_timeout_ms: u64,

    /// Maximum SEND body size in bytes
    #[arg(long, env = "SPACE_UNICORN_MAX_BODY_SIZE", default_value_t = DEFAULT_MAX_BODY_SIZE)]
    pub(crate) max_body_size: usize,

    /// Refuse native WebSocket upgrades so every client falls back to polling
    #[arg(long, env = "SPACE_UNICORN_NO_WEBSOCKET", default_value_t = false)]
    pub(crate) no_websocket: bool,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Run the echo server until `token` is cancelled.
pub(crate) async fn run(args: ServeArgs, token: CancellationToken) -> Result<()> {
    let config = StoreConfig::default()
        .with_poll_window(Duration::from_millis(args.poll_window_ms))
        .with_idle_timeout(Duration::from_millis(args.idle_timeout_ms));
    let store = ConnectionStore::with_config(config);

    let dispatcher = Dispatcher::new(store.clone(), Arc::new(Echo))
        .with_native_upgrade(!args.no_websocket)
        .with_max_body_size(args.max_body_size);

    let listener = TcpListener::bind(args.socket).await?;
    tracing::info!("Space Unicorn echo server listening on {}", listener.local_addr()?);
    if args.no_websocket {
        tracing::info!("native WebSocket upgrades disabled");
    }

    serve(listener, dispatcher, token).await;

    tracing::info!("closing {} polling connection(s)", store.len().await);
    store.shutdown().await;
    Ok(())
}

/// Sends every message straight back.
struct Echo;

impl Handler for Echo {
    fn on_open<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, ()> {
        async move { tracing::info!("connection opened: {ctx:?}") }.boxed()
    }

    fn on_message<'a>(&'a self, message: Message, ctx: &'a Context) -> BoxFuture<'a, ()> {
        async move {
            tracing::debug!(len = message.len(), text = message.is_text(), "echoing");
            if let Err(e) = ctx.send(message).await {
                tracing::warn!("echo failed: {e}");
            }
        }
        .boxed()
    }

    fn on_close<'a>(&'a self, event: CloseEvent, _ctx: &'a Context) -> BoxFuture<'a, ()> {
        async move {
            tracing::info!(code = ?event.code, reason = %event.reason, "connection closed");
        }
        .boxed()
    }
}
