//! Line-oriented client.

use std::time::Duration;

use anyhow::Result;
use space_unicorn::{client::ClientEvent, http_client::ReqwestHttpClient, Connector, Message};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Which transport the client may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum Transport {
    /// Try WebSocket, fall back to long polling.
    Auto,

    /// WebSocket only.
    Websocket,

    /// Long polling only.
    LongPoll,
}

/// Arguments for the connect command.
#[derive(Debug, clap::Args)]
pub(crate) struct ConnectArgs {
    /// Server URL (http:// or https://)
    #[arg(env = "SPACE_UNICORN_URL", default_value = "http://127.0.0.1:8080/")]
    pub(crate) url: Url,

    /// Transport selection
    #[arg(long, value_enum, default_value_t = Transport::Auto)]
    pub(crate) transport: Transport,

    /// Seconds to wait for a native handshake before falling back
    #[arg(long, default_value = "10")]
    pub(crate) native_timeout: u64,

    /// Per-request HTTP timeout in seconds for long polling; keep it above
    /// the server's poll window
    #[arg(long, env = "SPACE_UNICORN_REQUEST_TIMEOUT")]
    pub(crate) request_timeout: Option<u64>,
}

/// Send stdin lines as text messages and print whatever comes back.
pub(crate) async fn run(args: ConnectArgs, token: CancellationToken) -> Result<()> {
    let mut connector =
        Connector::new(args.url).with_native_timeout(Duration::from_secs(args.native_timeout));
    if let Some(secs) = args.request_timeout {
        let http = ReqwestHttpClient::with_timeout(Duration::from_secs(secs))?;
        connector = connector.with_http_client(http);
    }

    let client = match args.transport {
        Transport::Auto => connector.connect().await?,
        Transport::Websocket => connector.connect_via_websocket().await?,
        Transport::LongPoll => connector.connect_via_long_polling().await?,
    };
    tracing::info!("connected: {client:?}");

    let printer = tokio::spawn(print_events(client.events()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Err(e) = client.send(line).await {
                        eprintln!("send failed: {e}");
                        break;
                    }
                }
                None => break,
            },
        }
    }

    client.close().await;
    printer.await?;
    Ok(())
}

async fn print_events(events: async_channel::Receiver<ClientEvent>) {
    while let Ok(event) = events.recv().await {
        match event {
            ClientEvent::Message(Message::Text(text)) => println!("< {text}"),
            ClientEvent::Message(Message::Binary(bytes)) => println!("< ({} bytes)", bytes.len()),
            ClientEvent::Error(e) => eprintln!("error: {e}"),
            ClientEvent::Close(event) => {
                println!("closed (code {:?}) {}", event.code, event.reason);
                break;
            }
        }
    }
}
