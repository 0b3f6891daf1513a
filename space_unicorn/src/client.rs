//! Client side: transport negotiation and the unified [`Client`] handle.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Connector                          │
//! │                                                          │
//! │  http(s)://… ──► ws(s)://… ──► websocket::connect ──┐    │
//! │                     │ error / timeout               │    │
//! │                     ▼                               ▼    │
//! │               long_poll::connect ─────────────► Client   │
//! │                                                          │
//! │  Client::send ──► transport                              │
//! │  Client::recv ◄── events ◄── reader task / poll loop     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Which transport won is not exposed; both report the same
//! [`ClientEvent`]s and [`ReadyState`] values.

pub mod long_poll;
pub mod websocket;

use core::{fmt, time::Duration};

use url::Url;

use crate::{
    context::{ReadyState, SharedReadyState},
    error::ClientError,
    handler::CloseEvent,
    http_client::{HttpClient, ReqwestHttpClient},
    message::{Message, Payload},
};

/// Default bound on a native handshake before falling back to polling.
pub const DEFAULT_NATIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that happened on a client connection.
#[derive(Debug)]
pub enum ClientEvent {
    /// A message from the server.
    Message(Message),

    /// The connection closed. Emitted at most once, and always last.
    Close(CloseEvent),

    /// The transport failed. A [`ClientEvent::Close`] follows.
    Error(ClientError),
}

/// Negotiates a transport for one server URL.
#[derive(Debug, Clone)]
pub struct Connector<H = ReqwestHttpClient> {
    url: Url,
    http: H,
    native_timeout: Duration,
}

impl Connector {
    /// Create a connector for an `http://` or `https://` endpoint.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            http: ReqwestHttpClient::new(),
            native_timeout: DEFAULT_NATIVE_TIMEOUT,
        }
    }
}

impl<H: HttpClient> Connector<H> {
    /// Use a different HTTP client for the polling transport.
    #[must_use]
    pub fn with_http_client<H2: HttpClient>(self, http: H2) -> Connector<H2> {
        Connector {
            url: self.url,
            http,
            native_timeout: self.native_timeout,
        }
    }

    /// Bound the native handshake; on expiry the connector falls back.
    #[must_use]
    pub const fn with_native_timeout(mut self, timeout: Duration) -> Self {
        self.native_timeout = timeout;
        self
    }

    /// The endpoint URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Try the native WebSocket first, then fall back to long polling.
    ///
    /// A failed or stalled native handshake is not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] only if the polling CONNECT fails.
    pub async fn connect(&self) -> Result<Client<H>, ClientError> {
        match tokio::time::timeout(self.native_timeout, self.connect_via_websocket()).await {
            Ok(Ok(client)) => return Ok(client),
            Ok(Err(e)) => tracing::info!("native WebSocket unavailable, falling back: {e}"),
            Err(_) => tracing::info!(
                "native WebSocket handshake timed out after {:?}, falling back",
                self.native_timeout
            ),
        }

        self.connect_via_long_polling().await
    }

    /// Connect over a native WebSocket only.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] if the URL cannot be rewritten or the
    /// handshake fails.
    pub async fn connect_via_websocket(&self) -> Result<Client<H>, ClientError> {
        let ws_url = websocket_url(&self.url)?;
        tracing::debug!("connecting to {ws_url}");

        let state = SharedReadyState::new(ReadyState::Connecting);
        let (events_tx, events) = async_channel::unbounded();
        let transport = websocket::connect(&ws_url, state.clone(), events_tx).await?;

        Ok(Client {
            transport: Transport::WebSocket(transport),
            state,
            events,
        })
    }

    /// Connect over HTTP long polling only.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] if the CONNECT request fails.
    pub async fn connect_via_long_polling(&self) -> Result<Client<H>, ClientError> {
        let state = SharedReadyState::new(ReadyState::Connecting);
        let (events_tx, events) = async_channel::unbounded();
        let transport =
            long_poll::connect(self.http.clone(), &self.url, state.clone(), events_tx).await?;

        Ok(Client {
            transport: Transport::LongPoll(transport),
            state,
            events,
        })
    }
}

/// Negotiate a connection to `url` with default settings.
///
/// # Errors
///
/// Returns a [`ClientError`] if `url` is invalid or the fallback fails.
pub async fn connect(url: &str) -> Result<Client, ClientError> {
    Connector::new(parse_url(url)?).connect().await
}

/// Connect to `url` over a native WebSocket only.
///
/// # Errors
///
/// Returns a [`ClientError`] if `url` is invalid or the handshake fails.
pub async fn connect_via_websocket(url: &str) -> Result<Client, ClientError> {
    Connector::new(parse_url(url)?).connect_via_websocket().await
}

/// Connect to `url` over HTTP long polling only.
///
/// # Errors
///
/// Returns a [`ClientError`] if `url` is invalid or CONNECT fails.
pub async fn connect_via_long_polling(url: &str) -> Result<Client, ClientError> {
    Connector::new(parse_url(url)?).connect_via_long_polling().await
}

fn parse_url(url: &str) -> Result<Url, ClientError> {
    Url::parse(url).map_err(|e| ClientError::InvalidUrl(format!("{url}: {e}")))
}

/// `http` becomes `ws`; every other scheme becomes `wss`.
fn websocket_url(url: &Url) -> Result<Url, ClientError> {
    let scheme = if url.scheme() == "http" { "ws" } else { "wss" };
    let mut ws_url = url.clone();
    ws_url
        .set_scheme(scheme)
        .map_err(|()| ClientError::InvalidUrl(format!("cannot use {url} as a WebSocket URL")))?;
    Ok(ws_url)
}

enum Transport<H> {
    WebSocket(websocket::WebSocketTransport),
    LongPoll(long_poll::LongPollTransport<H>),
}

/// A connected duplex channel, whichever transport carries it.
pub struct Client<H = ReqwestHttpClient> {
    transport: Transport<H>,
    state: SharedReadyState,
    events: async_channel::Receiver<ClientEvent>,
}

impl<H: HttpClient> Client<H> {
    /// Send text, bytes, or a blob to the server.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] if the connection is not open (or the
    /// server reports it closed), or a transport error.
    pub async fn send(&self, data: impl Into<Payload>) -> Result<(), ClientError> {
        if self.state.get() != ReadyState::Open {
            return Err(ClientError::Closed);
        }

        let message = data.into().normalize().await?;
        match &self.transport {
            Transport::WebSocket(ws) => ws.send(message).await,
            Transport::LongPoll(lp) => lp.send(message).await,
        }
    }

    /// Close the connection.
    ///
    /// A WebSocket sends a normal close frame and reports
    /// [`ClientEvent::Close`] once the server answers. Long polling simply
    /// stops polling; the server evicts the record when it goes idle.
    pub async fn close(&self) {
        match &self.transport {
            Transport::WebSocket(ws) => ws.close().await,
            Transport::LongPoll(lp) => lp.close().await,
        }
    }

    /// The current readiness, numbered like a browser `WebSocket`.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    /// Wait for the next event. `None` once the connection is closed and
    /// every event has been taken.
    pub async fn recv(&self) -> Option<ClientEvent> {
        self.events.recv().await.ok()
    }

    /// A handle on the event stream, for use from another task.
    #[must_use]
    pub fn events(&self) -> async_channel::Receiver<ClientEvent> {
        self.events.clone()
    }
}

impl<H> fmt::Debug for Client<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transport = match self.transport {
            Transport::WebSocket(_) => "websocket",
            Transport::LongPoll(_) => "long-poll",
        };
        f.debug_struct("Client")
            .field("transport", &transport)
            .field("ready_state", &self.state.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testresult::TestResult;
    use tokio::{io::AsyncReadExt, net::TcpListener};

    #[test]
    fn scheme_rewrite() -> TestResult {
        let http = Url::parse("http://localhost:8080/su?x=1")?;
        assert_eq!(websocket_url(&http)?.as_str(), "ws://localhost:8080/su?x=1");

        let https = Url::parse("https://example.com/su")?;
        assert_eq!(websocket_url(&https)?.as_str(), "wss://example.com/su");
        Ok(())
    }

    #[test]
    fn non_web_urls_are_rejected() {
        let url = Url::parse("mailto:someone@example.com").expect("url");
        assert!(matches!(websocket_url(&url), Err(ClientError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn invalid_url_is_reported() {
        assert!(matches!(connect("not a url").await, Err(ClientError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn secure_urls_start_a_tls_handshake() -> TestResult {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("https://{}/", listener.local_addr()?);
        let attempt = tokio::spawn(async move { connect_via_websocket(&url).await });

        let (mut socket, _) = listener.accept().await?;
        let mut record = [0u8; 3];
        socket.read_exact(&mut record).await?;
        // A TLS handshake record (ClientHello), protocol version 3.x.
        assert_eq!(record[..2], [0x16, 0x03]);

        drop(socket);
        assert!(matches!(attempt.await?, Err(ClientError::WebSocket(_))));
        Ok(())
    }
}
