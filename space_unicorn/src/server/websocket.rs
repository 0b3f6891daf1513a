//! Native WebSocket path.
//!
//! The HTTP upgrade is answered immediately with `101 Switching Protocols`;
//! the socket itself is driven on a spawned task once hyper hands over the
//! upgraded stream.

use std::sync::Arc;

use async_tungstenite::{
    tokio::TokioAdapter,
    tungstenite::{
        self,
        handshake::derive_accept_key,
        protocol::{frame::coding::CloseCode, CloseFrame, Role},
    },
    WebSocketReceiver, WebSocketSender, WebSocketStream,
};
use futures::{future::BoxFuture, AsyncRead, AsyncWrite, FutureExt, StreamExt};
use http_body_util::Full;
use hyper::{
    body::Bytes,
    header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE},
    Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;

use crate::{
    context::{Context, Outlet, ReadyState, SharedReadyState},
    error::{CloseError, SendError, ServerError, TransportError},
    handler::{CloseEvent, Handler},
    message::Message,
};

/// Close code reported when the peer's close frame carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Close code reported when the socket dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Answer a WebSocket upgrade request and drive the socket in the background.
///
/// # Errors
///
/// Returns [`ServerError::Upgrade`] if the request is not a valid version 13 handshake.
#[allow(clippy::expect_used)]
pub(crate) fn upgrade<B>(
    mut req: Request<B>,
    handler: Arc<dyn Handler>,
) -> Result<Response<Full<Bytes>>, ServerError> {
    let version = req
        .headers()
        .get(SEC_WEBSOCKET_VERSION)
        .and_then(|value| value.to_str().ok());
    if version != Some("13") {
        return Err(ServerError::Upgrade(format!(
            "unsupported Sec-WebSocket-Version: {version:?}"
        )));
    }

    let accept = req
        .headers()
        .get(SEC_WEBSOCKET_KEY)
        .map(|key| derive_accept_key(key.as_bytes()))
        .ok_or_else(|| ServerError::Upgrade("missing Sec-WebSocket-Key".into()))?;

    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let stream = WebSocketStream::from_raw_socket(
                    TokioAdapter::new(TokioIo::new(upgraded)),
                    Role::Server,
                    None,
                )
                .await;
                drive(stream, handler).await;
            }
            Err(e) => tracing::error!("WebSocket upgrade failed: {e}"),
        }
    });

    Ok(Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(CONNECTION, "upgrade")
        .header(UPGRADE, "websocket")
        .header(SEC_WEBSOCKET_ACCEPT, accept)
        .body(Full::default())
        .expect("valid response"))
}

/// Run one server-side socket until it closes.
///
/// `on_open` fires first, then one `on_message` per data frame in arrival
/// order, and `on_close` exactly once at the end.
pub(crate) async fn drive<T>(ws: WebSocketStream<T>, handler: Arc<dyn Handler>)
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, mut stream) = ws.split();
    let (outbound, outbound_rx) = async_channel::unbounded();
    let state = SharedReadyState::new(ReadyState::Open);

    let writer = tokio::spawn(write_loop(sink, outbound_rx));
    let ctx = Context::with_state(
        WebSocketOutlet {
            outbound: outbound.clone(),
            state: state.clone(),
        },
        state.clone(),
    );

    handler.on_open(&ctx).await;

    let event = read_loop(&mut stream, handler.as_ref(), &ctx).await;
    tracing::info!(code = ?event.code, reason = %event.reason, "WebSocket closed");

    state.set(ReadyState::Closed);
    outbound.close();
    if let Err(e) = writer.await {
        tracing::warn!("WebSocket writer task failed: {e}");
    }

    handler.on_close(event, &ctx).await;
}

async fn read_loop<T>(
    stream: &mut WebSocketReceiver<T>,
    handler: &dyn Handler,
    ctx: &Context,
) -> CloseEvent
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut closing = None;

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(tungstenite::Message::Text(text)) => {
                handler.on_message(Message::Text(text.as_str().to_owned()), ctx).await;
            }
            Ok(tungstenite::Message::Binary(bytes)) => {
                handler.on_message(Message::Binary(bytes), ctx).await;
            }
            Ok(tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_)) => {}
            Ok(tungstenite::Message::Frame(f)) => {
                tracing::warn!("unexpected raw frame: {f:?}");
            }
            Ok(tungstenite::Message::Close(frame)) => {
                // Keep reading so the close reply is flushed.
                closing.get_or_insert_with(|| {
                    frame.map_or_else(
                        || CloseEvent::new(Some(NO_STATUS_RECEIVED), ""),
                        |f| CloseEvent::new(Some(u16::from(f.code)), f.reason.as_str()),
                    )
                });
            }
            Err(e) => {
                if closing.is_none() {
                    tracing::error!("error reading from WebSocket: {e}");
                    handler.on_error(&TransportError::from(e), ctx).await;
                }
                break;
            }
        }
    }

    closing.unwrap_or_else(|| CloseEvent::new(Some(ABNORMAL_CLOSURE), ""))
}

pub(crate) async fn write_loop<T>(
    mut sink: WebSocketSender<T>,
    outbound: async_channel::Receiver<tungstenite::Message>,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    while let Ok(frame) = outbound.recv().await {
        let is_close = matches!(frame, tungstenite::Message::Close(_));
        if let Err(e) = sink.send(frame).await {
            tracing::debug!("WebSocket write failed: {e}");
            break;
        }
        if is_close {
            break;
        }
    }
}

/// Builds the close frame for an application close request.
pub(crate) fn close_frame(code: Option<u16>, reason: Option<String>) -> CloseFrame {
    CloseFrame {
        code: code.map_or(CloseCode::Normal, CloseCode::from),
        reason: reason.unwrap_or_default().into(),
    }
}

struct WebSocketOutlet {
    outbound: async_channel::Sender<tungstenite::Message>,
    state: SharedReadyState,
}

impl Outlet for WebSocketOutlet {
    fn send(&self, message: Message) -> BoxFuture<'_, Result<(), SendError>> {
        async move {
            let frame = match message {
                Message::Text(text) => tungstenite::Message::Text(text.into()),
                Message::Binary(bytes) => tungstenite::Message::Binary(bytes),
            };
            self.outbound.send(frame).await.map_err(|_| SendError::Closed)
        }
        .boxed()
    }

    fn close(
        &self,
        code: Option<u16>,
        reason: Option<String>,
    ) -> BoxFuture<'_, Result<(), CloseError>> {
        async move {
            if !self.state.begin_close() {
                return Ok(());
            }
            self.outbound
                .send(tungstenite::Message::Close(Some(close_frame(code, reason))))
                .await
                .map_err(|_| CloseError)
        }
        .boxed()
    }
}
