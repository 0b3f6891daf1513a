//! Native WebSocket client transport.

use async_tungstenite::{
    tokio::{connect_async, ConnectStream},
    tungstenite, WebSocketReceiver,
};
use futures::StreamExt;
use url::Url;

use super::ClientEvent;
use crate::{
    context::{ReadyState, SharedReadyState},
    error::ClientError,
    handler::CloseEvent,
    message::Message,
    server::websocket::{close_frame, write_loop, ABNORMAL_CLOSURE, NO_STATUS_RECEIVED},
};

/// Code sent by [`Client::close`](super::Client::close).
const NORMAL_CLOSURE: u16 = 1000;

/// Outbound half of a client WebSocket.
#[derive(Debug)]
pub struct WebSocketTransport {
    outbound: async_channel::Sender<tungstenite::Message>,
    state: SharedReadyState,
}

/// Complete the handshake, then spawn the reader and writer tasks.
pub(crate) async fn connect(
    url: &Url,
    state: SharedReadyState,
    events: async_channel::Sender<ClientEvent>,
) -> Result<WebSocketTransport, ClientError> {
    let (ws, _response) = connect_async(url.as_str()).await?;
    tracing::info!("WebSocket connected to {url}");

    let (sink, stream) = ws.split();
    let (outbound, outbound_rx) = async_channel::unbounded();

    state.set(ReadyState::Open);
    tokio::spawn(write_loop(sink, outbound_rx));
    tokio::spawn(read_loop(stream, state.clone(), outbound.clone(), events));

    Ok(WebSocketTransport { outbound, state })
}

impl WebSocketTransport {
    pub(crate) async fn send(&self, message: Message) -> Result<(), ClientError> {
        let frame = match message {
            Message::Text(text) => tungstenite::Message::Text(text.into()),
            Message::Binary(bytes) => tungstenite::Message::Binary(bytes),
        };
        self.outbound.send(frame).await.map_err(|_| ClientError::Closed)
    }

    pub(crate) async fn close(&self) {
        if !self.state.begin_close() {
            return;
        }

        let frame = tungstenite::Message::Close(Some(close_frame(Some(NORMAL_CLOSURE), None)));
        if self.outbound.send(frame).await.is_err() {
            tracing::debug!("WebSocket writer already stopped");
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.outbound.close();
    }
}

async fn read_loop(
    mut stream: WebSocketReceiver<ConnectStream>,
    state: SharedReadyState,
    outbound: async_channel::Sender<tungstenite::Message>,
    events: async_channel::Sender<ClientEvent>,
) {
    let mut closing = None;

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(tungstenite::Message::Text(text)) => {
                emit(&events, ClientEvent::Message(Message::Text(text.as_str().to_owned()))).await;
            }
            Ok(tungstenite::Message::Binary(bytes)) => {
                emit(&events, ClientEvent::Message(Message::Binary(bytes))).await;
            }
            Ok(tungstenite::Message::Close(frame)) => {
                state.begin_close();
                closing.get_or_insert_with(|| {
                    frame.map_or_else(
                        || CloseEvent::new(Some(NO_STATUS_RECEIVED), ""),
                        |f| CloseEvent::new(Some(u16::from(f.code)), f.reason.as_str()),
                    )
                });
            }
            Ok(_) => {}
            Err(e) => {
                if closing.is_none() {
                    tracing::error!("error reading from WebSocket: {e}");
                    emit(&events, ClientEvent::Error(ClientError::WebSocket(e))).await;
                }
                break;
            }
        }
    }

    outbound.close();
    state.set(ReadyState::Closed);

    let event = closing.unwrap_or_else(|| CloseEvent::new(Some(ABNORMAL_CLOSURE), ""));
    tracing::info!(code = ?event.code, reason = %event.reason, "WebSocket closed");
    emit(&events, ClientEvent::Close(event)).await;
    events.close();
}

async fn emit(events: &async_channel::Sender<ClientEvent>, event: ClientEvent) {
    if events.send(event).await.is_err() {
        tracing::debug!("client event receiver dropped");
    }
}
