//! Hyper-based request dispatcher.
//!
//! Every inbound request on the Space Unicorn endpoint is routed here:
//!
//! | Request                              | Handling                              |
//! |--------------------------------------|---------------------------------------|
//! | `Upgrade: websocket`                 | native upgrade ([`websocket`])        |
//! | `SpaceUnicorn-Type: CONNECT`         | [`ConnectionStore::register`]         |
//! | `SpaceUnicorn-Type: POLLING`         | [`ConnectionStore::pull`]             |
//! | `SpaceUnicorn-Type: SEND`            | [`ConnectionStore::deliver_inbound`]  |
//! | anything else                        | 400 `"Invalid Request"`               |
//!
//! Both paths end up in the same [`Handler`], so the application never sees
//! which transport a peer is on.

pub mod websocket;

use core::fmt;
use std::{net::SocketAddr, sync::Arc};

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::{
    body::{Body, Bytes},
    header::{CONTENT_TYPE, UPGRADE},
    server::conn::http1,
    service::service_fn,
    Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::{net::TcpListener, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{
    connection_id::ConnectionId,
    envelope::{Ack, INVALID_REQUEST},
    error::ServerError,
    handler::Handler,
    message::Message,
    multipart,
    store::ConnectionStore,
    CONN_ID_HEADER, DEFAULT_MAX_BODY_SIZE, TYPE_HEADER,
};

/// Polling sub-operation named by the `SpaceUnicorn-Type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// Open a polling connection.
    Connect,

    /// Long-poll for queued messages.
    Polling,

    /// Deliver one message to the server.
    Send,
}

impl RequestType {
    /// Header value for this request type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RequestType::Connect => "CONNECT",
            RequestType::Polling => "POLLING",
            RequestType::Send => "SEND",
        }
    }

    /// Parse a header value. Matching is exact.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CONNECT" => Some(RequestType::Connect),
            "POLLING" => Some(RequestType::Polling),
            "SEND" => Some(RequestType::Send),
            _ => None,
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routes requests to the native upgrade or to the connection store.
///
/// Cheap to clone; clones share the store and handler.
#[derive(Clone)]
pub struct Dispatcher {
    store: ConnectionStore,
    handler: Arc<dyn Handler>,
    native_upgrade: bool,
    max_body_size: usize,
}

impl Dispatcher {
    /// Create a dispatcher over `store`, driving `handler` for every connection.
    #[must_use]
    pub fn new(store: ConnectionStore, handler: Arc<dyn Handler>) -> Self {
        Self {
            store,
            handler,
            native_upgrade: true,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Accept or refuse native WebSocket upgrades.
    ///
    /// When refused, upgrade requests are treated like any other request
    /// without a valid type header, so clients fall back to polling.
    #[must_use]
    pub const fn with_native_upgrade(mut self, enabled: bool) -> Self {
        self.native_upgrade = enabled;
        self
    }

    /// Set the maximum SEND body size.
    #[must_use]
    pub const fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Access the connection store.
    #[must_use]
    pub const fn store(&self) -> &ConnectionStore {
        &self.store
    }

    /// Route one request.
    ///
    /// Unknown connections and malformed requests become 400 responses.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Upgrade`] if a native upgrade was requested but
    /// no upgrade response could be produced.
    pub async fn handle<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, ServerError>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        tracing::debug!("Space Unicorn: {} {}", req.method(), req.uri().path());

        if self.native_upgrade && is_upgrade_request(&req) {
            return websocket::upgrade(req, self.handler.clone());
        }

        let request_type = req
            .headers()
            .get(TYPE_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(RequestType::parse);

        let response = match request_type {
            Some(RequestType::Connect) => Ok(self.handle_connect().await),
            Some(RequestType::Polling) => match extract_conn_id(&req) {
                Ok(conn_id) => self.handle_polling(conn_id).await,
                Err(e) => Err(e),
            },
            Some(RequestType::Send) => self.handle_send(req).await,
            None => Err(ServerError::InvalidType),
        };

        match response {
            Ok(resp) => Ok(resp),
            Err(e @ ServerError::Upgrade(_)) => Err(e),
            Err(e) => {
                tracing::debug!("rejected request: {e}");
                Ok(rejection_response(&e))
            }
        }
    }

    async fn handle_connect(&self) -> Response<Full<Bytes>> {
        let conn_id = self.store.register(self.handler.clone()).await;
        json_response(StatusCode::OK, &Ack::connected(conn_id.to_string()))
    }

    #[allow(clippy::expect_used)]
    async fn handle_polling(
        &self,
        conn_id: ConnectionId,
    ) -> Result<Response<Full<Bytes>>, ServerError> {
        let batch = self
            .store
            .pull(&conn_id)
            .await
            .wait()
            .await
            .ok_or(ServerError::ConnectionNotFound)?;

        tracing::debug!(%conn_id, count = batch.len(), "POLLING: delivering batch");

        let encoded = multipart::encode(&batch);
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, encoded.content_type)
            .body(Full::new(Bytes::from(encoded.body)))
            .expect("valid response"))
    }

    async fn handle_send<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, ServerError>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let conn_id = extract_conn_id(&req)?;
        let is_text = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/plain"));

        let body = read_body(req, self.max_body_size).await?;
        let message = if is_text {
            let text = String::from_utf8(body.to_vec()).map_err(|_| ServerError::InvalidText)?;
            Message::Text(text)
        } else {
            Message::Binary(body)
        };

        if !self.store.deliver_inbound(&conn_id, message).await {
            return Err(ServerError::ConnectionNotFound);
        }

        Ok(json_response(StatusCode::OK, &Ack::ok()))
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("store", &self.store)
            .field("native_upgrade", &self.native_upgrade)
            .field("max_body_size", &self.max_body_size)
            .finish_non_exhaustive()
    }
}

/// Accept TCP connections and serve them with `dispatcher` until `cancel` fires.
///
/// Upgraded WebSocket connections run on their own tasks and outlive the
/// HTTP connection that carried the upgrade.
pub async fn serve(listener: TcpListener, dispatcher: Dispatcher, cancel: CancellationToken) {
    let mut conns = JoinSet::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::info!("accept loop canceled");
                break;
            }
            res = listener.accept() => {
                match res {
                    Ok((stream, addr)) => {
                        tracing::debug!("new TCP connection from {addr}");
                        let dispatcher = dispatcher.clone();
                        conns.spawn(serve_connection(stream, addr, dispatcher));
                    }
                    Err(e) => tracing::error!("accept error: {e}"),
                }
            }
        }
    }

    conns.shutdown().await;
}

async fn serve_connection(stream: tokio::net::TcpStream, addr: SocketAddr, dispatcher: Dispatcher) {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req| {
        let dispatcher = dispatcher.clone();
        async move { dispatcher.handle(req).await }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades()
        .await
    {
        tracing::debug!("HTTP connection from {addr} ended with error: {e}");
    }
}

fn is_upgrade_request<B>(req: &Request<B>) -> bool {
    req.headers()
        .get(UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

/// Extract the connection ID from the `SpaceUnicorn-ConnID` header.
///
/// A missing header is malformed; a present but unparseable one cannot name
/// a live connection.
fn extract_conn_id<B>(req: &Request<B>) -> Result<ConnectionId, ServerError> {
    let header_value = req
        .headers()
        .get(CONN_ID_HEADER)
        .ok_or(ServerError::InvalidConnectionId)?;

    let raw = header_value
        .to_str()
        .map_err(|_| ServerError::ConnectionNotFound)?;

    raw.parse().map_err(|e| {
        tracing::debug!("unparseable connection ID {raw:?}: {e}");
        ServerError::ConnectionNotFound
    })
}

/// Read the request body, refusing more than `max_size` bytes.
async fn read_body<B>(req: Request<B>, max_size: usize) -> Result<Bytes, ServerError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let collected = Limited::new(req.into_body(), max_size)
        .collect()
        .await
        .map_err(|e| {
            if e.is::<LengthLimitError>() {
                ServerError::BodyTooLarge
            } else {
                ServerError::BodyRead(e.to_string())
            }
        })?;

    Ok(collected.to_bytes())
}

fn rejection_response(err: &ServerError) -> Response<Full<Bytes>> {
    match err {
        ServerError::ConnectionNotFound => json_response(StatusCode::BAD_REQUEST, &Ack::closed()),
        _ => json_response(StatusCode::BAD_REQUEST, &INVALID_REQUEST),
    }
}

#[allow(clippy::expect_used)]
fn json_response<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let bytes = serde_json::to_vec(body).expect("envelopes always serialize");
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(bytes)))
        .expect("valid response")
}
