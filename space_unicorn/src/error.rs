//! Error types.

use std::io;

use async_tungstenite::tungstenite;
use thiserror::Error;

/// Problem while sending through a [`Context`](crate::context::Context).
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection has been closed; nothing more can be sent.
    #[error("connection closed")]
    Closed,

    /// An async payload source failed while being read.
    #[error("failed to read payload: {0}")]
    Payload(#[from] io::Error),
}

/// The transport could not accept a close request.
#[derive(Debug, Clone, Copy, Error)]
#[error("connection writer stopped")]
pub struct CloseError;

/// Transport-level failure reported to [`Handler::on_error`](crate::handler::Handler::on_error).
#[derive(Debug, Error)]
pub enum TransportError {
    /// WebSocket protocol or I/O error.
    #[error(transparent)]
    WebSocket(#[from] tungstenite::Error),
}

/// Errors while processing a request on the server.
///
/// Only [`ServerError::Upgrade`] escapes [`Dispatcher::handle`](crate::server::Dispatcher::handle);
/// everything else is turned into a structured 400 response.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The native upgrade could not produce a response.
    #[error("WebSocket upgrade failed: {0}")]
    Upgrade(String),

    /// The `SpaceUnicorn-Type` header is missing or not recognized.
    #[error("missing or invalid request type")]
    InvalidType,

    /// The connection ID header is missing or malformed.
    #[error("missing or invalid connection ID")]
    InvalidConnectionId,

    /// No live connection for the given ID.
    #[error("connection not found")]
    ConnectionNotFound,

    /// The request body exceeds the maximum allowed size.
    #[error("request body too large")]
    BodyTooLarge,

    /// The request body could not be read.
    #[error("failed to read body: {0}")]
    BodyRead(String),

    /// A `text/plain` body was not valid UTF-8.
    #[error("text body is not valid UTF-8")]
    InvalidText,
}

/// Malformed `multipart/form-data` body.
#[derive(Debug, Error)]
pub enum MultipartError {
    /// The content type is not `multipart/form-data` with a boundary.
    #[error("invalid multipart content type: {0}")]
    ContentType(multer::Error),

    /// The body is not a well-formed form.
    #[error("malformed multipart body: {0}")]
    Body(#[from] multer::Error),

    /// A text part was not valid UTF-8.
    #[error("text part is not valid UTF-8")]
    InvalidText,
}

/// Errors while connecting or talking to a server as a client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The URL could not be parsed or rewritten.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// HTTP request failed.
    #[error("HTTP request error: {0}")]
    Request(String),

    /// Server returned an unexpected status code.
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// The HTTP status code.
        status: u16,
        /// The response body as a string.
        body: String,
    },

    /// The CONNECT response could not be decoded.
    #[error("connect response decode error: {0}")]
    ConnectDecode(String),

    /// The server reported the connection as closed.
    #[error("connection closed")]
    Closed,

    /// A POLLING response body was malformed.
    #[error(transparent)]
    Multipart(#[from] MultipartError),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// An async payload source failed while being read.
    #[error("failed to read payload: {0}")]
    Payload(#[from] io::Error),
}
