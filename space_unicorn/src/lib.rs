//! # Space Unicorn
//!
//! A duplex, message-oriented transport that behaves like a WebSocket but
//! falls back to HTTP long polling when the native upgrade is unavailable
//! (e.g., restrictive proxies, runtimes without WebSocket support).
//!
//! Application code registers a [`Handler`](handler::Handler) on the server
//! and talks to a [`Client`](client::Client) on the other end; which physical
//! transport carries the messages is invisible to both.
//!
//! # Protocol
//!
//! Every polling request targets the same URL and is told apart by the
//! `SpaceUnicorn-Type` header:
//!
//! ```text
//! ┌──────────┐                                 ┌──────────┐
//! │  Client  │                                 │  Server  │
//! └────┬─────┘                                 └────┬─────┘
//!      │                                            │
//!      │  GET  (Upgrade: websocket)                 │
//!      │ ─────────────────────────────────────────► │
//!      │  101 Switching Protocols  ── or ──  4xx    │
//!      │ ◄───────────────────────────────────────── │
//!      │                                            │
//!      │  GET  SpaceUnicorn-Type: CONNECT           │
//!      │ ─────────────────────────────────────────► │
//!      │  200 {"success":true,"connId":"…"}         │
//!      │ ◄───────────────────────────────────────── │
//!      │                                            │
//!      │  POST SpaceUnicorn-Type: SEND              │
//!      │       SpaceUnicorn-ConnID: <id>            │
//!      │ ─────────────────────────────────────────► │
//!      │  200 {"success":true}                      │
//!      │ ◄───────────────────────────────────────── │
//!      │                                            │
//!      │  GET  SpaceUnicorn-Type: POLLING           │
//!      │       SpaceUnicorn-ConnID: <id>            │
//!      │ ─────────────────────────────────────────► │
//!      │              ... (blocks ≤ 1s) ...         │
//!      │  200 multipart/form-data (0..n messages)   │
//!      │ ◄───────────────────────────────────────── │
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Dispatcher                         │
//! │                                                          │
//! │  Upgrade ──► server::websocket ──┐                       │
//! │                                  ├──► Handler callbacks  │
//! │  CONNECT/SEND/POLLING ──► store ─┘    (via Context)      │
//! │                                                          │
//! │  ConnectionStore: Map<ConnectionId, PollingConnection>   │
//! │    queue ─► pull (snapshot + clear)                      │
//! │    idle timer ─► close                                   │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod connection_id;
pub mod context;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod http_client;
pub mod message;
pub mod multipart;
pub mod server;
pub mod store;

pub use client::{connect, Client, ClientEvent, Connector};
pub use context::{Context, ReadyState};
pub use handler::{CloseEvent, Handler};
pub use message::{Blob, Message, Payload};
pub use server::Dispatcher;
pub use store::ConnectionStore;

/// Request header carrying the polling sub-operation.
pub const TYPE_HEADER: &str = "spaceunicorn-type";

/// Request header carrying the connection identifier.
pub const CONN_ID_HEADER: &str = "spaceunicorn-connid";

/// Default maximum HTTP request body size (50 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 50 * 1024 * 1024;
