//! Application event callbacks.
//!
//! Both the native WebSocket path and the polling path drive the same
//! [`Handler`], so application logic never learns which transport a peer is
//! using.

use futures::{future::BoxFuture, FutureExt};

use crate::{context::Context, error::TransportError, message::Message};

/// Details of a closed connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseEvent {
    /// WebSocket close code, when one was given.
    pub code: Option<u16>,

    /// Human-readable reason; may be empty.
    pub reason: String,
}

impl CloseEvent {
    /// Close event with a code and reason.
    #[must_use]
    pub fn new(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Lifecycle callbacks for server-side connections.
///
/// Each callback is awaited to completion before the operation that
/// triggered it returns. Replies are produced by calling
/// [`Context::send`] from within [`Handler::on_message`].
pub trait Handler: Send + Sync + 'static {
    /// A connection was established.
    fn on_open<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, ()> {
        let _ = ctx;
        async {}.boxed()
    }

    /// A message arrived from the peer.
    fn on_message<'a>(&'a self, message: Message, ctx: &'a Context) -> BoxFuture<'a, ()>;

    /// The connection was closed. Called at most once per connection.
    fn on_close<'a>(&'a self, event: CloseEvent, ctx: &'a Context) -> BoxFuture<'a, ()> {
        let _ = (event, ctx);
        async {}.boxed()
    }

    /// The transport reported an error.
    fn on_error<'a>(&'a self, error: &'a TransportError, ctx: &'a Context) -> BoxFuture<'a, ()> {
        let _ = (error, ctx);
        async {}.boxed()
    }
}
