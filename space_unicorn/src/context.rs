//! The transport-agnostic connection context handed to application callbacks.
//!
//! A [`Context`] normalizes "send a message" and "close the connection" into
//! one interface. The transport that created it supplies an [`Outlet`] with
//! the actual primitives:
//!
//! ```text
//! Context::send(payload) ──► Payload::normalize ──► Outlet::send(Message)
//! Context::close(code, reason) ───────────────────► Outlet::close(..)
//! ```
//!
//! There is no buffering here; the outlet decides what "send" means (a
//! WebSocket frame, or an entry in a polling queue).

use core::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{
    error::{CloseError, SendError},
    message::{Message, Payload},
};

/// Transport-specific send/close primitives behind a [`Context`].
pub trait Outlet: Send + Sync + 'static {
    /// Forward one normalized message to the peer.
    fn send(&self, message: Message) -> BoxFuture<'_, Result<(), SendError>>;

    /// Close the underlying channel.
    fn close(
        &self,
        code: Option<u16>,
        reason: Option<String>,
    ) -> BoxFuture<'_, Result<(), CloseError>>;
}

/// Readiness of a duplex channel, numbered like the WebSocket `readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReadyState {
    /// Handshake in progress.
    Connecting = 0,

    /// Messages may flow.
    Open = 1,

    /// Close requested, not yet complete.
    Closing = 2,

    /// Closed; no more messages.
    Closed = 3,
}

impl From<ReadyState> for u8 {
    fn from(state: ReadyState) -> Self {
        state as u8
    }
}

impl TryFrom<u8> for ReadyState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ReadyState::Connecting),
            1 => Ok(ReadyState::Open),
            2 => Ok(ReadyState::Closing),
            3 => Ok(ReadyState::Closed),
            other => Err(other),
        }
    }
}

/// Shared, atomically updated [`ReadyState`].
#[derive(Debug, Clone)]
pub(crate) struct SharedReadyState(Arc<AtomicU8>);

impl SharedReadyState {
    pub(crate) fn new(state: ReadyState) -> Self {
        Self(Arc::new(AtomicU8::new(state.into())))
    }

    pub(crate) fn get(&self) -> ReadyState {
        ReadyState::try_from(self.0.load(Ordering::Acquire)).unwrap_or(ReadyState::Closed)
    }

    pub(crate) fn set(&self, state: ReadyState) {
        self.0.store(state.into(), Ordering::Release);
    }

    /// Move to `Closing` unless already closing or closed. Returns whether it moved.
    pub(crate) fn begin_close(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s < ReadyState::Closing as u8).then_some(ReadyState::Closing as u8)
            })
            .is_ok()
    }

    /// Move to `Closed`. Returns whether this call did the move.
    pub(crate) fn finish_close(&self) -> bool {
        self.0.swap(ReadyState::Closed.into(), Ordering::AcqRel) != u8::from(ReadyState::Closed)
    }
}

struct Inner {
    outlet: Box<dyn Outlet>,
    state: SharedReadyState,
}

/// A handle to one logical duplex channel, independent of its transport.
///
/// Clones share the same channel.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// Wrap a transport's primitives.
    #[must_use]
    pub fn new<O: Outlet>(outlet: O, state: ReadyState) -> Self {
        Self::with_state(outlet, SharedReadyState::new(state))
    }

    pub(crate) fn with_state<O: Outlet>(outlet: O, state: SharedReadyState) -> Self {
        Self {
            inner: Arc::new(Inner {
                outlet: Box::new(outlet),
                state,
            }),
        }
    }

    /// Send text, bytes, or a blob to the peer.
    ///
    /// Blobs are read to the end before anything is forwarded.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] once the channel is closing or closed,
    /// and [`SendError::Payload`] if a blob cannot be read.
    pub async fn send(&self, data: impl Into<Payload>) -> Result<(), SendError> {
        if self.is_closing() {
            return Err(SendError::Closed);
        }

        let message = data.into().normalize().await?;
        self.inner.outlet.send(message).await
    }

    /// Close the channel, optionally with a WebSocket close code and reason.
    ///
    /// # Errors
    ///
    /// Returns [`CloseError`] if the transport can no longer accept the request.
    pub async fn close(&self, code: Option<u16>, reason: Option<String>) -> Result<(), CloseError> {
        self.inner.outlet.close(code, reason).await
    }

    /// The current readiness of the channel.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.inner.state.get()
    }

    pub(crate) fn state(&self) -> &SharedReadyState {
        &self.inner.state
    }

    fn is_closing(&self) -> bool {
        matches!(
            self.ready_state(),
            ReadyState::Closing | ReadyState::Closed
        )
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("ready_state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
