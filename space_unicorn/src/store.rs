//! Server-side state for long-polling connections.
//!
//! The [`ConnectionStore`] emulates a persistent socket on top of stateless
//! HTTP requests. Each registered connection owns an outbound queue that the
//! application fills through its [`Context`], and that POLLING requests drain:
//!
//! ```text
//! SEND ──► deliver_inbound ──► Handler::on_message ──► Context::send ──► queue
//!                                                                          │
//! POLLING ──► pull ◄── snapshot + clear ◄──────────────────────────────────┘
//!                  └── (queue empty) park until enqueue or poll window
//! ```
//!
//! Every interaction rearms a per-connection idle timer. If it fires, the
//! connection is closed and removed, exactly as if the application had
//! closed it.
//!
//! Only one parked pull per connection is supported. A second concurrent
//! pull on the same identifier replaces the first one's wakeup; the first
//! then resolves when its poll window elapses.

use core::{mem, time::Duration};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Weak},
};

use async_lock::Mutex;
use futures::{channel::oneshot, future::BoxFuture, FutureExt};
use tokio::task::JoinHandle;

use crate::{
    connection_id::ConnectionId,
    context::{Context, Outlet, ReadyState, SharedReadyState},
    error::{CloseError, SendError},
    handler::{CloseEvent, Handler},
    message::Message,
};

/// Default long-poll wait window (1 second).
///
/// A POLLING request on an empty queue is answered with an empty batch if
/// nothing arrives within this window.
pub const DEFAULT_POLL_WINDOW: Duration = Duration::from_secs(1);

/// Default idle eviction window (5 seconds).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Close reason reported when a connection is evicted for inactivity.
pub const IDLE_TIMEOUT_REASON: &str = "idle timeout";

/// Close reason reported when the store is torn down.
pub const SHUTDOWN_REASON: &str = "shutdown";

/// Timing configuration for a [`ConnectionStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// How long a pull on an empty queue waits before answering empty.
    pub poll_window: Duration,

    /// How long a connection may go without interaction before eviction.
    pub idle_timeout: Duration,
}

impl StoreConfig {
    /// Set the long-poll wait window.
    #[must_use]
    pub const fn with_poll_window(mut self, window: Duration) -> Self {
        self.poll_window = window;
        self
    }

    /// Set the idle eviction window.
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            poll_window: DEFAULT_POLL_WINDOW,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Registry of live polling connections.
///
/// Cheap to clone; clones share the same records. Create one per server
/// process and hand it to the [`Dispatcher`](crate::server::Dispatcher).
#[derive(Clone)]
pub struct ConnectionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    records: Mutex<BTreeMap<ConnectionId, Arc<PollingConnection>>>,
    config: StoreConfig,
}

struct PollingConnection {
    id: ConnectionId,
    handler: Arc<dyn Handler>,
    context: Context,
    mailbox: Mutex<Mailbox>,
}

#[derive(Default)]
struct Mailbox {
    /// Messages not yet delivered, in delivery order.
    queue: Vec<Message>,

    /// Wakes the parked pull, if any.
    waiter: Option<oneshot::Sender<()>>,

    idle_timer: Option<JoinHandle<()>>,

    /// Bumped on every rearm; a firing timer only evicts if it still matches.
    generation: u64,

    /// `on_message` callbacks still running. No idle timer runs while nonzero.
    in_flight: usize,

    closed: bool,
}

/// Result of [`ConnectionStore::pull`].
#[derive(Debug)]
pub enum PullOutcome {
    /// No live connection with that identifier.
    NotFound,

    /// Messages were already queued; here they are, in order.
    Ready(Vec<Message>),

    /// The queue was empty; resolve with [`PendingPull::wait`].
    Pending(PendingPull),
}

impl PullOutcome {
    /// Resolve the outcome to a batch, waiting if necessary.
    ///
    /// Returns `None` if the connection was not found.
    pub async fn wait(self) -> Option<Vec<Message>> {
        match self {
            PullOutcome::NotFound => None,
            PullOutcome::Ready(batch) => Some(batch),
            PullOutcome::Pending(pending) => Some(pending.wait().await),
        }
    }
}

/// A parked pull, resolved by the next enqueue or by the poll window.
pub struct PendingPull {
    conn: Arc<PollingConnection>,
    store: Arc<StoreInner>,
    wakeup: oneshot::Receiver<()>,
    window: Duration,
}

impl PendingPull {
    /// Wait for messages or for the poll window to elapse.
    ///
    /// Either way the queue is drained and the idle timer rearmed. The
    /// returned batch is empty only if nothing was enqueued in time.
    pub async fn wait(self) -> Vec<Message> {
        let Self {
            conn,
            store,
            wakeup,
            window,
        } = self;

        let woken = tokio::time::timeout(window, wakeup).await.is_ok();

        let mut mailbox = conn.mailbox.lock().await;
        if !woken
            && mailbox
                .waiter
                .as_ref()
                .is_some_and(oneshot::Sender::is_canceled)
        {
            mailbox.waiter = None;
        }

        let batch = mem::take(&mut mailbox.queue);
        store.rearm(&conn, &mut mailbox);

        tracing::debug!(
            conn_id = %conn.id,
            count = batch.len(),
            woken,
            "pending pull resolved"
        );

        batch
    }
}

impl fmt::Debug for PendingPull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingPull")
            .field("conn_id", &self.conn.id)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl ConnectionStore {
    /// Create an empty store with default timings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create an empty store with the given timings.
    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                records: Mutex::new(BTreeMap::new()),
                config,
            }),
        }
    }

    /// The store's timing configuration.
    #[must_use]
    pub fn config(&self) -> StoreConfig {
        self.inner.config
    }

    /// Register a new polling connection.
    ///
    /// Runs the handler's `on_open` with the connection's fresh [`Context`],
    /// arms the idle timer, and returns the new identifier.
    pub async fn register(&self, handler: Arc<dyn Handler>) -> ConnectionId {
        let conn = {
            let mut records = self.inner.records.lock().await;

            let mut id = ConnectionId::generate();
            while records.contains_key(&id) {
                id = ConnectionId::generate();
            }

            let conn = self.inner.new_connection(id, handler);
            records.insert(id, conn.clone());
            conn
        };

        tracing::info!(conn_id = %conn.id, "polling connection registered");

        conn.handler.on_open(&conn.context).await;

        let mut mailbox = conn.mailbox.lock().await;
        self.inner.rearm(&conn, &mut mailbox);
        drop(mailbox);

        conn.id
    }

    /// Hand a message from the client to the application.
    ///
    /// The connection cannot be evicted for inactivity while `on_message`
    /// runs; the idle window restarts once it returns.
    ///
    /// Returns `false`, without side effects, if the connection is unknown.
    pub async fn deliver_inbound(&self, id: &ConnectionId, message: Message) -> bool {
        let Some(conn) = self.inner.get(id).await else {
            tracing::debug!(conn_id = %id, "deliver to unknown connection");
            return false;
        };

        {
            let mut mailbox = conn.mailbox.lock().await;
            if mailbox.closed {
                return false;
            }
            mailbox.in_flight += 1;
            self.inner.rearm(&conn, &mut mailbox);
        }

        tracing::debug!(conn_id = %id, len = message.len(), "inbound message");
        conn.handler.on_message(message, &conn.context).await;

        let mut mailbox = conn.mailbox.lock().await;
        mailbox.in_flight = mailbox.in_flight.saturating_sub(1);
        self.inner.rearm(&conn, &mut mailbox);

        true
    }

    /// Drain the connection's outbound queue.
    ///
    /// A non-empty queue is snapshotted and cleared immediately. An empty
    /// one yields [`PullOutcome::Pending`], which resolves when a message is
    /// enqueued or the poll window elapses.
    pub async fn pull(&self, id: &ConnectionId) -> PullOutcome {
        let Some(conn) = self.inner.get(id).await else {
            tracing::debug!(conn_id = %id, "pull from unknown connection");
            return PullOutcome::NotFound;
        };

        let mut mailbox = conn.mailbox.lock().await;
        if mailbox.closed {
            return PullOutcome::NotFound;
        }

        self.inner.rearm(&conn, &mut mailbox);

        if !mailbox.queue.is_empty() {
            let batch = mem::take(&mut mailbox.queue);
            tracing::debug!(conn_id = %id, count = batch.len(), "pull ready");
            return PullOutcome::Ready(batch);
        }

        let (tx, rx) = oneshot::channel();
        if mailbox.waiter.replace(tx).is_some() {
            tracing::warn!(conn_id = %id, "concurrent pull replaced a parked pull");
        }
        drop(mailbox);

        PullOutcome::Pending(PendingPull {
            conn,
            store: self.inner.clone(),
            wakeup: rx,
            window: self.inner.config.poll_window,
        })
    }

    /// Close a connection.
    ///
    /// Runs the handler's `on_close` and removes the record. Returns `false`
    /// if the connection is unknown or already closed.
    pub async fn close(&self, id: &ConnectionId) -> bool {
        self.inner.close_with(id, CloseEvent::default(), None).await
    }

    /// Close every live connection and cancel every idle timer.
    pub async fn shutdown(&self) {
        let ids: Vec<ConnectionId> =
            self.inner.records.lock().await.keys().copied().collect();
        tracing::info!(count = ids.len(), "shutting down connection store");

        for id in ids {
            self.inner
                .close_with(&id, CloseEvent::new(None, SHUTDOWN_REASON), None)
                .await;
        }
    }

    /// Whether a live connection exists for `id`.
    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.records.lock().await.contains_key(id)
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.inner.records.lock().await.len()
    }

    /// Whether there are no live connections.
    pub async fn is_empty(&self) -> bool {
        self.inner.records.lock().await.is_empty()
    }
}

impl Default for ConnectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStore")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl StoreInner {
    fn new_connection(
        self: &Arc<Self>,
        id: ConnectionId,
        handler: Arc<dyn Handler>,
    ) -> Arc<PollingConnection> {
        let store = Arc::downgrade(self);
        Arc::new_cyclic(|conn| PollingConnection {
            id,
            handler,
            context: Context::with_state(
                PollingOutlet {
                    conn: conn.clone(),
                    store,
                },
                SharedReadyState::new(ReadyState::Open),
            ),
            mailbox: Mutex::new(Mailbox::default()),
        })
    }

    async fn get(&self, id: &ConnectionId) -> Option<Arc<PollingConnection>> {
        self.records.lock().await.get(id).cloned()
    }

    /// Restart the idle timer. No-op once the connection is closed.
    ///
    /// Bumping the generation also defuses a timer that already fired and is
    /// waiting on the mailbox lock. While a callback is in flight the old
    /// timer is cancelled and no new one is started.
    fn rearm(self: &Arc<Self>, conn: &Arc<PollingConnection>, mailbox: &mut Mailbox) {
        if mailbox.closed {
            return;
        }

        if let Some(timer) = mailbox.idle_timer.take() {
            timer.abort();
        }

        mailbox.generation = mailbox.generation.wrapping_add(1);
        if mailbox.in_flight > 0 {
            return;
        }

        let generation = mailbox.generation;
        let store = Arc::downgrade(self);
        let id = conn.id;
        let idle_timeout = self.config.idle_timeout;

        mailbox.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(idle_timeout).await;

            let Some(store) = store.upgrade() else {
                return;
            };

            if store
                .close_with(&id, CloseEvent::new(None, IDLE_TIMEOUT_REASON), Some(generation))
                .await
            {
                tracing::info!(conn_id = %id, "evicted idle polling connection");
            }
        }));
    }

    /// Remove and close a connection.
    ///
    /// With `idle_generation` set, this is the idle timer firing: the close
    /// only happens if no interaction rearmed the timer in the meantime.
    async fn close_with(
        self: &Arc<Self>,
        id: &ConnectionId,
        event: CloseEvent,
        idle_generation: Option<u64>,
    ) -> bool {
        let conn = {
            let mut records = self.records.lock().await;
            let Some(conn) = records.get(id).cloned() else {
                return false;
            };

            let mut mailbox = conn.mailbox.lock().await;
            if idle_generation.is_some_and(|generation| generation != mailbox.generation) {
                return false;
            }

            records.remove(id);
            mailbox.closed = true;
            conn.context.state().set(ReadyState::Closed);

            if let Some(timer) = mailbox.idle_timer.take() {
                // The firing timer is this very task; only cancel others.
                if idle_generation.is_none() {
                    timer.abort();
                }
            }

            if let Some(waiter) = mailbox.waiter.take() {
                let _ = waiter.send(());
            }

            drop(mailbox);
            conn
        };

        tracing::info!(conn_id = %id, reason = %event.reason, "polling connection closed");
        conn.handler.on_close(event, &conn.context).await;

        true
    }
}

/// [`Outlet`] that enqueues into a polling connection's mailbox.
struct PollingOutlet {
    conn: Weak<PollingConnection>,
    store: Weak<StoreInner>,
}

impl Outlet for PollingOutlet {
    fn send(&self, message: Message) -> BoxFuture<'_, Result<(), SendError>> {
        async move {
            let conn = self.conn.upgrade().ok_or(SendError::Closed)?;
            let mut mailbox = conn.mailbox.lock().await;
            if mailbox.closed {
                return Err(SendError::Closed);
            }

            mailbox.queue.push(message);
            if let Some(waiter) = mailbox.waiter.take() {
                let _ = waiter.send(());
            }

            Ok(())
        }
        .boxed()
    }

    fn close(
        &self,
        code: Option<u16>,
        reason: Option<String>,
    ) -> BoxFuture<'_, Result<(), CloseError>> {
        async move {
            let (Some(store), Some(conn)) = (self.store.upgrade(), self.conn.upgrade()) else {
                return Ok(());
            };

            let event = CloseEvent::new(code, reason.unwrap_or_default());
            store.close_with(&conn.id, event, None).await;
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Open,
        Message(Message),
        Close(CloseEvent),
    }

    #[derive(Default)]
    struct Recorder {
        echo: bool,
        events: StdMutex<Vec<Event>>,
        ctx: StdMutex<Option<Context>>,
    }

    impl Recorder {
        fn echo() -> Arc<Self> {
            Arc::new(Self {
                echo: true,
                ..Self::default()
            })
        }

        fn events(&self) -> Vec<Event> {
            self.events.lock().expect("events lock").clone()
        }

        fn context(&self) -> Context {
            self.ctx.lock().expect("ctx lock").clone().expect("opened")
        }

        fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
            self.events().iter().filter(|e| pred(e)).count()
        }
    }

    impl Handler for Recorder {
        fn on_open<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, ()> {
            self.events.lock().expect("events lock").push(Event::Open);
            *self.ctx.lock().expect("ctx lock") = Some(ctx.clone());
            async {}.boxed()
        }

        fn on_message<'a>(&'a self, message: Message, ctx: &'a Context) -> BoxFuture<'a, ()> {
            self.events
                .lock()
                .expect("events lock")
                .push(Event::Message(message.clone()));

            async move {
                if message.as_text() == Some("bye") {
                    let _ = ctx.close(Some(4000), Some("bye".into())).await;
                } else if self.echo {
                    ctx.send(message).await.expect("echo");
                }
            }
            .boxed()
        }

        fn on_close<'a>(&'a self, event: CloseEvent, _ctx: &'a Context) -> BoxFuture<'a, ()> {
            self.events.lock().expect("events lock").push(Event::Close(event));
            async {}.boxed()
        }
    }

    fn text(s: &str) -> Message {
        Message::Text(s.into())
    }

    #[tokio::test]
    async fn register_opens_once_and_echo_round_trips() {
        let store = ConnectionStore::new();
        let handler = Recorder::echo();

        let id = store.register(handler.clone()).await;
        assert_eq!(handler.events(), vec![Event::Open]);
        assert_eq!(handler.context().ready_state(), ReadyState::Open);

        assert!(store.deliver_inbound(&id, text("hello world")).await);
        assert_eq!(
            handler.events(),
            vec![Event::Open, Event::Message(text("hello world"))]
        );

        match store.pull(&id).await {
            PullOutcome::Ready(batch) => assert_eq!(batch, vec![text("hello world")]),
            other => panic!("expected ready batch, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pull_drains_in_order_exactly_once() {
        let store = ConnectionStore::new();
        let id = store.register(Recorder::echo()).await;

        let sent = vec![
            text("one"),
            Message::Binary(bytes::Bytes::from_static(&[0, 1, 2])),
            text("three"),
        ];
        for msg in &sent {
            assert!(store.deliver_inbound(&id, msg.clone()).await);
        }

        assert_eq!(store.pull(&id).await.wait().await, Some(sent));

        let second = store.pull(&id).await;
        assert!(matches!(second, PullOutcome::Pending(_)));
        assert_eq!(second.wait().await, Some(Vec::new()));
    }

    #[tokio::test]
    async fn pull_unknown_is_not_found() {
        let store = ConnectionStore::new();
        let missing = ConnectionId::generate();

        assert!(matches!(store.pull(&missing).await, PullOutcome::NotFound));
        assert!(!store.deliver_inbound(&missing, text("x")).await);
        assert!(!store.close(&missing).await);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_pull_resolves_on_enqueue() {
        let store = ConnectionStore::new();
        let handler = Arc::new(Recorder::default());
        let id = store.register(handler.clone()).await;

        let PullOutcome::Pending(pending) = store.pull(&id).await else {
            panic!("expected pending pull");
        };

        let ctx = handler.context();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            ctx.send("late").await.expect("send");
        });

        let start = Instant::now();
        let batch = pending.wait().await;

        assert_eq!(batch, vec![text("late")]);
        assert!(start.elapsed() < DEFAULT_POLL_WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_pull_times_out_empty() {
        let store = ConnectionStore::new();
        let id = store.register(Arc::new(Recorder::default())).await;

        let start = Instant::now();
        let batch = store.pull(&id).await.wait().await;

        assert_eq!(batch, Some(Vec::new()));
        assert!(start.elapsed() >= DEFAULT_POLL_WINDOW);
        assert!(store.contains(&id).await);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let store = ConnectionStore::new();
        let handler = Arc::new(Recorder::default());
        let id = store.register(handler.clone()).await;

        assert!(store.close(&id).await);
        assert!(!store.close(&id).await);

        assert_eq!(handler.count(|e| matches!(e, Event::Open)), 1);
        assert_eq!(handler.count(|e| matches!(e, Event::Close(_))), 1);
        assert_eq!(handler.context().ready_state(), ReadyState::Closed);
        assert!(matches!(store.pull(&id).await, PullOutcome::NotFound));
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let store = ConnectionStore::new();
        let handler = Arc::new(Recorder::default());
        let id = store.register(handler.clone()).await;
        store.close(&id).await;

        assert!(matches!(
            handler.context().send("too late").await,
            Err(SendError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_is_evicted() {
        let store = ConnectionStore::new();
        let handler = Arc::new(Recorder::default());
        let id = store.register(handler.clone()).await;

        tokio::time::sleep(DEFAULT_IDLE_TIMEOUT + Duration::from_secs(1)).await;

        assert!(!store.contains(&id).await);
        assert!(matches!(store.pull(&id).await, PullOutcome::NotFound));
        assert!(!store.deliver_inbound(&id, text("x")).await);
        assert!(!store.close(&id).await);
        assert_eq!(
            handler.events().last(),
            Some(&Event::Close(CloseEvent::new(None, IDLE_TIMEOUT_REASON)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn interaction_rearms_idle_timer() {
        let store = ConnectionStore::new();
        let id = store.register(Arc::new(Recorder::default())).await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(store.deliver_inbound(&id, text("keepalive")).await);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(store.contains(&id).await);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!store.contains(&id).await);
    }

    /// Replies after outlasting the idle window.
    #[derive(Default)]
    struct Slow {
        replied: StdMutex<Option<bool>>,
        closes: StdMutex<usize>,
    }

    impl Handler for Slow {
        fn on_message<'a>(&'a self, _message: Message, ctx: &'a Context) -> BoxFuture<'a, ()> {
            async move {
                tokio::time::sleep(DEFAULT_IDLE_TIMEOUT + Duration::from_secs(1)).await;
                let sent = ctx.send("done").await.is_ok();
                *self.replied.lock().expect("replied lock") = Some(sent);
            }
            .boxed()
        }

        fn on_close<'a>(&'a self, _event: CloseEvent, _ctx: &'a Context) -> BoxFuture<'a, ()> {
            *self.closes.lock().expect("closes lock") += 1;
            async {}.boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_message_handler_is_not_evicted() {
        let store = ConnectionStore::new();
        let handler = Arc::new(Slow::default());
        let id = store.register(handler.clone()).await;

        assert!(store.deliver_inbound(&id, text("work")).await);
        assert_eq!(*handler.replied.lock().expect("replied lock"), Some(true));
        assert_eq!(*handler.closes.lock().expect("closes lock"), 0);

        let PullOutcome::Ready(batch) = store.pull(&id).await else {
            panic!("reply should be queued");
        };
        assert_eq!(batch, vec![text("done")]);

        // The idle window runs again from the last interaction.
        tokio::time::sleep(DEFAULT_IDLE_TIMEOUT - Duration::from_secs(1)).await;
        assert!(store.contains(&id).await);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!store.contains(&id).await);
        assert_eq!(*handler.closes.lock().expect("closes lock"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_timings_apply() {
        let config = StoreConfig::default()
            .with_poll_window(Duration::from_millis(100))
            .with_idle_timeout(Duration::from_millis(500));
        let store = ConnectionStore::with_config(config);
        let id = store.register(Arc::new(Recorder::default())).await;

        let start = Instant::now();
        assert_eq!(store.pull(&id).await.wait().await, Some(Vec::new()));
        assert!(start.elapsed() < Duration::from_millis(200));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!store.contains(&id).await);
    }

    #[tokio::test]
    async fn context_close_forwards_code_and_reason() {
        let store = ConnectionStore::new();
        let handler = Recorder::echo();
        let id = store.register(handler.clone()).await;

        assert!(store.deliver_inbound(&id, text("bye")).await);

        assert!(!store.contains(&id).await);
        assert_eq!(
            handler.events().last(),
            Some(&Event::Close(CloseEvent::new(Some(4000), "bye")))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_wakes_pending_pull() {
        let store = ConnectionStore::new();
        let id = store.register(Arc::new(Recorder::default())).await;

        let pending = store.pull(&id).await;
        let closer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            closer.close(&id).await;
        });

        let start = Instant::now();
        assert_eq!(pending.wait().await, Some(Vec::new()));
        assert!(start.elapsed() < DEFAULT_POLL_WINDOW);
    }

    #[tokio::test]
    async fn shutdown_closes_every_connection() {
        let store = ConnectionStore::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        store.register(a.clone()).await;
        store.register(b.clone()).await;
        assert_eq!(store.len().await, 2);

        store.shutdown().await;

        assert!(store.is_empty().await);
        for handler in [a, b] {
            assert_eq!(
                handler.events().last(),
                Some(&Event::Close(CloseEvent::new(None, SHUTDOWN_REASON)))
            );
        }
    }
}
