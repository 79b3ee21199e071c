//! The public client handle: `connect`, `publish`, `subscribe`, `request`,
//! `flush`, `drain`, and `close`, plus the statistics and server-info
//! getters. Every public method is a thin translation into a [`connection::Command`]
//! sent to the connection manager task; none of them touch shared state
//! directly except the read-only getters.

pub mod callbacks;
pub mod connection;
pub mod inbox;
pub mod options;
pub mod pool;
pub mod stats;
pub mod subscription;
pub mod url;
pub mod wire;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::client::connection::{Command, ConnectionState, Manager, SharedState};
use crate::error::{Error, Result};

pub use crate::client::options::{ClientOptions, ClientOptionsBuilder};
pub use crate::client::stats::StatsSnapshot;
pub use crate::client::subscription::{DeliveryMode, Message};
pub use crate::client::wire::ServerInfo;

struct ClientInner {
    cmd_tx: mpsc::Sender<Command>,
    shared: Arc<SharedState>,
    next_sid: AtomicU64,
    options: Arc<ClientOptions>,
}

/// A cheaply-clonable handle to one connection.
///
/// Cloning a `Client` does not open a second connection; every clone shares
/// the same underlying connection manager task.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

/// A live subscription. Dropping it does not unsubscribe — call
/// [`Subscription::unsubscribe`] (or [`Subscription::unsubscribe_after`])
/// explicitly, the same way the wire protocol requires an explicit `UNSUB`.
pub struct Subscription {
    client: Client,
    sid: u64,
}

impl Client {
    /// Connects to the configured server pool, trying each endpoint in turn.
    /// Returns once the first connection succeeds, or [`Error::NoServers`]
    /// once every endpoint has failed once. Reconnection after a later drop
    /// is handled internally and does not surface through this call.
    pub async fn connect(options: ClientOptions) -> Result<Self> {
        let options = Arc::new(options);
        let stats = Arc::new(stats::Stats::default());
        let (shared, cmd_tx, ready_rx) = Manager::spawn(options.clone(), stats)?;

        match tokio::time::timeout(options.connect_timeout() * 4, ready_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => return Err(err),
            Ok(Err(_)) => return Err(Error::ConnectionClosed),
            Err(_) => return Err(Error::Timeout),
        }

        Ok(Self {
            inner: Arc::new(ClientInner { cmd_tx, shared, next_sid: AtomicU64::new(1), options }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.shared.state.read()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.inner.shared.server_info.read().clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.shared.stats.snapshot()
    }

    pub fn max_payload(&self) -> usize {
        self.server_info().map(|i| i.max_payload).unwrap_or(usize::MAX)
    }

    /// Publishes `payload` on `subject` with no reply subject.
    pub async fn publish(&self, subject: impl Into<String>, payload: impl Into<Bytes>) -> Result<()> {
        self.publish_with_reply(subject, None, payload).await
    }

    pub async fn publish_with_reply(
        &self,
        subject: impl Into<String>,
        reply: Option<String>,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        let payload = payload.into();
        let max_payload = self.max_payload();
        if payload.len() > max_payload {
            return Err(Error::MaxPayload { size: payload.len(), max_payload });
        }
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::Publish { subject: subject.into(), reply, payload, respond: tx }).await?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Subscribes to `subject`, dispatching every message to `handler` on its
    /// own task in `mode`. Returns a handle that must be explicitly
    /// unsubscribed; dropping it leaves the subscription active.
    pub async fn subscribe<F, Fut>(
        &self,
        subject: impl Into<String>,
        mode: DeliveryMode,
        handler: F,
    ) -> Result<Subscription>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe_queued(subject, None, mode, handler).await
    }

    pub async fn subscribe_queued<F, Fut>(
        &self,
        subject: impl Into<String>,
        queue_group: Option<String>,
        mode: DeliveryMode,
        handler: F,
    ) -> Result<Subscription>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe_internal(subject, queue_group, mode, None, handler).await
    }

    /// Same as [`Self::subscribe_queued`], but caps delivery server-side at
    /// `max_msgs` (a real `UNSUB sid max` at subscribe time) instead of
    /// relying on the caller to unsubscribe after the fact. [`Self::request_multi`]
    /// uses this so the cap is enforced by the server, not by a race between
    /// inbound bytes and the caller's own `unsubscribe()` call.
    async fn subscribe_capped<F, Fut>(
        &self,
        subject: impl Into<String>,
        mode: DeliveryMode,
        max_msgs: u64,
        handler: F,
    ) -> Result<Subscription>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe_internal(subject, None, mode, Some(max_msgs), handler).await
    }

    async fn subscribe_internal<F, Fut>(
        &self,
        subject: impl Into<String>,
        queue_group: Option<String>,
        mode: DeliveryMode,
        max_msgs: Option<u64>,
        handler: F,
    ) -> Result<Subscription>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let sid = self.inner.next_sid.fetch_add(1, Ordering::Relaxed);
        let boxed: subscription::Handler = Arc::new(move |msg| {
            let fut = handler(msg);
            Box::pin(fut) as Pin<Box<dyn Future<Output = ()> + Send>>
        });

        let (tx, rx) = oneshot::channel();
        self.send_command(Command::Subscribe {
            sid,
            subject: subject.into(),
            queue_group,
            handler: boxed,
            mode,
            max_msgs,
            respond: tx,
        })
        .await?;
        rx.await.map_err(|_| Error::ConnectionClosed)??;

        Ok(Subscription { client: self.clone(), sid })
    }

    /// Sends `payload` on `subject` and waits for the first reply on a
    /// freshly generated inbox subject, up to `timeout`.
    pub async fn request(
        &self,
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<Message> {
        let inbox = inbox::new_inbox(self.inner.options.inbox_prefix());
        let (reply_tx, reply_rx) = oneshot::channel::<Message>();
        let reply_tx = std::sync::Mutex::new(Some(reply_tx));

        let subject = subject.into();
        let sub = self
            .subscribe(inbox.clone(), DeliveryMode::Async, move |msg| {
                if let Some(tx) = reply_tx.lock().unwrap().take() {
                    let _ = tx.send(msg);
                }
                std::future::ready(())
            })
            .await?;

        self.publish_with_reply(subject, Some(inbox), payload).await?;

        let result = tokio::time::timeout(timeout, reply_rx).await;
        sub.unsubscribe().await.ok();

        match result {
            Ok(Ok(msg)) => Ok(msg),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Sends `payload` on `subject` and delivers the first `expected` replies
    /// to `cb`, each on its own task, auto-unsubscribing the moment that many
    /// have arrived. Returns once `expected` replies have been delivered, or
    /// [`Error::Timeout`] if `timeout` elapses first. Replies that arrive
    /// after a timeout are dropped, since the inbox subscription backing
    /// this call is always unique per request.
    pub async fn request_multi<F, Fut>(
        &self,
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
        expected: u64,
        timeout: Duration,
        cb: F,
    ) -> Result<()>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if expected == 0 {
            return Ok(());
        }

        let inbox = inbox::new_inbox(self.inner.options.inbox_prefix());
        let remaining = Arc::new(AtomicU64::new(expected));
        let (complete_tx, complete_rx) = oneshot::channel::<()>();
        let complete_tx = Arc::new(std::sync::Mutex::new(Some(complete_tx)));
        let cb = Arc::new(cb);

        let sub = self
            .subscribe_capped(inbox.clone(), DeliveryMode::Async, expected, move |msg| {
                let cb = cb.clone();
                let remaining = remaining.clone();
                let complete_tx = complete_tx.clone();
                async move {
                    cb(msg).await;
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        if let Some(tx) = complete_tx.lock().unwrap().take() {
                            let _ = tx.send(());
                        }
                    }
                }
            })
            .await?;

        self.publish_with_reply(subject, Some(inbox), payload).await?;

        let result = tokio::time::timeout(timeout, complete_rx).await;
        sub.unsubscribe().await.ok();

        match result {
            Ok(_) => Ok(()),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Blocks until every frame enqueued so far has been written to the
    /// socket and its `PONG` observed, or `timeout` elapses.
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::Flush { respond: tx }).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Unsubscribes every subscription, flushes remaining publishes, then
    /// closes the connection. Returns [`Error::DrainTimeout`] if the deadline
    /// configured in [`ClientOptions::drain_timeout_ms`] elapses first.
    pub async fn drain(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::Drain { respond: tx }).await?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Closes the connection immediately, without draining.
    pub async fn close(&self) {
        let _ = self.inner.cmd_tx.send(Command::Close).await;
    }

    async fn send_command(&self, cmd: Command) -> Result<()> {
        if matches!(self.state(), ConnectionState::Closed) {
            return Err(Error::ConnectionClosed);
        }
        self.inner
            .cmd_tx
            .send(cmd)
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        Ok(())
    }
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.sid
    }

    pub async fn unsubscribe(self) -> Result<()> {
        self.unsubscribe_after(None).await
    }

    /// Auto-unsubscribes after `max` more messages are delivered.
    pub async fn unsubscribe_after(self, max: Option<u64>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.client
            .send_command(Command::Unsubscribe { sid: self.sid, max_msgs: max, respond: tx })
            .await?;
        debug!(sid = self.sid, "unsubscribed");
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }
}
