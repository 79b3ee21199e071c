//! Subscription registry and per-subscription dispatcher.
//!
//! The registry is a plain `HashMap` owned exclusively by the connection
//! manager task (see [`crate::client::connection`]) — nothing else ever
//! touches it directly, so no lock is needed around it. Each live
//! subscription gets its own bounded channel and its own dispatcher task, so
//! a handler that blocks on subscription A never delays delivery to
//! subscription B: the manager only ever does a non-blocking `try_send` into
//! a subscription's channel, and when that channel is full the message is
//! dropped and a [`crate::error::Error::SlowConsumer`] is reported instead of
//! ever blocking the reader loop.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

use crate::error::Error;

/// A single inbound message, handed to a subscription's handler.
#[derive(Debug, Clone)]
pub struct Message {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: Bytes,
    pub sid: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Messages for this subscription are handled one at a time, in order.
    Sync,
    /// Every message is dispatched to its own task; order is not guaranteed.
    Async,
}

pub type Handler = Arc<dyn Fn(Message) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct SubscriptionLimits {
    pub pending_msgs_limit: usize,
    pub pending_bytes_limit: usize,
}

/// Registry-side bookkeeping for one live subscription.
struct Entry {
    subject: String,
    queue_group: Option<String>,
    /// `None` once the subscription has started draining: the sender has
    /// been dropped so the dispatcher finishes whatever is already queued
    /// and exits on its own, without the manager blocking on it.
    tx: Option<mpsc::Sender<Message>>,
    pending_bytes: Arc<AtomicUsize>,
    pending_bytes_limit: usize,
    max_msgs: Option<u64>,
    received: u64,
    done_rx: oneshot::Receiver<()>,
}

/// Owns every live subscription. Lives entirely inside the connection
/// manager task.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<u64, Entry>,
}

pub struct NewSubscription {
    pub tx: mpsc::Sender<Message>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sids(&self) -> Vec<u64> {
        self.entries.keys().copied().collect()
    }

    pub fn subject_of(&self, sid: u64) -> Option<&str> {
        self.entries.get(&sid).map(|e| e.subject.as_str())
    }

    pub fn queue_group_of(&self, sid: u64) -> Option<Option<&str>> {
        self.entries.get(&sid).map(|e| e.queue_group.as_deref())
    }

    /// Registers a new subscription and spawns its dispatcher task.
    pub fn insert(
        &mut self,
        sid: u64,
        subject: String,
        queue_group: Option<String>,
        handler: Handler,
        mode: DeliveryMode,
        limits: SubscriptionLimits,
        max_msgs: Option<u64>,
    ) {
        let (tx, rx) = mpsc::channel(limits.pending_msgs_limit);
        let (done_tx, done_rx) = oneshot::channel();
        let pending_bytes = Arc::new(AtomicUsize::new(0));

        tokio::spawn(run_dispatcher(
            sid,
            rx,
            handler,
            mode,
            pending_bytes.clone(),
            done_tx,
        ));

        self.entries.insert(
            sid,
            Entry {
                subject,
                queue_group,
                tx: Some(tx),
                pending_bytes,
                pending_bytes_limit: limits.pending_bytes_limit,
                max_msgs,
                received: 0,
                done_rx,
            },
        );
    }

    pub fn remove(&mut self, sid: u64) -> bool {
        self.entries.remove(&sid).is_some()
    }

    /// Sets (or clears) the auto-unsubscribe threshold for a subscription.
    pub fn set_max_msgs(&mut self, sid: u64, max: Option<u64>) {
        if let Some(entry) = self.entries.get_mut(&sid) {
            entry.max_msgs = max;
        }
    }

    /// Routes one inbound message to its subscription, applying the
    /// slow-consumer policy. Returns `Ok(true)` if the subscription has now
    /// hit its `max_msgs` threshold and should be auto-unsubscribed.
    pub fn route(&mut self, sid: u64, msg: Message) -> Result<bool, Error> {
        let entry = self.entries.get_mut(&sid).ok_or(Error::BadSubscription(sid))?;

        let payload_len = msg.payload.len();
        let would_be = entry.pending_bytes.load(Ordering::Relaxed) + payload_len;
        if would_be > entry.pending_bytes_limit {
            warn!(sid, subject = %entry.subject, "slow consumer: pending byte limit exceeded");
            return Err(Error::SlowConsumer { sid, subject: entry.subject.clone() });
        }

        let Some(tx) = entry.tx.as_ref() else {
            trace!(sid, "dropping message for subscription already draining");
            return Ok(false);
        };

        match tx.try_send(msg) {
            Ok(()) => {
                entry.pending_bytes.fetch_add(payload_len, Ordering::Relaxed);
                entry.received += 1;
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(sid, subject = %entry.subject, "slow consumer: pending message limit exceeded");
                return Err(Error::SlowConsumer { sid, subject: entry.subject.clone() });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!(sid, "dropping message for closed subscription");
            }
        }

        Ok(entry.max_msgs.is_some_and(|max| entry.received >= max))
    }

    /// Drops the sender half for every subscription so each dispatcher drains
    /// whatever is already queued and exits on its own. The manager never
    /// blocks here; [`Self::drain_progress`] is polled afterward to learn
    /// when every dispatcher has actually finished.
    pub fn begin_drain(&mut self) {
        for entry in self.entries.values_mut() {
            entry.tx = None;
        }
    }

    /// Removes every subscription whose dispatcher has finished draining.
    /// Returns `true` once none are left. Non-blocking: a dispatcher still
    /// working through its queue is left in place for the next poll.
    pub fn drain_progress(&mut self) -> bool {
        self.entries
            .retain(|_, entry| matches!(entry.done_rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)));
        self.entries.is_empty()
    }
}

async fn run_dispatcher(
    sid: u64,
    mut rx: mpsc::Receiver<Message>,
    handler: Handler,
    mode: DeliveryMode,
    pending_bytes: Arc<AtomicUsize>,
    done: oneshot::Sender<()>,
) {
    while let Some(msg) = rx.recv().await {
        pending_bytes.fetch_sub(msg.payload.len(), Ordering::Relaxed);
        match mode {
            // Spawned rather than awaited directly so a panicking handler
            // can't take the dispatcher task down with it; awaited here
            // anyway to preserve in-order delivery.
            DeliveryMode::Sync => {
                if let Err(join_err) = tokio::spawn(handler(msg)).await {
                    warn!(sid, error = %join_err, "subscription handler panicked");
                }
            }
            DeliveryMode::Async => {
                tokio::spawn(guarded(sid, handler(msg)));
            }
        }
    }
    trace!(sid, "dispatcher exiting: subscription channel closed");
    let _ = done.send(());
}

async fn guarded(sid: u64, fut: Pin<Box<dyn Future<Output = ()> + Send>>) {
    if let Err(join_err) = tokio::spawn(fut).await {
        warn!(sid, error = %join_err, "subscription handler panicked");
    }
}
