//! Outbound pipeline: the write buffer the manager task appends encoded
//! frames to, and the pong-waiter FIFO used to implement `flush()` and to
//! detect a stale connection from unanswered keepalive pings.
//!
//! Everything here is owned by the connection manager task; nothing outside
//! it ever touches the buffer or the FIFO directly.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tokio::sync::oneshot;

use crate::client::wire::{encode, ClientOp};
use crate::error::{Error, Result};

/// One outstanding `PING` the client has sent and not yet seen answered.
/// Keepalive pings carry no responder; an explicit `flush()` carries one so
/// the caller can be woken the moment the matching `PONG` arrives.
struct PongWaiter {
    id: u64,
    responder: Option<oneshot::Sender<Result<()>>>,
}

#[derive(Default)]
pub struct OutboundPipeline {
    buf: BytesMut,
    waiters: VecDeque<PongWaiter>,
    next_waiter_id: u64,
}

impl OutboundPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes and appends a client operation to the write buffer.
    pub fn enqueue(&mut self, op: &ClientOp) {
        let bytes = encode(op);
        self.buf.extend_from_slice(&bytes);
    }

    /// Appends a `PING` and registers a waiter for its `PONG`. Returns the
    /// waiter id, which [`Self::cancel_waiter`] can use to drop a stale
    /// waiter if a `flush()` call times out.
    pub fn send_ping(&mut self, responder: Option<oneshot::Sender<Result<()>>>) -> u64 {
        self.enqueue(&ClientOp::Ping);
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        self.waiters.push_back(PongWaiter { id, responder });
        id
    }

    /// Pops the oldest outstanding waiter and resolves it; called when a
    /// `PONG` is read off the wire. Returns whether a waiter was present
    /// (an unsolicited `PONG` is tolerated and simply ignored).
    pub fn resolve_next_pong(&mut self) -> bool {
        match self.waiters.pop_front() {
            Some(waiter) => {
                if let Some(responder) = waiter.responder {
                    let _ = responder.send(Ok(()));
                }
                true
            }
            None => false,
        }
    }

    /// Drops a specific waiter (by id) without resolving it, replacing its
    /// slot with a no-op placeholder so FIFO order is preserved for the
    /// pings still ahead of it.
    pub fn cancel_waiter(&mut self, id: u64) {
        if let Some(waiter) = self.waiters.iter_mut().find(|w| w.id == id) {
            waiter.responder = None;
        }
    }

    /// Fails every outstanding waiter, e.g. because the connection dropped.
    pub fn fail_all_waiters(&mut self, err_factory: impl Fn() -> Error) {
        for waiter in self.waiters.drain(..) {
            if let Some(responder) = waiter.responder {
                let _ = responder.send(Err(err_factory()));
            }
        }
    }

    pub fn outstanding_pings(&self) -> usize {
        self.waiters.len()
    }

    pub fn has_pending_bytes(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Takes the entire write buffer for the caller to flush onto the
    /// socket, leaving an empty buffer behind.
    pub fn take(&mut self) -> Bytes {
        std::mem::take(&mut self.buf).freeze()
    }
}
