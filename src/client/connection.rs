//! Connection manager: the task that owns the socket, the wire parser, the
//! outbound pipeline, and the subscription registry, and drives the
//! lifecycle state machine between them.
//!
//! State machine: `Disconnected -> Connecting -> Connected`, then on any
//! transport fault back to `Reconnecting -> Connecting` (unless reconnects
//! are disabled or the pool is exhausted, in which case `Closed`). A
//! `drain()` call instead moves `Connected -> DrainingSubs -> DrainingPubs ->
//! Closed`. This one task is the async equivalent of the bus's own
//! single-threaded event loop: everything it owns is reached only by sending
//! it a [`Command`], never by taking a lock from another task.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{rustls, TlsConnector};
use tracing::warn;

use crate::client::callbacks::Callbacks;
use crate::client::options::ClientOptions;
use crate::client::outbound::OutboundPipeline;
use crate::client::pool::{Backoff, ServerPool};
use crate::client::subscription::{DeliveryMode, Handler, Message, Registry, SubscriptionLimits};
use crate::client::wire::{ClientOp, ConnectInfo, Parser, ServerInfo, ServerOp};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    DrainingSubs,
    DrainingPubs,
    Closed,
}

pub enum Command {
    Publish {
        subject: String,
        reply: Option<String>,
        payload: Bytes,
        respond: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        sid: u64,
        subject: String,
        queue_group: Option<String>,
        handler: Handler,
        mode: DeliveryMode,
        max_msgs: Option<u64>,
        respond: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        sid: u64,
        max_msgs: Option<u64>,
        respond: oneshot::Sender<Result<()>>,
    },
    Flush {
        respond: oneshot::Sender<Result<()>>,
    },
    Drain {
        respond: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// Shared, lock-free-ish state the public `Client` handle reads directly
/// without going through the command channel.
pub struct SharedState {
    pub state: RwLock<ConnectionState>,
    pub server_info: RwLock<Option<ServerInfo>>,
    pub stats: Arc<crate::client::stats::Stats>,
}

impl SharedState {
    fn new(stats: Arc<crate::client::stats::Stats>) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(ConnectionState::Disconnected),
            server_info: RwLock::new(None),
            stats,
        })
    }

    fn set(&self, state: ConnectionState) {
        *self.state.write() = state;
    }
}

/// An underlying transport, abstracted over plain TCP and TLS-over-TCP so the
/// rest of the manager doesn't need to care which one it's talking to.
enum BusStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for BusStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            BusStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            BusStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BusStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            BusStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            BusStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            BusStream::Plain(s) => Pin::new(s).poll_flush(cx),
            BusStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            BusStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            BusStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

enum DriveExit {
    UserClosed,
    Drained,
    Transport(Error),
}

pub struct Manager {
    options: Arc<ClientOptions>,
    callbacks: Callbacks,
    pool: ServerPool,
    backoff: Backoff,
    shared: Arc<SharedState>,
    registry: Registry,
    outbound: OutboundPipeline,
    cmd_rx: mpsc::Receiver<Command>,
    tls_connector: Option<TlsConnector>,
    /// Held from the moment a `drain()` call starts draining until `drive()`
    /// actually finishes (or fails) draining; resolved there, never at the
    /// moment draining merely begins.
    drain_respond: Option<oneshot::Sender<Result<()>>>,
}

impl Manager {
    /// Spawns the manager task and returns the handles the public `Client`
    /// needs. `ready_rx` resolves once, with the outcome of the very first
    /// connection attempt; later reconnects after a drop don't touch it.
    pub fn spawn(
        options: Arc<ClientOptions>,
        stats: Arc<crate::client::stats::Stats>,
    ) -> Result<(Arc<SharedState>, mpsc::Sender<Command>, oneshot::Receiver<Result<()>>)> {
        let pool = ServerPool::new(&options.servers, options.randomize_servers)?;
        let backoff = Backoff::new(options.reconnect_base(), options.reconnect_max());
        let shared = SharedState::new(stats);
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let tls_connector = build_tls_connector(&options)?;
        let (ready_tx, ready_rx) = oneshot::channel();

        let manager = Manager {
            callbacks: options.callbacks.clone(),
            options,
            pool,
            backoff,
            shared: shared.clone(),
            registry: Registry::new(),
            outbound: OutboundPipeline::new(),
            cmd_rx,
            tls_connector,
            drain_respond: None,
        };

        tokio::spawn(manager.run(ready_tx));
        Ok((shared, cmd_tx, ready_rx))
    }

    async fn run(mut self, mut ready: Option<oneshot::Sender<Result<()>>>) {
        let mut connected_once = false;
        loop {
            self.shared.set(ConnectionState::Connecting);
            match self.connect_once().await {
                Ok((stream, info)) => {
                    *self.shared.server_info.write() = Some(info);
                    self.backoff.reset();
                    self.shared.set(ConnectionState::Connected);
                    if connected_once {
                        self.callbacks.fire_reconnected().await;
                    } else {
                        self.callbacks.fire_connected().await;
                        connected_once = true;
                    }
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Ok(()));
                    }

                    // The new socket knows nothing of subscriptions made
                    // before a drop; re-emit SUB for every one still live so
                    // the broker resumes delivering to it.
                    for sid in self.registry.sids() {
                        if let Some(subject) = self.registry.subject_of(sid) {
                            let queue_group =
                                self.registry.queue_group_of(sid).flatten().map(str::to_string);
                            self.outbound.enqueue(&ClientOp::Sub {
                                subject: subject.to_string(),
                                queue_group,
                                sid,
                            });
                        }
                    }

                    match self.drive(stream).await {
                        DriveExit::UserClosed => {
                            self.shared.set(ConnectionState::Closed);
                            if let Some(tx) = self.drain_respond.take() {
                                let _ = tx.send(Err(Error::ConnectionClosed));
                            }
                            self.callbacks.fire_closed().await;
                            return;
                        }
                        DriveExit::Drained => {
                            self.shared.set(ConnectionState::Closed);
                            if let Some(tx) = self.drain_respond.take() {
                                let _ = tx.send(Ok(()));
                            }
                            self.callbacks.fire_closed().await;
                            return;
                        }
                        DriveExit::Transport(err) => {
                            // A fault while draining (timeout or otherwise)
                            // still proceeds straight to Closed, regardless
                            // of allow_reconnect or pool exhaustion.
                            let was_draining = matches!(
                                *self.shared.state.read(),
                                ConnectionState::DrainingSubs | ConnectionState::DrainingPubs
                            );
                            self.shared.stats.record_error();
                            self.outbound.fail_all_waiters(|| Error::ConnectionClosed);

                            if was_draining {
                                let drain_err = if matches!(&err, Error::DrainTimeout) {
                                    Error::DrainTimeout
                                } else {
                                    Error::ConnectionClosed
                                };
                                self.shared.set(ConnectionState::Closed);
                                if let Some(tx) = self.drain_respond.take() {
                                    let _ = tx.send(Err(drain_err));
                                }
                                self.callbacks.fire_error(err).await;
                                self.callbacks.fire_closed().await;
                                return;
                            }

                            self.callbacks.fire_error(err).await;
                            self.callbacks.fire_disconnected().await;
                        }
                    }
                }
                Err(err) => {
                    self.callbacks.fire_error(err).await;
                }
            }

            if !self.options.allow_reconnect || self.pool.exhausted(self.options.max_reconnect_attempts) {
                self.shared.set(ConnectionState::Closed);
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(Error::NoServers));
                } else {
                    self.callbacks.fire_error(Error::NoServers).await;
                }
                self.callbacks.fire_closed().await;
                return;
            }

            self.shared.set(ConnectionState::Reconnecting);
            self.shared.stats.record_reconnect();
            tokio::time::sleep(self.backoff.next_delay()).await;
        }
    }

    async fn connect_once(&mut self) -> Result<(BusStream, ServerInfo)> {
        let Some(idx) = self.pool.next_candidate() else { return Err(Error::NoServers) };
        self.pool.mark_attempt(idx);
        let endpoint = self.pool.endpoint(idx).clone();

        let attempt = async {
            let tcp = TcpStream::connect(endpoint.authority()).await?;
            tcp.set_nodelay(true).ok();

            let mut parser = Parser::new();
            let mut raw = tcp;
            let mut info = read_info(&mut raw, &mut parser).await?;

            let mut stream = if endpoint.tls_required || info.tls_required {
                let connector = self
                    .tls_connector
                    .clone()
                    .ok_or_else(|| Error::Config("tls required but no tls connector configured".into()))?;
                let name = ServerName::try_from(endpoint.host.clone())
                    .map_err(|_| Error::InvalidUrl(endpoint.host.clone(), "invalid dns name".into()))?;
                BusStream::Tls(Box::new(connector.connect(name, raw).await?))
            } else {
                BusStream::Plain(raw)
            };

            let connect_info = ConnectInfo {
                verbose: false,
                pedantic: false,
                tls_required: endpoint.tls_required,
                auth_token: self.options.auth_token.clone().or_else(|| endpoint.pass.clone()),
                user: self.options.user.clone().or_else(|| endpoint.user.clone()),
                pass: self.options.pass.clone(),
                name: self.options.name.clone(),
                lang: "rust".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                protocol: 1,
                echo: self.options.echo,
            };
            stream.write_all(&crate::client::wire::encode(&ClientOp::Connect(connect_info))).await?;
            stream.write_all(&crate::client::wire::encode(&ClientOp::Ping)).await?;
            stream.flush().await?;

            // Confirm the handshake before declaring the connection usable:
            // an auth rejection (or any other -ERR) arrives here rather than
            // as an async error on an already-in-use connection.
            let mut read_buf = [0u8; 4096];
            loop {
                match parser.next_op()? {
                    Some(ServerOp::Pong) => break,
                    Some(ServerOp::Err(msg)) => return Err(classify_server_error(&msg)),
                    Some(ServerOp::Info(extra)) => info = extra,
                    Some(ServerOp::Ping) => {
                        stream.write_all(&crate::client::wire::encode(&ClientOp::Pong)).await?;
                    }
                    Some(_) => {}
                    None => {
                        let n = stream.read(&mut read_buf).await?;
                        if n == 0 {
                            return Err(Error::ConnectionClosed);
                        }
                        parser.feed(&read_buf[..n]);
                    }
                }
            }

            Ok::<_, Error>((stream, info))
        };

        match tokio::time::timeout(self.options.connect_timeout(), attempt).await {
            Ok(Ok((stream, info))) => {
                self.pool.mark_success(idx);
                self.pool.merge_discovered(&info.connect_urls);
                Ok((stream, info))
            }
            Ok(Err(err)) => {
                self.pool.mark_failure(idx);
                Err(err)
            }
            Err(_) => {
                self.pool.mark_failure(idx);
                Err(Error::Timeout)
            }
        }
    }

    async fn drive(&mut self, stream: BusStream) -> DriveExit {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut parser = Parser::new();
        let mut read_buf = [0u8; 16 * 1024];
        let mut ping_interval = tokio::time::interval(self.options.ping_interval());
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping_interval.tick().await; // first tick fires immediately; skip it

        let mut draining = false;
        let mut drain_deadline: Option<Instant> = None;
        // Ticks only while draining, so the loop wakes up on its own to
        // re-check dispatcher completion even when no bytes are arriving.
        let mut drain_poll = tokio::time::interval(std::time::Duration::from_millis(20));
        drain_poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if let Some(deadline) = drain_deadline {
                if Instant::now() >= deadline {
                    return DriveExit::Transport(Error::DrainTimeout);
                }
            }

            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if let Some(exit) = self.handle_command(cmd, &mut draining, &mut drain_deadline) {
                                self.flush_buffer(&mut writer).await.ok();
                                return exit;
                            }
                        }
                        None => return DriveExit::UserClosed,
                    }
                }

                n = reader.read(&mut read_buf) => {
                    match n {
                        Ok(0) => return DriveExit::Transport(Error::ConnectionClosed),
                        Ok(n) => {
                            parser.feed(&read_buf[..n]);
                            if let Err(err) = self.drain_parsed_ops(&mut parser).await {
                                return DriveExit::Transport(err);
                            }
                        }
                        Err(err) => return DriveExit::Transport(err.into()),
                    }
                }

                _ = ping_interval.tick(), if !draining => {
                    if self.outbound.outstanding_pings() >= self.options.max_outstanding_pings as usize {
                        return DriveExit::Transport(Error::StaleConnection);
                    }
                    self.outbound.send_ping(None);
                }

                _ = drain_poll.tick(), if draining => {}
            }

            if self.outbound.has_pending_bytes() {
                if let Err(err) = self.flush_buffer(&mut writer).await {
                    return DriveExit::Transport(err);
                }
            }

            if draining {
                let subs_drained = self.registry.drain_progress();
                if subs_drained {
                    self.shared.set(ConnectionState::DrainingPubs);
                    if !self.outbound.has_pending_bytes() {
                        return DriveExit::Drained;
                    }
                }
            }
        }
    }

    fn handle_command(
        &mut self,
        cmd: Command,
        draining: &mut bool,
        drain_deadline: &mut Option<Instant>,
    ) -> Option<DriveExit> {
        // Once a drain is in progress, only `Drain` (idempotent no-op) and
        // `Close` are honored; everything else is rejected so the caller
        // doesn't hang waiting on a reply that would otherwise never come
        // (the normal command path is paused for the rest of the drain).
        if *draining {
            match cmd {
                Command::Drain { respond } => {
                    let _ = respond.send(Ok(()));
                }
                Command::Close => return Some(DriveExit::UserClosed),
                Command::Publish { respond, .. } => {
                    let _ = respond.send(Err(Error::ConnectionDraining));
                }
                Command::Subscribe { respond, .. } => {
                    let _ = respond.send(Err(Error::ConnectionDraining));
                }
                Command::Unsubscribe { respond, .. } => {
                    let _ = respond.send(Err(Error::ConnectionDraining));
                }
                Command::Flush { respond } => {
                    let _ = respond.send(Err(Error::ConnectionDraining));
                }
            }
            return None;
        }

        match cmd {
            Command::Publish { subject, reply, payload, respond } => {
                self.shared.stats.record_out(payload.len());
                self.outbound.enqueue(&ClientOp::Pub { subject, reply, payload });
                let _ = respond.send(Ok(()));
            }
            Command::Subscribe { sid, subject, queue_group, handler, mode, max_msgs, respond } => {
                self.outbound.enqueue(&ClientOp::Sub {
                    subject: subject.clone(),
                    queue_group: queue_group.clone(),
                    sid,
                });
                if max_msgs.is_some() {
                    // A real UNSUB sid max right after SUB: the server stops
                    // delivering once the cap is hit instead of relying on a
                    // later client-side unsubscribe to land in time.
                    self.outbound.enqueue(&ClientOp::Unsub { sid, max_msgs });
                }
                self.registry.insert(
                    sid,
                    subject,
                    queue_group,
                    handler,
                    mode,
                    SubscriptionLimits {
                        pending_msgs_limit: self.options.pending_msgs_limit,
                        pending_bytes_limit: self.options.pending_bytes_limit,
                    },
                    max_msgs,
                );
                let _ = respond.send(Ok(()));
            }
            Command::Unsubscribe { sid, max_msgs, respond } => {
                if max_msgs.is_some() {
                    self.registry.set_max_msgs(sid, max_msgs);
                    self.outbound.enqueue(&ClientOp::Unsub { sid, max_msgs });
                } else {
                    self.outbound.enqueue(&ClientOp::Unsub { sid, max_msgs: None });
                    self.registry.remove(sid);
                }
                let _ = respond.send(Ok(()));
            }
            Command::Flush { respond } => {
                self.outbound.send_ping(Some(respond));
            }
            Command::Drain { respond } => {
                *draining = true;
                *drain_deadline = Some(Instant::now() + self.options.drain_timeout());
                self.shared.set(ConnectionState::DrainingSubs);
                // Unsubscribe everything and drop each subscription's sender
                // so its dispatcher drains whatever is already queued and
                // exits on its own; the drive loop polls drain_progress()
                // to learn when every one has actually finished before
                // moving on to DrainingPubs.
                for sid in self.registry.sids() {
                    self.outbound.enqueue(&ClientOp::Unsub { sid, max_msgs: None });
                }
                self.registry.begin_drain();
                // Held, not answered here: the caller's future only
                // resolves once drive() actually finishes draining (or
                // times out), not the moment draining starts.
                self.drain_respond = Some(respond);
            }
            Command::Close => return Some(DriveExit::UserClosed),
        }
        None
    }

    async fn drain_parsed_ops(&mut self, parser: &mut Parser) -> Result<()> {
        while let Some(op) = parser.next_op()? {
            match op {
                ServerOp::Info(info) => {
                    self.pool.merge_discovered(&info.connect_urls);
                    *self.shared.server_info.write() = Some(info);
                }
                ServerOp::Msg { subject, sid, reply, payload } => {
                    self.shared.stats.record_in(payload.len());
                    let max = payload.len();
                    if max > self.max_payload() {
                        return Err(Error::MaxPayload { size: max, max_payload: self.max_payload() });
                    }
                    match self.registry.route(sid, Message { subject, reply, payload, sid }) {
                        Ok(true) => {
                            self.registry.remove(sid);
                        }
                        Ok(false) => {}
                        Err(err) => {
                            warn!(error = %err, "dropped message");
                            self.shared.stats.record_error();
                            self.callbacks.fire_error(err).await;
                        }
                    }
                }
                ServerOp::Ping => self.outbound.enqueue(&ClientOp::Pong),
                ServerOp::Pong => {
                    self.outbound.resolve_next_pong();
                }
                ServerOp::Ok => {}
                ServerOp::Err(msg) => {
                    let err = classify_server_error(&msg);
                    warn!(error = %msg, "server reported error");
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn max_payload(&self) -> usize {
        self.shared.server_info.read().as_ref().map(|i| i.max_payload).unwrap_or(usize::MAX)
    }

    async fn flush_buffer<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> Result<()> {
        let bytes = self.outbound.take();
        if !bytes.is_empty() {
            writer.write_all(&bytes).await?;
            writer.flush().await?;
        }
        Ok(())
    }
}

async fn read_info(stream: &mut TcpStream, parser: &mut Parser) -> Result<ServerInfo> {
    let mut buf = [0u8; 4096];
    loop {
        if let Some(ServerOp::Info(info)) = parser.next_op()? {
            return Ok(info);
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        parser.feed(&buf[..n]);
    }
}

fn classify_server_error(msg: &str) -> Error {
    let lower = msg.to_ascii_lowercase();
    if lower.contains("stale connection") {
        Error::StaleConnection
    } else if lower.contains("authorization violation") || lower.contains("auth") {
        Error::AuthorizationViolation
    } else if lower.contains("permissions violation") {
        Error::PermissionsViolation(msg.to_string())
    } else if lower.contains("user authentication expired") || lower.contains("invalid credentials") {
        Error::InvalidUserCredentials
    } else {
        Error::ProtocolError(msg.to_string())
    }
}

/// Built unconditionally: whether TLS is actually used is decided per-server,
/// from either the connection string (`bus+tls://`) or the server's own
/// `INFO.tls_required`, not just the caller's options.
fn build_tls_connector(_options: &ClientOptions) -> Result<Option<TlsConnector>> {
    // Idempotent: ignore the error from a second install within the process.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        let _ = roots.add(cert);
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Some(TlsConnector::from(Arc::new(config))))
}

impl From<ConnectionState> for &'static str {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::DrainingSubs => "draining_subs",
            ConnectionState::DrainingPubs => "draining_pubs",
            ConnectionState::Closed => "closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_server_errors() {
        assert!(matches!(classify_server_error("Stale Connection"), Error::StaleConnection));
        assert!(matches!(
            classify_server_error("Authorization Violation"),
            Error::AuthorizationViolation
        ));
        assert!(matches!(
            classify_server_error("Permissions Violation for Subscription"),
            Error::PermissionsViolation(_)
        ));
        assert!(matches!(classify_server_error("Unknown Protocol Operation"), Error::ProtocolError(_)));
    }

    #[test]
    fn state_names_are_stable() {
        let name: &'static str = ConnectionState::Connected.into();
        assert_eq!(name, "connected");
    }
}
