//! A minimal in-process broker that speaks enough of the wire protocol to
//! exercise a real client end to end: `INFO` on connect, `CONNECT`/`PING`/
//! `PONG` handshake, `SUB`/`UNSUB`/`PUB` with subject matching including `*`
//! and `>` wildcards, and reply-subject passthrough for request/reply.
//!
//! This intentionally does not implement every corner of the protocol (no
//! real credential checking, no cluster `connect_urls`) — just enough for
//! the client under test to be unable to tell the difference for the
//! scenarios these tests cover. [`MiniBroker::start_rejecting_auth`] covers
//! the one auth-adjacent case these tests need: a broker that always turns
//! the handshake `PING` into `-ERR`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Default)]
struct SharedState {
    clients: HashMap<u64, mpsc::UnboundedSender<Bytes>>,
    subs: HashMap<u64, Vec<(u64, String)>>,
    connection_tasks: Vec<JoinHandle<()>>,
}

pub struct MiniBroker {
    addr: SocketAddr,
    accept_task: JoinHandle<()>,
    state: Arc<Mutex<SharedState>>,
}

impl MiniBroker {
    pub async fn start() -> Self {
        Self::start_with_max_payload(1024 * 1024).await
    }

    pub async fn start_with_max_payload(max_payload: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind broker listener");
        Self::from_listener(listener, max_payload, false)
    }

    /// Rebinds a broker on a specific address, used by reconnect tests to
    /// simulate a server coming back up on the same port after a restart.
    pub async fn start_on(addr: SocketAddr, max_payload: usize) -> Self {
        let listener = TcpListener::bind(addr).await.expect("rebind broker listener");
        Self::from_listener(listener, max_payload, false)
    }

    /// A broker that answers every handshake's `PING` with
    /// `-ERR 'Authorization Violation'` instead of `PONG`, then closes the
    /// socket, to exercise connect-time auth rejection.
    pub async fn start_rejecting_auth() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind broker listener");
        Self::from_listener(listener, 1024 * 1024, true)
    }

    fn from_listener(listener: TcpListener, max_payload: usize, reject_auth: bool) -> Self {
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(SharedState::default()));
        let next_client_id = Arc::new(AtomicU64::new(1));

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else { return };
                let conn_state = accept_state.clone();
                let client_id = next_client_id.fetch_add(1, Ordering::SeqCst);
                let handle =
                    tokio::spawn(handle_connection(socket, client_id, conn_state, max_payload, reject_auth));
                accept_state.lock().unwrap().connection_tasks.push(handle);
            }
        });

        Self { addr, accept_task, state }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn servers(&self) -> String {
        self.addr.to_string()
    }

    /// Stops accepting new connections and forcibly drops every live one,
    /// so a client on the other end sees its socket close.
    pub async fn stop(self) {
        self.accept_task.abort();
        for task in self.state.lock().unwrap().connection_tasks.drain(..) {
            task.abort();
        }
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    client_id: u64,
    state: Arc<Mutex<SharedState>>,
    max_payload: usize,
    reject_auth: bool,
) {
    let info = format!(
        "INFO {{\"server_id\":\"minibroker\",\"version\":\"0.0.0\",\"proto\":1,\"max_payload\":{max_payload},\"tls_required\":false}}\r\n"
    );
    if socket.write_all(info.as_bytes()).await.is_err() {
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    state.lock().unwrap().clients.insert(client_id, tx);

    let (mut read_half, mut write_half) = socket.into_split();

    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                return;
            }
        }
    });

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);

        loop {
            let Some(line_end) = find_crlf(&buf) else { break };
            let line = buf[..line_end].to_vec();
            let rest_start = line_end + 2;

            let text = String::from_utf8_lossy(&line).to_string();
            let mut parts = text.splitn(2, char::is_whitespace);
            let op = parts.next().unwrap_or_default().to_ascii_uppercase();
            let args = parts.next().unwrap_or_default().trim();

            match op.as_str() {
                "CONNECT" => {
                    buf.drain(..rest_start);
                }
                "PING" => {
                    buf.drain(..rest_start);
                    if reject_auth {
                        send(
                            &state,
                            client_id,
                            Bytes::from_static(b"-ERR 'Authorization Violation'\r\n"),
                        );
                        // Give the writer task a beat to flush the -ERR before
                        // the socket closes out from under it.
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        state.lock().unwrap().clients.remove(&client_id);
                        state.lock().unwrap().subs.remove(&client_id);
                        writer_task.abort();
                        return;
                    }
                    send(&state, client_id, Bytes::from_static(b"PONG\r\n"));
                }
                "PONG" => {
                    buf.drain(..rest_start);
                }
                "SUB" => {
                    buf.drain(..rest_start);
                    let fields: Vec<&str> = args.split_whitespace().collect();
                    let (subject, sid) = match fields.as_slice() {
                        [subject, sid] => (subject.to_string(), *sid),
                        [subject, _queue, sid] => (subject.to_string(), *sid),
                        _ => continue,
                    };
                    if let Ok(sid) = sid.parse::<u64>() {
                        state.lock().unwrap().subs.entry(client_id).or_default().push((sid, subject));
                    }
                }
                "UNSUB" => {
                    buf.drain(..rest_start);
                    if let Some(sid_str) = args.split_whitespace().next() {
                        if let Ok(sid) = sid_str.parse::<u64>() {
                            if let Some(subs) = state.lock().unwrap().subs.get_mut(&client_id) {
                                subs.retain(|(s, _)| *s != sid);
                            }
                        }
                    }
                }
                "PUB" => {
                    let fields: Vec<&str> = args.split_whitespace().collect();
                    let (subject, reply, len) = match fields.as_slice() {
                        [subject, len] => (subject.to_string(), None, *len),
                        [subject, reply, len] => (subject.to_string(), Some(reply.to_string()), *len),
                        _ => {
                            buf.drain(..rest_start);
                            continue;
                        }
                    };
                    let Ok(len) = len.parse::<usize>() else {
                        buf.drain(..rest_start);
                        continue;
                    };
                    if buf.len() < rest_start + len + 2 {
                        break; // wait for the rest of the payload
                    }
                    let payload = buf[rest_start..rest_start + len].to_vec();
                    buf.drain(..rest_start + len + 2);
                    broadcast(&state, &subject, reply.as_deref(), &payload);
                }
                _ => {
                    buf.drain(..rest_start);
                }
            }
        }
    }

    state.lock().unwrap().clients.remove(&client_id);
    state.lock().unwrap().subs.remove(&client_id);
    writer_task.abort();
}

fn send(state: &Arc<Mutex<SharedState>>, client_id: u64, bytes: Bytes) {
    if let Some(tx) = state.lock().unwrap().clients.get(&client_id) {
        let _ = tx.send(bytes);
    }
}

fn broadcast(state: &Arc<Mutex<SharedState>>, subject: &str, reply: Option<&str>, payload: &[u8]) {
    let guard = state.lock().unwrap();
    for (client_id, subs) in guard.subs.iter() {
        for (sid, sub_subject) in subs {
            if subject_matches(sub_subject, subject) {
                let mut frame = format!("MSG {subject} {sid}");
                if let Some(reply) = reply {
                    frame.push(' ');
                    frame.push_str(reply);
                }
                frame.push_str(&format!(" {}\r\n", payload.len()));
                let mut bytes = frame.into_bytes();
                bytes.extend_from_slice(payload);
                bytes.extend_from_slice(b"\r\n");
                if let Some(tx) = guard.clients.get(client_id) {
                    let _ = tx.send(Bytes::from(bytes));
                }
            }
        }
    }
}

fn subject_matches(pattern: &str, subject: &str) -> bool {
    let pattern_tokens: Vec<&str> = pattern.split('.').collect();
    let subject_tokens: Vec<&str> = subject.split('.').collect();

    let mut pi = 0;
    let mut si = 0;
    while pi < pattern_tokens.len() {
        match pattern_tokens[pi] {
            ">" => return true,
            "*" => {
                if si >= subject_tokens.len() {
                    return false;
                }
            }
            lit => {
                if si >= subject_tokens.len() || subject_tokens[si] != lit {
                    return false;
                }
            }
        }
        pi += 1;
        si += 1;
    }
    si == subject_tokens.len()
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_subject_matches_itself() {
        assert!(subject_matches("foo.bar", "foo.bar"));
        assert!(!subject_matches("foo.bar", "foo.baz"));
    }

    #[test]
    fn star_matches_one_token() {
        assert!(subject_matches("foo.*", "foo.bar"));
        assert!(!subject_matches("foo.*", "foo.bar.baz"));
    }

    #[test]
    fn gt_matches_remaining_tokens() {
        assert!(subject_matches("foo.>", "foo.bar.baz"));
        assert!(subject_matches("foo.>", "foo.bar"));
        assert!(!subject_matches("foo.>", "foo"));
    }
}
