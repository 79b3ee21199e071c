//! Incremental decoder for the server's half of the protocol, and the encoder
//! for the client's half.
//!
//! The decoder is fed arbitrary, possibly-partial chunks as they arrive off
//! the socket and yields complete [`ServerOp`]s as soon as enough bytes have
//! accumulated. It never assumes a read lines up with a frame boundary.

use bytes::{Buf, Bytes, BytesMut};

use crate::client::wire::protocol::{ClientOp, ServerInfo, ServerOp};
use crate::error::{Error, Result};

const CRLF: &[u8] = b"\r\n";

#[derive(Debug)]
enum State {
    AwaitingControlLine,
    AwaitingPayload { subject: String, sid: u64, reply: Option<String>, len: usize },
}

/// Stateful decoder. Owns an internal buffer; the caller only ever appends
/// to it and asks for the next complete operation.
#[derive(Debug)]
pub struct Parser {
    buf: BytesMut,
    state: State,
}

impl Default for Parser {
    fn default() -> Self {
        Self { buf: BytesMut::with_capacity(4096), state: State::AwaitingControlLine }
    }
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pops the next complete operation, or `Ok(None)` if more bytes are needed.
    pub fn next_op(&mut self) -> Result<Option<ServerOp>> {
        loop {
            match &self.state {
                State::AwaitingControlLine => {
                    let Some(idx) = find_crlf(&self.buf) else { return Ok(None) };
                    let line = self.buf.split_to(idx);
                    self.buf.advance(2); // the CRLF itself
                    if line.is_empty() {
                        continue;
                    }
                    match self.parse_control_line(&line)? {
                        ControlLine::Op(op) => return Ok(Some(op)),
                        ControlLine::AwaitPayload { subject, sid, reply, len } => {
                            self.state = State::AwaitingPayload { subject, sid, reply, len };
                        }
                    }
                }
                State::AwaitingPayload { len, .. } => {
                    let len = *len;
                    if self.buf.len() < len + 2 {
                        return Ok(None);
                    }
                    let State::AwaitingPayload { subject, sid, reply, .. } =
                        std::mem::replace(&mut self.state, State::AwaitingControlLine)
                    else {
                        unreachable!()
                    };
                    let payload = self.buf.split_to(len).freeze();
                    if &self.buf[..2] != CRLF {
                        return Err(Error::ProtocolError(
                            "message payload not terminated by CRLF".into(),
                        ));
                    }
                    self.buf.advance(2);
                    return Ok(Some(ServerOp::Msg { subject, sid, reply, payload }));
                }
            }
        }
    }

    fn parse_control_line(&self, line: &[u8]) -> Result<ControlLine> {
        let text = std::str::from_utf8(line)
            .map_err(|_| Error::ProtocolError("non-utf8 control line".into()))?;
        let mut parts = text.splitn(2, char::is_whitespace);
        let op = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().trim_start();

        match op.to_ascii_uppercase().as_str() {
            "INFO" => {
                let info: ServerInfo = serde_json::from_str(rest)?;
                Ok(ControlLine::Op(ServerOp::Info(info)))
            }
            "MSG" => self.parse_msg_args(rest),
            "PING" => Ok(ControlLine::Op(ServerOp::Ping)),
            "PONG" => Ok(ControlLine::Op(ServerOp::Pong)),
            "+OK" => Ok(ControlLine::Op(ServerOp::Ok)),
            "-ERR" => {
                let msg = rest.trim().trim_matches('\'').to_string();
                Ok(ControlLine::Op(ServerOp::Err(msg)))
            }
            other => Err(Error::ProtocolError(format!("unknown server operation {other:?}"))),
        }
    }

    fn parse_msg_args(&self, rest: &str) -> Result<ControlLine> {
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let (subject, sid, reply, len) = match fields.as_slice() {
            [subject, sid, len] => (*subject, *sid, None, *len),
            [subject, sid, reply, len] => (*subject, *sid, Some(*reply), *len),
            _ => return Err(Error::ProtocolError(format!("malformed MSG arguments: {rest:?}"))),
        };
        let sid: u64 = sid
            .parse()
            .map_err(|_| Error::ProtocolError(format!("malformed MSG sid: {sid:?}")))?;
        let len: usize = len
            .parse()
            .map_err(|_| Error::ProtocolError(format!("malformed MSG length: {len:?}")))?;
        Ok(ControlLine::AwaitPayload {
            subject: subject.to_string(),
            sid,
            reply: reply.map(str::to_string),
            len,
        })
    }
}

enum ControlLine {
    Op(ServerOp),
    AwaitPayload { subject: String, sid: u64, reply: Option<String>, len: usize },
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Renders a client operation as the bytes that go on the wire, including
/// the trailing CRLF (and, for `PUB`, the payload and its own trailing CRLF).
pub fn encode(op: &ClientOp) -> Bytes {
    let mut out = BytesMut::new();
    match op {
        ClientOp::Connect(info) => {
            out.extend_from_slice(b"CONNECT ");
            out.extend_from_slice(
                &serde_json::to_vec(info).expect("ConnectInfo always serializes"),
            );
            out.extend_from_slice(CRLF);
        }
        ClientOp::Pub { subject, reply, payload } => {
            out.extend_from_slice(b"PUB ");
            out.extend_from_slice(subject.as_bytes());
            if let Some(reply) = reply {
                out.extend_from_slice(b" ");
                out.extend_from_slice(reply.as_bytes());
            }
            out.extend_from_slice(format!(" {}", payload.len()).as_bytes());
            out.extend_from_slice(CRLF);
            out.extend_from_slice(payload);
            out.extend_from_slice(CRLF);
        }
        ClientOp::Sub { subject, queue_group, sid } => {
            out.extend_from_slice(b"SUB ");
            out.extend_from_slice(subject.as_bytes());
            if let Some(queue) = queue_group {
                out.extend_from_slice(b" ");
                out.extend_from_slice(queue.as_bytes());
            }
            out.extend_from_slice(format!(" {sid}").as_bytes());
            out.extend_from_slice(CRLF);
        }
        ClientOp::Unsub { sid, max_msgs } => {
            out.extend_from_slice(b"UNSUB ");
            out.extend_from_slice(format!("{sid}").as_bytes());
            if let Some(max) = max_msgs {
                out.extend_from_slice(format!(" {max}").as_bytes());
            }
            out.extend_from_slice(CRLF);
        }
        ClientOp::Ping => out.extend_from_slice(b"PING\r\n"),
        ClientOp::Pong => out.extend_from_slice(b"PONG\r\n"),
    }
    out.freeze()
}
