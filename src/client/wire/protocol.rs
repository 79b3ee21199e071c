//! Wire types for the text-framed protocol: the JSON payloads carried by
//! `INFO`/`CONNECT`, and the parsed server operations the parser produces.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The `INFO` payload a server sends on connect, and again whenever the
/// topology changes (a peer joins or leaves the pool).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct ServerInfo {
    pub server_id: String,
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub proto: i32,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub max_payload: usize,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub tls_required: bool,
    #[serde(default)]
    pub tls_available: bool,
    #[serde(default)]
    pub connect_urls: Vec<String>,
    #[serde(default)]
    pub client_id: u64,
    #[serde(default)]
    pub client_ip: String,
}

/// The `CONNECT` payload the client sends once it has read `INFO`.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ConnectInfo {
    pub verbose: bool,
    pub pedantic: bool,
    pub tls_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub lang: String,
    pub version: String,
    pub protocol: i32,
    pub echo: bool,
}

/// A decoded server-to-client operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerOp {
    Info(ServerInfo),
    Msg {
        subject: String,
        sid: u64,
        reply: Option<String>,
        payload: Bytes,
    },
    Ping,
    Pong,
    Ok,
    Err(String),
}

/// The wire forms the client may emit. Rendering is handled by
/// [`super::parser::encode`] rather than by `Display`, since a couple of
/// these (`Pub`) need to interleave a raw payload after the header line.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientOp {
    Connect(ConnectInfo),
    Pub {
        subject: String,
        reply: Option<String>,
        payload: Bytes,
    },
    Sub {
        subject: String,
        queue_group: Option<String>,
        sid: u64,
    },
    Unsub {
        sid: u64,
        max_msgs: Option<u64>,
    },
    Ping,
    Pong,
}
