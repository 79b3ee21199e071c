//! Error taxonomy for the client.
//!
//! Synchronous call-site failures (bad URL, connection closed, oversized payload)
//! are returned directly. Asynchronous failures (server `-ERR`, slow consumer,
//! transport faults already being recovered) are delivered through `error_cb`
//! instead, so most of these variants are constructed in exactly one place.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The server pool was exhausted before a connection could be established.
    #[error("no servers available to connect to")]
    NoServers,

    /// An operation was attempted on a connection that has already closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// An operation was rejected because `drain()` is in progress.
    #[error("connection is draining")]
    ConnectionDraining,

    /// `drain()` did not complete within its configured deadline.
    #[error("drain did not complete before its deadline")]
    DrainTimeout,

    /// A publish payload exceeded the server-advertised `max_payload`.
    #[error("payload of {size} bytes exceeds max_payload of {max_payload} bytes")]
    MaxPayload { size: usize, max_payload: usize },

    /// A timed operation (`flush`, `timed_request`, `drain`) did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// The subscription identifier referenced does not exist, or was already closed.
    #[error("unknown or closed subscription {0}")]
    BadSubscription(u64),

    /// A subscription's pending queue overflowed and a message was dropped.
    #[error("slow consumer on subscription {sid} ({subject}): message dropped")]
    SlowConsumer { sid: u64, subject: String },

    /// The server reported `-ERR 'Stale Connection'`.
    #[error("stale connection")]
    StaleConnection,

    /// The server reported `-ERR 'Authorization Violation'`.
    #[error("authorization violation")]
    AuthorizationViolation,

    /// The server reported `-ERR 'Permissions Violation'`.
    #[error("permissions violation: {0}")]
    PermissionsViolation(String),

    /// The wire parser, or the server, reported bytes that do not match any known operation.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The server rejected the credentials supplied at connect time.
    #[error("invalid user credentials")]
    InvalidUserCredentials,

    /// A user callback panicked; the payload is included when it is a plain string.
    #[error("callback panicked: {0}")]
    InvalidCallbackType(String),

    /// A connection string could not be parsed into host/port/credentials.
    #[error("invalid server url {0:?}: {1}")]
    InvalidUrl(String, String),

    /// A configuration value was missing or out of range.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
