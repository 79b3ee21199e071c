//! Client configuration: the knobs governing reconnects, timeouts, inbox
//! naming, and the lifecycle callbacks, plus the same
//! read-file/parse-toml/validate loading convention used for the bus's own
//! configuration elsewhere in this crate.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::client::callbacks::Callbacks;
use crate::error::{Error, Result};

fn default_servers() -> String {
    "localhost:4222".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_reconnect_attempts() -> i64 {
    60
}
fn default_reconnect_base_ms() -> u64 {
    100
}
fn default_reconnect_max_ms() -> u64 {
    10_000
}
fn default_ping_interval_secs() -> u64 {
    120
}
fn default_max_outstanding_pings() -> u32 {
    2
}
fn default_pending_msgs_limit() -> usize {
    65_536
}
fn default_pending_bytes_limit() -> usize {
    64 * 1024 * 1024
}
fn default_drain_timeout_ms() -> u64 {
    30_000
}
fn default_flush_timeout_ms() -> u64 {
    10_000
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}

/// Declarative, serde-deserializable configuration for a [`Client`](super::Client).
///
/// Built either via [`ClientOptionsBuilder`] or loaded from TOML with
/// [`ClientOptions::load`]; either way it passes through [`ClientOptions::validate`]
/// before a client is ever built from it.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientOptions {
    #[serde(default = "default_servers")]
    pub servers: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pass: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub tls_required: bool,
    #[serde(default = "default_true")]
    pub randomize_servers: bool,
    #[serde(default = "default_true")]
    pub allow_reconnect: bool,
    /// Negative means unlimited reconnect attempts per endpoint; zero means
    /// an endpoint is never retried after its first failure.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: i64,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_max_outstanding_pings")]
    pub max_outstanding_pings: u32,
    #[serde(default = "default_pending_msgs_limit")]
    pub pending_msgs_limit: usize,
    #[serde(default = "default_pending_bytes_limit")]
    pub pending_bytes_limit: usize,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub echo: bool,
    #[serde(default)]
    pub inbox_prefix: Option<String>,

    /// Lifecycle callbacks aren't representable in TOML; they're always
    /// attached programmatically via the builder after loading.
    #[serde(skip)]
    pub callbacks: Callbacks,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            name: None,
            user: None,
            pass: None,
            auth_token: None,
            tls_required: false,
            randomize_servers: true,
            allow_reconnect: true,
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            ping_interval_secs: default_ping_interval_secs(),
            max_outstanding_pings: default_max_outstanding_pings(),
            pending_msgs_limit: default_pending_msgs_limit(),
            pending_bytes_limit: default_pending_bytes_limit(),
            drain_timeout_ms: default_drain_timeout_ms(),
            flush_timeout_ms: default_flush_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            echo: true,
            inbox_prefix: None,
            callbacks: Callbacks::default(),
        }
    }
}

impl ClientOptions {
    pub fn builder() -> ClientOptionsBuilder {
        ClientOptionsBuilder::default()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn inbox_prefix(&self) -> &str {
        self.inbox_prefix.as_deref().unwrap_or("_INBOX")
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.servers.trim().is_empty() {
            return Err(Error::Config("servers must not be empty".into()));
        }
        if self.ping_interval_secs == 0 {
            return Err(Error::Config("ping_interval_secs must be greater than zero".into()));
        }
        if self.max_outstanding_pings == 0 {
            return Err(Error::Config("max_outstanding_pings must be greater than zero".into()));
        }
        if self.pending_msgs_limit == 0 {
            return Err(Error::Config("pending_msgs_limit must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Fluent builder mirroring the shape of [`ClientOptions`]; used when
/// constructing options programmatically rather than loading them from disk.
#[derive(Debug, Clone, Default)]
pub struct ClientOptionsBuilder {
    opts: ClientOptionsInner,
}

#[derive(Debug, Clone)]
struct ClientOptionsInner(ClientOptions);

impl Default for ClientOptionsInner {
    fn default() -> Self {
        Self(ClientOptions::default())
    }
}

macro_rules! builder_setter {
    ($name:ident, $ty:ty) => {
        pub fn $name(mut self, value: $ty) -> Self {
            self.opts.0.$name = value;
            self
        }
    };
}

impl ClientOptionsBuilder {
    pub fn servers(mut self, servers: impl Into<String>) -> Self {
        self.opts.0.servers = servers.into();
        self
    }

    builder_setter!(name, Option<String>);
    builder_setter!(user, Option<String>);
    builder_setter!(pass, Option<String>);
    builder_setter!(auth_token, Option<String>);
    builder_setter!(tls_required, bool);
    builder_setter!(randomize_servers, bool);
    builder_setter!(allow_reconnect, bool);
    builder_setter!(max_reconnect_attempts, i64);
    builder_setter!(echo, bool);
    builder_setter!(inbox_prefix, Option<String>);

    pub fn connected_cb(mut self, cb: crate::client::callbacks::AsyncHook) -> Self {
        self.opts.0.callbacks.connected = Some(cb);
        self
    }

    pub fn disconnected_cb(mut self, cb: crate::client::callbacks::AsyncHook) -> Self {
        self.opts.0.callbacks.disconnected = Some(cb);
        self
    }

    pub fn reconnected_cb(mut self, cb: crate::client::callbacks::AsyncHook) -> Self {
        self.opts.0.callbacks.reconnected = Some(cb);
        self
    }

    pub fn closed_cb(mut self, cb: crate::client::callbacks::AsyncHook) -> Self {
        self.opts.0.callbacks.closed = Some(cb);
        self
    }

    pub fn error_cb(mut self, cb: crate::client::callbacks::ErrorHook) -> Self {
        self.opts.0.callbacks.error = Some(cb);
        self
    }

    pub fn build(self) -> Result<ClientOptions> {
        self.opts.0.validate()?;
        Ok(self.opts.0)
    }
}
