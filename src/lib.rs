//! pubsub-client - an async client for a text-framed publish/subscribe
//! message bus.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── client/           # Connection lifecycle, wire protocol, pub/sub
//! │   ├── wire/         # Text-framed protocol: decode/encode
//! │   ├── pool.rs       # Server pool, round-robin + backoff
//! │   ├── connection.rs # Connection manager state machine
//! │   ├── outbound.rs   # Write buffer + pong-waiter FIFO
//! │   ├── subscription.rs # Subscription registry + per-sub dispatcher
//! │   ├── inbox.rs      # Request/reply inbox subjects
//! │   ├── options.rs    # ClientOptions
//! │   ├── stats.rs      # Connection statistics
//! │   └── callbacks.rs  # Lifecycle hooks
//! └── cli/              # Demo binary: connect, pub, sub, request
//! ```
//!
//! The entry point is [`client::Client::connect`].

pub mod cli;
pub mod client;
pub mod error;
pub mod logging;

pub use client::{Client, ClientOptions, DeliveryMode, Message, Subscription};
pub use error::{Error, Result};
