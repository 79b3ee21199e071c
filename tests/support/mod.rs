//! Test-only in-process broker, used instead of mocks so the integration
//! suite drives the real wire parser, connection manager, and dispatcher
//! against a real socket.

pub mod broker;

pub use broker::MiniBroker;
