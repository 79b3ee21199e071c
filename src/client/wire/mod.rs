//! The text-framed wire protocol: decoding bytes off the socket into
//! [`protocol::ServerOp`] values, and encoding [`protocol::ClientOp`] values
//! back into bytes.

pub mod parser;
pub mod protocol;

pub use parser::{encode, Parser};
pub use protocol::{ClientOp, ConnectInfo, ServerInfo, ServerOp};
