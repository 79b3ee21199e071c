//! Command-line interface definitions.

pub mod banner;
pub mod output;
pub mod run;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// pubsub-client - connect to, publish on, and subscribe to a text-framed
/// publish/subscribe message bus.
#[derive(Parser, Debug)]
#[command(name = "pubsub-client")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to a client configuration file.
    #[arg(short, long, default_value = "client.toml")]
    pub config: PathBuf,

    /// Comma-separated server list, overriding the config file.
    #[arg(long)]
    pub servers: Option<String>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Use JSON log format instead of pretty.
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Publish a single message and exit.
    Pub(PubArgs),

    /// Subscribe to a subject and print every message received.
    Sub(SubArgs),

    /// Send a request and print the first reply.
    Request(RequestArgs),

    /// Connect and print the server's INFO banner and live stats.
    Stats,
}

fn parse_duration_secs(s: &str) -> Result<Duration, String> {
    s.parse::<u64>().map(Duration::from_secs).map_err(|_| format!("invalid duration: {s:?}"))
}

/// Arguments for the `pub` subcommand.
#[derive(Parser, Debug)]
pub struct PubArgs {
    /// Subject to publish on.
    pub subject: String,

    /// Payload to publish.
    pub payload: String,

    /// Optional reply subject to attach.
    #[arg(long)]
    pub reply: Option<String>,

    /// Skip the ASCII art banner.
    #[arg(long)]
    pub no_banner: bool,
}

/// Arguments for the `sub` subcommand.
#[derive(Parser, Debug)]
pub struct SubArgs {
    /// Subject (supports `*` and `>` wildcards) to subscribe to.
    pub subject: String,

    /// Optional queue group for load-balanced delivery.
    #[arg(long)]
    pub queue: Option<String>,

    /// Stop after receiving this many messages.
    #[arg(long)]
    pub count: Option<u64>,

    /// Skip the ASCII art banner.
    #[arg(long)]
    pub no_banner: bool,
}

/// Arguments for the `request` subcommand.
#[derive(Parser, Debug)]
pub struct RequestArgs {
    /// Subject to request on.
    pub subject: String,

    /// Payload to send with the request.
    pub payload: String,

    /// How long to wait for a reply, in seconds.
    #[arg(long, default_value = "5", value_parser = parse_duration_secs)]
    pub timeout: Duration,

    /// Skip the ASCII art banner.
    #[arg(long)]
    pub no_banner: bool,
}
