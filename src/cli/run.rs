//! Dispatches the parsed CLI into a connected client and the requested
//! subcommand.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::signal;
use tracing::info;

use crate::cli::{banner, output, Cli, Commands, PubArgs, RequestArgs, SubArgs};
use crate::client::{Client, ClientOptions, DeliveryMode};
use crate::error::Result;

/// Loads options from `cli.config` if it exists, otherwise starts from
/// defaults; either way CLI flags take precedence over the file.
fn load_options(cli: &Cli) -> Result<ClientOptions> {
    let mut options = if cli.config.exists() {
        ClientOptions::load(&cli.config)?
    } else {
        ClientOptions::default()
    };
    if let Some(servers) = &cli.servers {
        options.servers = servers.clone();
    }
    Ok(options)
}

fn show_banner(suppressed: bool) {
    if !suppressed {
        banner::print_banner();
    }
}

pub async fn execute(cli: &Cli) -> Result<()> {
    crate::logging::init(cli.log_level.as_deref(), cli.json_logs);

    match &cli.command {
        Commands::Pub(args) => run_pub(cli, args).await,
        Commands::Sub(args) => run_sub(cli, args).await,
        Commands::Request(args) => run_request(cli, args).await,
        Commands::Stats => run_stats(cli).await,
    }
}

async fn connect(cli: &Cli) -> Result<Client> {
    let options = load_options(cli)?;
    let pb = output::spinner(&format!("connecting to {}", options.servers));
    match Client::connect(options).await {
        Ok(client) => {
            output::spinner_success(&pb, "connected");
            Ok(client)
        }
        Err(err) => {
            output::spinner_fail(&pb, &err.to_string());
            Err(err)
        }
    }
}

async fn run_pub(cli: &Cli, args: &PubArgs) -> Result<()> {
    show_banner(args.no_banner);
    let client = connect(cli).await?;
    client
        .publish_with_reply(args.subject.clone(), args.reply.clone(), args.payload.clone().into_bytes())
        .await?;
    client.flush(Duration::from_secs(5)).await?;
    output::success(&format!("published to {}", args.subject));
    Ok(())
}

async fn run_sub(cli: &Cli, args: &SubArgs) -> Result<()> {
    show_banner(args.no_banner);
    let client = connect(cli).await?;
    output::section(&format!("listening on {}", args.subject));

    let received = Arc::new(AtomicU64::new(0));
    let limit = args.count;
    let received_clone = received.clone();

    let sub = client
        .subscribe_queued(args.subject.clone(), args.queue.clone(), DeliveryMode::Async, move |msg| {
            let received = received_clone.clone();
            async move {
                let n = received.fetch_add(1, Ordering::SeqCst) + 1;
                let body = String::from_utf8_lossy(&msg.payload);
                output::info(&n.to_string(), &msg.subject, &body);
            }
        })
        .await?;

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        _ = wait_for_count(received, limit) => {
            info!("message count reached");
        }
    }

    sub.unsubscribe().await?;
    Ok(())
}

async fn wait_for_count(received: Arc<AtomicU64>, limit: Option<u64>) {
    let Some(limit) = limit else {
        std::future::pending::<()>().await;
        return;
    };
    loop {
        if received.load(Ordering::SeqCst) >= limit {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn run_request(cli: &Cli, args: &RequestArgs) -> Result<()> {
    show_banner(args.no_banner);
    let client = connect(cli).await?;
    let pb = output::spinner(&format!("requesting {}", args.subject));
    let payload = args.payload.clone().into_bytes();

    match client.request(args.subject.clone(), payload, args.timeout).await {
        Ok(msg) => {
            output::spinner_success(&pb, "reply received");
            output::field("subject", &msg.subject);
            output::field("payload", String::from_utf8_lossy(&msg.payload));
            Ok(())
        }
        Err(err) => {
            output::spinner_fail(&pb, &err.to_string());
            Err(err)
        }
    }
}

async fn run_stats(cli: &Cli) -> Result<()> {
    show_banner(false);
    let client = connect(cli).await?;

    output::section("server info");
    if let Some(info) = client.server_info() {
        output::field("server_id", &info.server_id);
        output::field("version", &info.version);
        output::field("max_payload", info.max_payload);
    }

    output::section("statistics (updating every second, Ctrl+C to exit)");
    tokio::select! {
        _ = signal::ctrl_c() => {}
        _ = print_stats_loop(&client) => {}
    }
    Ok(())
}

async fn print_stats_loop(client: &Client) -> ! {
    loop {
        let stats = client.stats();
        output::field("in_msgs", stats.in_msgs);
        output::field("out_msgs", stats.out_msgs);
        output::field("reconnects", stats.reconnects);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
