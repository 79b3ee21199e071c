use clap::Parser;
use pubsub_client::cli::{self, Cli};
use tracing::error;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(err) = cli::run::execute(&cli).await {
        error!(error = %err, "fatal error");
        std::process::exit(1);
    }
}
