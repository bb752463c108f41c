mod config;
mod protocol;
mod replication;
mod server;
mod store;
mod transactions;

use clap::Parser;
use config::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.default_log_level().into()),
        )
        .init();

    server::run(args).await
}
