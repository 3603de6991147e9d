use anyhow::{Context, Result};
use clap::Parser;
use tandem_broker::config::BrokerConfig;
use tandem_broker::server::Broker;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "tandem collaborative editing session relay")]
struct Args {
    /// TCP port to listen on.
    #[arg(long, default_value_t = tandem_protocol::DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "tandem_broker=info".into()),
        )
        .init();

    let args = Args::parse();
    let broker = Broker::bind(BrokerConfig::with_port(args.port))
        .await
        .context("listener failed to bind")?;
    tracing::info!(addr = %broker.local_addr()?, "tandem broker listening");

    let shutdown = broker.shutdown_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutting down...");
        shutdown.cancel();
    });

    broker.serve().await
}
